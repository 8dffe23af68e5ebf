//! Record model for the service registry.
//!
//! Records are plain data: a name, the names of their parents and a
//! string-to-string metadata mapping. Metadata equality is map equality, so
//! insertion order never matters.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form key/value metadata attached to every record.
pub type Metadata = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Record kind
// ---------------------------------------------------------------------------

/// The three kinds of entries held by a service registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Namespace,
    Service,
    Endpoint,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Namespace => write!(f, "namespace"),
            RecordKind::Service => write!(f, "service"),
            RecordKind::Endpoint => write!(f, "endpoint"),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A namespace in the service registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A service, scoped by its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub ns_name: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A single reachable `address:port` of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub ns_name: String,
    pub serv_name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata<K, V>(mut self, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        extend_metadata(&mut self.metadata, entries);
        self
    }
}

impl Service {
    pub fn new(ns_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ns_name: ns_name.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata<K, V>(mut self, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        extend_metadata(&mut self.metadata, entries);
        self
    }
}

impl Endpoint {
    pub fn with_metadata<K, V>(mut self, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        extend_metadata(&mut self.metadata, entries);
        self
    }
}

fn extend_metadata<K, V>(metadata: &mut Metadata, entries: impl IntoIterator<Item = (K, V)>)
where
    K: Into<String>,
    V: Into<String>,
{
    metadata.extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
}

// ---------------------------------------------------------------------------
// Ownership tag
// ---------------------------------------------------------------------------

/// Reserved metadata entry marking a record as managed by this bridge.
///
/// Records that lack the key, or carry another value under it, belong to
/// somebody else and are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTag {
    pub key: String,
    pub value: String,
}

impl OwnershipTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Write the tag into `metadata`, replacing whatever was under the key.
    pub fn stamp(&self, metadata: &mut Metadata) {
        metadata.insert(self.key.clone(), self.value.clone());
    }

    /// `true` when `metadata` carries this exact key/value pair.
    pub fn owns(&self, metadata: &Metadata) -> bool {
        metadata.get(&self.key) == Some(&self.value)
    }
}

impl fmt::Display for OwnershipTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
