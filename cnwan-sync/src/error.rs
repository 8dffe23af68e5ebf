//! Error types for cnwan-sync.

use std::time::Duration;

use thiserror::Error;

use cnwan_core::{RecordKind, RegistryError};

/// All errors that can arise from extraction and reconciliation.
///
/// Ownership conflicts are not errors: a record owned by someone else is
/// reported as a normal outcome.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The broker was built without a registry backend.
    #[error("service registry not configured")]
    RegistryNotConfigured,

    /// No desired record was handed to the broker.
    #[error("{kind} not provided")]
    RecordNotProvided { kind: RecordKind },

    /// The desired record has an empty name.
    #[error("{kind} name not provided")]
    NameNotProvided { kind: RecordKind },

    /// Extraction was called without a namespace object.
    #[error("namespace not provided")]
    NamespaceNotProvided,

    /// Extraction was called without a service object.
    #[error("service not provided")]
    ServiceNotProvided,

    /// A registry call did not finish within the broker's call timeout.
    #[error("{op} {kind} timed out after {after:?}")]
    Timeout {
        kind: RecordKind,
        op: &'static str,
        after: Duration,
    },

    /// The broker's shutdown signal fired while a registry call was in flight.
    #[error("{op} {kind} cancelled")]
    Cancelled { kind: RecordKind, op: &'static str },

    /// An error reported by the registry backend.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Registry(err) if err.is_not_found())
    }

    /// Transient failures worth another attempt on the next trigger.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }
}
