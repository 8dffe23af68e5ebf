//! Error types for cnwan-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RecordKind;

/// All errors a registry backend can report.
///
/// Only [`RegistryError::NotFound`] carries meaning for reconciliation; every
/// other variant is propagated as-is.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested record (or one of its parents) does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: RecordKind, name: String },

    /// A create call targeted a record that is already present.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: RecordKind, name: String },

    /// The name cannot be used as a storage key (empty, or contains a path
    /// separator).
    #[error("invalid {kind} name '{name}'")]
    InvalidName { kind: RecordKind, name: String },

    /// Underlying I/O failure, with the path that caused it.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse record at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Opaque failure reported by a remote backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

impl RegistryError {
    pub fn not_found(kind: RecordKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: RecordKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience constructor for [`RegistryError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
