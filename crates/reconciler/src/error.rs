//! Error types for the reconciler crate.

use thiserror::Error;

use crate::types::{ArtifactKind, ObjectKey};

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
///
/// Not-found is never an error here: store reads return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// A store call failed for a reason other than not-found.
    #[error("{operation} {kind} '{key}' failed: {reason}")]
    Api {
        operation: &'static str,
        kind: ArtifactKind,
        key: ObjectKey,
        reason: String,
    },

    /// The write carried a stale resource version.
    #[error("conflict writing {kind} '{key}': object was modified")]
    Conflict { kind: ArtifactKind, key: ObjectKey },

    /// Create of an object that already exists.
    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: ArtifactKind, key: ObjectKey },

    /// A namespaced object has no namespace.
    #[error("object '{name}' has no namespace")]
    MissingNamespace { name: String },

    /// Encoding an object for the API failed.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error(transparent)]
    Core(#[from] ko_core::Error),
}

impl Error {
    /// Create a store API error.
    pub fn api(
        operation: &'static str,
        kind: ArtifactKind,
        key: &ObjectKey,
        reason: impl Into<String>,
    ) -> Self {
        Self::Api {
            operation,
            kind,
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: ArtifactKind, key: &ObjectKey) -> Self {
        Self::Conflict {
            kind,
            key: key.clone(),
        }
    }

    /// Create an already-exists error.
    pub fn already_exists(kind: ArtifactKind, key: &ObjectKey) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.clone(),
        }
    }

    /// Create a missing namespace error.
    pub fn missing_namespace(name: impl Into<String>) -> Self {
        Self::MissingNamespace { name: name.into() }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}
