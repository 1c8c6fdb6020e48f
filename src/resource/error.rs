//! Resource Errors
//!
//! Error taxonomy shared by the cache and its consumers. Errors are handed
//! around as `Arc<ResourceError>` so a consumer can tell whether a failure it
//! received is the same instance the resource recorded against a key.

use std::sync::Arc;
use thiserror::Error;

/// Result type for resource bookkeeping operations
pub type Result<T> = std::result::Result<T, ResourceError>;

/// Errors produced by a [`Resource`](super::Resource)
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The loader failed to produce a value for the key
    #[error("Failed to load '{key}': {source}")]
    Load {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The loader answered but did not return the requested id
    #[error("Resource '{key}' was not returned by the loader")]
    NotFound { key: String },

    /// The loader future panicked before it settled
    #[error("Loading '{key}' was interrupted: {reason}")]
    Interrupted { key: String, reason: String },

    /// `free` was called with a token that is not registered (double free
    /// or free without use)
    #[error("Usage token '{token}' is not registered")]
    UnknownToken { token: String },

    /// `free` was called with a token that belongs to another key
    #[error("Usage token '{token}' was issued for '{expected}', not '{actual}'")]
    TokenKeyMismatch {
        token: String,
        expected: String,
        actual: String,
    },

    /// A gating dependency failed, so the load was never issued
    #[error("Dependency failed: {reason}")]
    Dependency { reason: String },
}

impl ResourceError {
    /// Wrap a loader error for a key
    pub fn load(key: impl ToString, source: anyhow::Error) -> Arc<Self> {
        Arc::new(Self::Load {
            key: key.to_string(),
            source,
        })
    }

    /// Whether this error is a usage contract violation
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownToken { .. } | Self::TokenKeyMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_message_includes_key_and_source() {
        let err = ResourceError::load("conn-1", anyhow::anyhow!("connection refused"));
        assert_eq!(
            err.to_string(),
            "Failed to load 'conn-1': connection refused"
        );
    }

    #[test]
    fn test_contract_violations() {
        let unknown = ResourceError::UnknownToken {
            token: "t".to_string(),
        };
        assert!(unknown.is_contract_violation());

        let missing = ResourceError::NotFound {
            key: "a".to_string(),
        };
        assert!(!missing.is_contract_violation());
    }
}
