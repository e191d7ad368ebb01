//! Error types for the Strata operator

use thiserror::Error;

/// Main error type for Strata operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A required metadata field was missing from an object
    #[error("object is missing metadata field: {0}")]
    MissingMetadata(&'static str),

    /// A work-queue key could not be parsed
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Returns true if this error wraps a Kubernetes not-found response.
    ///
    /// Not-found is a normal lifecycle transition for the sync engine, not
    /// a failure: the owner was deleted between enqueue and sync.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// Returns true if this error wraps an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        }))
    }

    #[test]
    fn not_found_is_recognized() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!Error::validation("nope").is_not_found());
    }

    #[test]
    fn conflict_is_recognized() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(404).is_conflict());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::validation("master node group must have at least 1 node");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("at least 1 node"));

        let err = Error::MissingMetadata("uid");
        assert!(err.to_string().contains("uid"));

        let err = Error::InvalidKey("too/many/parts".to_string());
        assert!(err.to_string().contains("too/many/parts"));
    }
}
