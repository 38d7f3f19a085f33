//! Error types for the VolSync controllers
//!
//! Errors carry enough context (resource, reconciler stage) to be useful in
//! logs. Whether an error is worth retrying is decided by [`Error::is_retryable`];
//! the controllers never return errors for conditions that only an external
//! actor can resolve (missing storage class, source without an image, ...).

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for VolSync operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A watched object is missing data the controller requires
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// `namespace/name` of the offending object
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "gc", "rebind")
        context: String,
    },
}

impl Error {
    /// Create a validation error without resource context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific object
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Conflicts (409) are retryable: the next attempt starts from a fresh read.
    /// Other 4xx responses are not. Validation and serialization errors need a
    /// change to the object before anything can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True if the API server rejected a write because of a resource version mismatch
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source } if is_api_status(source, 409))
    }
}

/// True if a kube error is an API response with the given HTTP status
pub fn is_api_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == code)
}

/// True if a kube error is a 404
pub fn is_not_found(error: &kube::Error) -> bool {
    is_api_status(error, 404)
}

/// True if a kube error is a 409 "AlreadyExists" or conflict
pub fn is_already_exists(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}
