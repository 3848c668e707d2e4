//! Unified error type for the job monitor and the job transport.

use thiserror::Error;

/// Unified error type of the ORT job monitor.
///
/// The variants follow the failure classes the reconciliation loops have to
/// distinguish: transient infrastructure failures (cluster API, transport,
/// database, timeouts) that the next sweep simply retries, configuration
/// failures that are fatal at startup, and everything else.
#[derive(Error, Debug)]
pub enum OrtError {
    // ============ Infrastructure Errors ============
    /// The Kubernetes API rejected or failed a request.
    #[error("Kubernetes error: {0}")]
    Kubernetes(String),

    /// A message could not be handed over to its transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// A remote call did not complete in time.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Configuration Errors ============
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ============ Domain Errors ============
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Input that cannot be processed, e.g. a malformed label value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ============ Generic Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped error from other sources
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrtError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Kubernetes(_) => "KUBERNETES_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a Kubernetes error.
    #[must_use]
    pub fn kubernetes<T: Into<String>>(message: T) -> Self {
        Self::Kubernetes(message.into())
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if a later sweep may succeed where this attempt failed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Kubernetes(_) | Self::Transport(_) | Self::Database(_) | Self::Timeout(_)
        )
    }

    /// Checks if this error must stop the process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for OrtError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                resource_type: "database_row",
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut => Self::Timeout(err.to_string()),
            _ => Self::Database(err.to_string()),
        }
    }
}
