//! Unified error handling for the router.

use std::fmt;

use crate::transport::RemoteError;

/// Error types for the router control plane
#[derive(Debug)]
pub enum RouterError {
    /// Invalid or unresolvable configuration
    Configuration(String),

    /// Service registration failures
    Registry(String),

    /// Remote call failures
    Remote(RemoteError),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            RouterError::Registry(msg) => write!(f, "Registry error: {msg}"),
            RouterError::Remote(err) => write!(f, "Remote call failed: {err}"),
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouterError::Remote(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RemoteError> for RouterError {
    fn from(err: RemoteError) -> Self {
        RouterError::Remote(err)
    }
}

/// Result type alias for router operations
pub type RouterResult<T> = std::result::Result<T, RouterError>;
