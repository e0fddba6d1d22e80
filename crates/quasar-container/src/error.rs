//! Container error taxonomy. All of these are configuration-time
//! failures: fatal at registration or boot, never per-request.

use std::sync::Arc;

use thiserror::Error;

/// Errors from container operations.
#[derive(Debug, Error, Clone)]
pub enum ContainerError {
    /// A resource with this name is already registered.
    #[error("resource {0} is already registered")]
    Duplicate(String),

    /// No resource is registered under this name.
    #[error("resource {0} is not registered")]
    NotFound(String),

    /// The resolved value does not match the requested type.
    #[error("resource {0} does not match the requested type")]
    InvalidCast(String),

    /// A scoped resource was resolved without a scope id.
    #[error("resource {0} is scoped and requires a scope id")]
    MissingScope(String),

    /// The resource factory failed. For singletons the same error is
    /// shared by every resolver of the current generation.
    #[error("factory for resource {name} failed: {source}")]
    Factory {
        name: String,
        source: Arc<anyhow::Error>,
    },
}
