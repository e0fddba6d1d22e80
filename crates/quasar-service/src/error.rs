//! Service lifecycle errors. Per-request failures never surface here;
//! they travel in reply headers.

use thiserror::Error;

/// Errors from configure/start/shutdown.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `start` was called before `configure` resolved a connection.
    #[error("service is not configured")]
    NotConfigured,

    /// Resolving the bus-connection resource failed.
    #[error(transparent)]
    Container(#[from] quasar_container::ContainerError),

    /// A bus operation failed.
    #[error(transparent)]
    Bus(#[from] quasar_bus::BusError),
}
