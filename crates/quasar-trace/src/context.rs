//! Execution context for one request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Callback invoked when a handler fault is recovered.
pub type FailureHook = Box<dyn FnOnce(String) -> BoxFuture<'static, ()> + Send>;

/// Observational context for a single request.
///
/// Identified by the request's reply-to address when it has one, or a
/// generated id otherwise. Logs start on construction and completion
/// (with elapsed time) on [`close`](Self::close) or drop, whichever
/// comes first.
pub struct ExecutionContext {
    origin: String,
    id: String,
    started: Instant,
    closed: AtomicBool,
    on_failure: Mutex<Option<FailureHook>>,
}

impl ExecutionContext {
    /// Create a context and log the request start.
    #[must_use]
    pub fn new(origin: &str, request_id: Option<String>) -> Self {
        let id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(origin = %origin, id = %id, "Request started");
        Self {
            origin: origin.to_string(),
            id,
            started: Instant::now(),
            closed: AtomicBool::new(false),
            on_failure: Mutex::new(None),
        }
    }

    /// Request identifier (reply-to address or generated).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Log progress data.
    pub fn info(&self, data: &str) {
        info!(origin = %self.origin, id = %self.id, data = %data, "Executing");
    }

    /// Log a warning.
    pub fn warn(&self, data: &str) {
        warn!(origin = %self.origin, id = %self.id, data = %data, "Executing");
    }

    /// Log an error.
    pub fn error(&self, err: &dyn std::error::Error) {
        error!(origin = %self.origin, id = %self.id, error = %err, "Errored");
    }

    /// Register the hook invoked by [`recovered`](Self::recovered).
    /// A later registration replaces an earlier one.
    pub fn on_failure(&self, hook: FailureHook) {
        *self.on_failure.lock() = Some(hook);
    }

    /// Report a recovered fault: invokes the failure hook (once) with
    /// the recovered value, then logs it.
    pub async fn recovered(&self, value: String) {
        let hook = self.on_failure.lock().take();
        if let Some(hook) = hook {
            hook(value.clone()).await;
        }
        error!(origin = %self.origin, id = %self.id, recovered = %value, "Recovered");
    }

    /// Log completion with elapsed time. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            origin = %self.origin,
            id = %self.id,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "Request ended"
        );
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.close();
    }
}
