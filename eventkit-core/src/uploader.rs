//! Outcome reporting and upload coordination
//!
//! Every outcome the client reports, for enqueue and for flush alike, goes
//! through [`complete`], which turns a `Result` into exactly one
//! [`Callback`] invocation.

use std::sync::Arc;

use crate::error::{codes, Error, Result};
use crate::queue::{EventQueue, FlushReport};
use crate::settings;

/// Outcome receiver supplied by the host application
///
/// At most one of the two methods runs per operation, and it runs once.
pub trait Callback: Send + Sync {
    fn on_success(&self);

    /// `code` is one of [`codes`](crate::error::codes), or
    /// [`UNKNOWN_ERROR`](crate::error::codes::UNKNOWN_ERROR) when the
    /// failing collaborator supplied none.
    fn on_error(&self, code: &str, cause: &Error);
}

/// [`Callback`] built from two closures
pub struct FnCallback<S, E> {
    on_success: S,
    on_error: E,
}

impl<S, E> FnCallback<S, E>
where
    S: Fn() + Send + Sync,
    E: Fn(&str, &Error) + Send + Sync,
{
    pub fn new(on_success: S, on_error: E) -> Self {
        Self {
            on_success,
            on_error,
        }
    }
}

impl<S, E> Callback for FnCallback<S, E>
where
    S: Fn() + Send + Sync,
    E: Fn(&str, &Error) + Send + Sync,
{
    fn on_success(&self) {
        (self.on_success)()
    }

    fn on_error(&self, code: &str, cause: &Error) {
        (self.on_error)(code, cause)
    }
}

/// Report `outcome` to `callback`, or only to the log when there is none.
///
/// Failures are logged at error level while library logging is enabled.
pub fn complete<T>(operation: &str, callback: Option<&dyn Callback>, outcome: Result<T>) {
    match outcome {
        Ok(_) => {
            if let Some(callback) = callback {
                callback.on_success();
            }
        }
        Err(e) => {
            let code = e.error_code().unwrap_or(codes::UNKNOWN_ERROR);
            if settings::is_logging_enabled() {
                tracing::error!(operation, code, error = %e, "Operation failed");
            }
            if let Some(callback) = callback {
                callback.on_error(code, &e);
            }
        }
    }
}

/// Hands flushes to the queue and reports their outcome
pub struct UploadCoordinator {
    queue: Arc<dyn EventQueue>,
}

impl UploadCoordinator {
    pub fn new(queue: Arc<dyn EventQueue>) -> Self {
        Self { queue }
    }

    /// Start uploading everything queued so far; returns immediately.
    ///
    /// No retry happens here. Whatever the queue reports is passed on once.
    pub fn upload(&self, scope: Option<&str>, callback: Option<Arc<dyn Callback>>) {
        tracing::debug!(scope = ?scope, "Upload requested");
        self.queue.flush(
            scope,
            Box::new(move |outcome: Result<FlushReport>| {
                if let Ok(report) = &outcome {
                    tracing::info!(delivered = report.delivered, "Upload finished");
                }
                complete("upload_events", callback.as_deref(), outcome);
            }),
        );
    }
}
