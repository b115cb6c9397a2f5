//! Progress reporting and cancellation plumbing
//!
//! The core never touches a UI; it reports fractional progress through a
//! caller-supplied callback and polls a shared token at chunk and entry
//! boundaries. In-flight work is allowed to finish, so partial output can
//! exist after a cancel but is never reported as a success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress information delivered to the callback
#[derive(Debug, Clone)]
pub struct ProgressReport {
    /// Completed fraction in `[0, 1]`
    pub fraction: f32,
    /// Human-readable description of the current step
    pub message: String,
}

/// Progress callback shared across worker threads
pub type ProgressCallback = Arc<dyn Fn(ProgressReport) + Send + Sync>;

/// Cooperative cancellation token
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Invoke an optional progress callback
pub(crate) fn report(callback: Option<&ProgressCallback>, fraction: f32, message: impl Into<String>) {
    if let Some(callback) = callback {
        callback(ProgressReport {
            fraction: fraction.clamp(0.0, 1.0),
            message: message.into(),
        });
    }
}
