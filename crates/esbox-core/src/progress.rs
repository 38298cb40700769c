//! Progress reporting.
//!
//! Long-running operations (installs, worker tasks) report through a shared
//! sink rather than the generic promise surface, so non-terminal records can
//! stream while the task is still in flight.

use esbox_proto::{ProgressLevel, ProgressMessage};
use std::sync::Arc;

/// Cloneable callback receiving progress records in post order.
#[derive(Clone)]
pub struct ProgressSink {
    inner: Arc<dyn Fn(ProgressMessage) + Send + Sync>,
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressSink")
    }
}

impl ProgressSink {
    pub fn new(f: impl Fn(ProgressMessage) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// A sink that drops every record.
    #[must_use]
    pub fn null() -> Self {
        Self::new(|_msg| {})
    }

    pub fn emit(&self, msg: ProgressMessage) {
        (self.inner.as_ref())(msg);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProgressMessage {
            level: ProgressLevel::Info,
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressMessage {
            level: ProgressLevel::Error,
            message: message.into(),
        });
    }
}

/// A sink that drops every record.
#[must_use]
pub fn null_progress() -> ProgressSink {
    ProgressSink::null()
}
