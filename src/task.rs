//! Cooperative cancellation for shard search tasks
//!
//! A [`SearchTask`] is shared between the thread executing a search and any
//! party that may want to stop it (a client disconnect, a request timeout,
//! an administrative cancel). Cancellation only sets a flag; long running
//! phases poll it and abort on their own.

use crate::error::SearchError;
use crate::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::debug;

/// Cancellation state of one shard-level search
#[derive(Debug)]
pub struct SearchTask {
    description: String,
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    started: Instant,
}

impl SearchTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            cancelled: AtomicBool::new(false),
            reason: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// Request cancellation. Returns false if the task was already cancelled,
    /// in which case the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut slot = self.reason.lock();
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        debug!("Cancelling task [{}]: {}", self.description, reason);
        *slot = Some(reason);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancellation_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Return `TaskCancelled` if cancellation was requested
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            let reason = self
                .cancellation_reason()
                .unwrap_or_else(|| "cancelled".to_string());
            return Err(SearchError::task_cancelled(reason));
        }
        Ok(())
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn started(&self) -> Instant {
        self.started
    }
}
