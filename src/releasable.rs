//! Releasable resource ledger
//!
//! A [`ReleasableLedger`] tracks resources acquired on behalf of a search
//! context (searcher leases, registry entries, caches) and releases them
//! exactly once, in registration order, when the ledger is released.
//!
//! # Usage Examples
//!
//! ```rust
//! use shardsearch::releasable::{ReleasableLedger, ReleaseFn};
//! use std::sync::{Arc, Mutex};
//!
//! let order = Arc::new(Mutex::new(Vec::new()));
//! let ledger = ReleasableLedger::new();
//!
//! for name in ["searcher", "cache"] {
//!     let order = Arc::clone(&order);
//!     ledger
//!         .register(Box::new(ReleaseFn::new(name, move || {
//!             order.lock().unwrap().push(name);
//!             Ok(())
//!         })))
//!         .unwrap();
//! }
//!
//! ledger.release_all().unwrap();
//! assert_eq!(*order.lock().unwrap(), vec!["searcher", "cache"]);
//! ```

use crate::error::SearchError;
use crate::Result;
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, warn};

/// A resource that must be released exactly once
pub trait Releasable: Send {
    /// Release the resource. The ledger calls this at most once.
    fn release(&mut self) -> Result<()>;

    /// Human readable name used in logs and errors
    fn name(&self) -> &str {
        "resource"
    }
}

/// Adapts a closure into a [`Releasable`]
pub struct ReleaseFn {
    name: String,
    release: Option<Box<dyn FnOnce() -> Result<()> + Send>>,
}

impl ReleaseFn {
    pub fn new<F>(name: impl Into<String>, release: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }
}

impl Releasable for ReleaseFn {
    fn release(&mut self) -> Result<()> {
        match self.release.take() {
            Some(release) => release(),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ReleaseFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseFn")
            .field("name", &self.name)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[derive(Default)]
struct LedgerState {
    entries: Vec<Box<dyn Releasable>>,
    released: bool,
}

/// FIFO ledger of resources released together
#[derive(Default)]
pub struct ReleasableLedger {
    state: Mutex<LedgerState>,
}

impl ReleasableLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource for release.
    ///
    /// If the ledger was already released, the resource is released
    /// immediately and `ContextClosed` is returned.
    pub fn register(&self, mut releasable: Box<dyn Releasable>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.released {
                state.entries.push(releasable);
                return Ok(());
            }
        }

        let name = releasable.name().to_string();
        warn!("Resource {} registered after release, releasing immediately", name);
        if let Err(e) = releasable.release() {
            warn!("Failed to release late resource {}: {}", name, e);
        }
        Err(SearchError::ContextClosed {
            context_id: format!("ledger (late registration of {})", name),
        })
    }

    /// Release every registered resource in registration order.
    ///
    /// Only the first call releases anything. Every resource is released
    /// even if an earlier one fails; failures are collected into a single
    /// `ReleaseFailed` error.
    pub fn release_all(&self) -> Result<()> {
        let entries = {
            let mut state = self.state.lock();
            if state.released {
                return Ok(());
            }
            state.released = true;
            std::mem::take(&mut state.entries)
        };

        let mut failures = Vec::new();
        for mut entry in entries {
            let name = entry.name().to_string();
            match entry.release() {
                Ok(()) => debug!("Released {}", name),
                Err(e) => {
                    warn!("Failed to release {}: {}", name, e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SearchError::ReleaseFailed {
                count: failures.len(),
                details: failures.join("; "),
            })
        }
    }

    /// Number of resources waiting to be released
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}

impl fmt::Debug for ReleasableLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let names: Vec<&str> = state.entries.iter().map(|e| e.name()).collect();
        f.debug_struct("ReleasableLedger")
            .field("pending", &names)
            .field("released", &state.released)
            .finish()
    }
}
