//! Shard search service
//!
//! [`ShardSearchService`] owns a frozen shard index, creates a
//! [`SearchContext`] per request and runs the phases over it. Every context
//! registers two resources on creation: the searcher lease and its entry in
//! the active-context registry. Both are released when the context closes,
//! which the service does on every exit path.
//!
//! Running searches can be cancelled by id from any thread. The async entry
//! point [`ShardSearchService::execute_with_deadline`] runs the phases on a
//! blocking task and cancels the context when the deadline passes.

use crate::config::SearchConfig;
use crate::config_persistence::PersistedConfig;
use crate::context::{ContextHandle, SearchContext};
use crate::error::SearchError;
use crate::identifiers::ContextId;
use crate::index::ShardIndex;
use crate::phases::{
    DfsPhase, DfsPhaseParams, FetchPhase, FetchPhaseParams, PreProcess, PreProcessParams, QueryPhase,
    QueryPhaseParams,
};
use crate::releasable::ReleaseFn;
use crate::request::{SearchType, ShardSearchRequest};
use crate::results::ShardSearchResponse;
use crate::Result;
use apithing::ApiOperation;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Cancellation reason prefix marking searches stopped by their deadline
const DEADLINE_EXCEEDED: &str = "deadline exceeded";

type ActiveContexts = Arc<Mutex<FxHashMap<ContextId, ContextHandle>>>;

#[derive(Debug, Default)]
struct ServiceCounters {
    contexts_created: AtomicU64,
    searches_completed: AtomicU64,
    searches_failed: AtomicU64,
    searches_cancelled: AtomicU64,
    searches_timed_out: AtomicU64,
}

/// Snapshot of the service counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub contexts_created: u64,
    pub searches_completed: u64,
    pub searches_failed: u64,
    /// Searches cancelled by a caller; deadline cancellations are not included
    pub searches_cancelled: u64,
    /// Searches abandoned because their deadline passed
    pub searches_timed_out: u64,
    pub active_contexts: usize,
}

impl ServiceStats {
    /// Share of finished searches that did not complete, as a percentage
    pub fn failure_rate(&self) -> f64 {
        let unsuccessful = self.searches_failed + self.searches_cancelled + self.searches_timed_out;
        let finished = self.searches_completed + unsuccessful;
        if finished > 0 {
            (unsuccessful as f64 / finished as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Executes search requests against one shard
#[derive(Debug)]
pub struct ShardSearchService {
    index: Arc<ShardIndex>,
    config: SearchConfig,
    active: ActiveContexts,
    counters: ServiceCounters,
}

impl ShardSearchService {
    pub fn new(index: Arc<ShardIndex>) -> Self {
        Self::with_config(index, SearchConfig::default())
    }

    pub fn with_config(index: Arc<ShardIndex>, config: SearchConfig) -> Self {
        if config.enable_detailed_logging {
            info!("Initializing search service for shard {} with detailed logging enabled", index.target());
        }
        Self {
            index,
            config,
            active: Arc::new(Mutex::new(FxHashMap::default())),
            counters: ServiceCounters::default(),
        }
    }

    /// Create a service using the configuration persisted in `config_dir`
    pub fn open(index: Arc<ShardIndex>, config_dir: &Path) -> Result<Self> {
        let config = PersistedConfig::load_from_directory(config_dir)
            .map_err(|e| e.with_operation_context("opening search service", &config_dir.display().to_string()))?;
        Ok(Self::with_config(index, config))
    }

    pub fn index(&self) -> &Arc<ShardIndex> {
        &self.index
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Create a context for `request` and register its resources.
    ///
    /// The caller owns the context; closing or dropping it releases the
    /// searcher and removes it from the active registry.
    pub fn create_context(&self, request: ShardSearchRequest) -> Result<SearchContext> {
        let target = self.index.target();
        if request.shard.index != target.index || request.shard.shard != target.shard {
            return Err(SearchError::invalid_input(
                "shard",
                format!("request targets {} but this service serves {}", request.shard, target),
                "Route the request to the service of the targeted shard",
            ));
        }

        let (searcher, lease) = self.index.acquire_searcher();
        let context = SearchContext::new(request, searcher, self.config.clone());
        context.add_releasable(Box::new(lease))?;

        let id = context.id();
        self.active.lock().insert(id, context.handle());
        let active = Arc::clone(&self.active);
        context.add_releasable(Box::new(ReleaseFn::new("active context registration", move || {
            active.lock().remove(&id);
            Ok(())
        })))?;

        self.counters.contexts_created.fetch_add(1, Ordering::Relaxed);
        debug!("Created search context {} for {}", id, context);
        Ok(context)
    }

    /// Run a request to completion and close its context
    pub fn execute(&self, request: ShardSearchRequest) -> Result<ShardSearchResponse> {
        let mut context = self.create_context(request)?;
        let outcome = Self::run_phases(&mut context);
        self.finish(context, outcome)
    }

    /// Run a request on a blocking task, cancelling it if `deadline` passes.
    ///
    /// On timeout the context is cancelled and the call waits for the phase
    /// to observe the cancellation before returning `Timeout`.
    pub async fn execute_with_deadline(
        self: Arc<Self>,
        request: ShardSearchRequest,
        deadline: Duration,
    ) -> Result<ShardSearchResponse> {
        let started = Instant::now();
        let mut context = self.create_context(request)?;
        let handle = context.handle();

        let service = Arc::clone(&self);
        let mut task = tokio::task::spawn_blocking(move || {
            let outcome = Self::run_phases(&mut context);
            service.finish(context, outcome)
        });

        match timeout(deadline, &mut task).await {
            Ok(joined) => joined.map_err(|e| SearchError::phase_failed("search", format!("search task failed: {}", e)))?,
            Err(_) => {
                self.counters.searches_timed_out.fetch_add(1, Ordering::Relaxed);
                handle.cancel(format!("{} ({}ms)", DEADLINE_EXCEEDED, deadline.as_millis()));
                warn!("Search context {} exceeded its deadline of {:?}, cancelling", handle.id(), deadline);
                if let Err(e) = task.await {
                    warn!("Search task of context {} failed after cancellation: {}", handle.id(), e);
                }
                Err(SearchError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    fn run_phases(context: &mut SearchContext) -> Result<()> {
        PreProcess::execute(context, &PreProcessParams::default())?;
        if context.search_type() == SearchType::DfsQueryThenFetch {
            DfsPhase::execute(context, &DfsPhaseParams)?;
        }
        QueryPhase::execute(context, &QueryPhaseParams)?;
        if !context.doc_ids_to_load().is_empty() {
            FetchPhase::execute(context, &FetchPhaseParams)?;
        }
        Ok(())
    }

    fn finish(&self, mut context: SearchContext, outcome: Result<()>) -> Result<ShardSearchResponse> {
        let response = outcome.and_then(|()| {
            let query = context
                .query_result_mut()
                .take()
                .ok_or_else(|| SearchError::phase_failed("query", "no query result was produced"))?;
            Ok(ShardSearchResponse {
                context_id: context.id(),
                shard: context.shard_target().clone(),
                took_ms: context.relative_time_millis(),
                dfs: context.dfs_result_mut().take(),
                query,
                fetch: context.fetch_result_mut().take(),
            })
        });

        if let Err(e) = context.close() {
            warn!("Failed to release resources of search context {}: {}", context.id(), e);
        }

        match &response {
            Ok(response) => {
                self.counters.searches_completed.fetch_add(1, Ordering::Relaxed);
                if self.config.enable_detailed_logging {
                    debug!(
                        "Search context {} completed in {}ms with {} hit(s)",
                        response.context_id,
                        response.took_ms,
                        response.hits().len()
                    );
                }
            }
            Err(e) if e.is_cancellation() && Self::hit_deadline(&context) => {
                debug!("Search context {} stopped at its deadline: {}", context.id(), e);
            }
            Err(e) if e.is_cancellation() => {
                self.counters.searches_cancelled.fetch_add(1, Ordering::Relaxed);
                warn!("Search context {} was cancelled: {}", context.id(), e);
            }
            Err(e) => {
                self.counters.searches_failed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Search context {} failed (recoverable: {}): {}",
                    context.id(),
                    e.is_recoverable(),
                    e
                );
            }
        }
        response
    }

    /// Deadline cancellations are counted by the caller of `finish`
    fn hit_deadline(context: &SearchContext) -> bool {
        context
            .task()
            .cancellation_reason()
            .is_some_and(|reason| reason.starts_with(DEADLINE_EXCEEDED))
    }

    /// Cancel a running search. Returns false if the id is unknown or the
    /// search was already cancelled.
    pub fn cancel(&self, id: ContextId, reason: impl Into<String>) -> bool {
        let handle = self.active.lock().get(&id).cloned();
        match handle {
            Some(handle) => handle.cancel(reason),
            None => false,
        }
    }

    /// Cancel every running search; returns how many were newly cancelled
    pub fn cancel_all(&self, reason: &str) -> usize {
        let handles: Vec<ContextHandle> = self.active.lock().values().cloned().collect();
        let cancelled = handles.iter().filter(|handle| handle.cancel(reason)).count();
        if cancelled > 0 {
            info!("Cancelled {} running search(es): {}", cancelled, reason);
        }
        cancelled
    }

    /// Ids of contexts that have not been closed yet
    pub fn active_contexts(&self) -> Vec<ContextId> {
        self.active.lock().keys().copied().collect()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            contexts_created: self.counters.contexts_created.load(Ordering::Relaxed),
            searches_completed: self.counters.searches_completed.load(Ordering::Relaxed),
            searches_failed: self.counters.searches_failed.load(Ordering::Relaxed),
            searches_cancelled: self.counters.searches_cancelled.load(Ordering::Relaxed),
            searches_timed_out: self.counters.searches_timed_out.load(Ordering::Relaxed),
            active_contexts: self.active.lock().len(),
        }
    }
}
