//! Search phases over a [`SearchContext`](crate::context::SearchContext)
//!
//! Every phase is an [`ApiOperation`](apithing::ApiOperation) on the search
//! context. A request runs them in the order pre-process, DFS (only for
//! `DFS_QUERY_THEN_FETCH`), query and fetch. Phases never retry; an error
//! ends the request and the caller closes the context.
//!
//! ```rust
//! use apithing::ApiOperation;
//! use shardsearch::config::SearchConfig;
//! use shardsearch::context::SearchContext;
//! use shardsearch::identifiers::ShardTarget;
//! use shardsearch::index::ShardIndex;
//! use shardsearch::phases::{FetchPhase, FetchPhaseParams, PreProcess, PreProcessParams, QueryPhase, QueryPhaseParams};
//! use shardsearch::query::Query;
//! use shardsearch::request::{SearchSource, ShardSearchRequest};
//! use serde_json::json;
//!
//! let mut index = ShardIndex::new(ShardTarget::new("books", 0));
//! index.index_document("1", json!({"title": "Rust in Action"}))?;
//! let index = index.into_shared();
//! let (searcher, lease) = index.acquire_searcher();
//!
//! let source = SearchSource::new().query(Query::matches_text("title", "rust"));
//! let request = ShardSearchRequest::new(ShardTarget::new("books", 0), source);
//! let mut context = SearchContext::new(request, searcher, SearchConfig::default());
//! context.add_releasable(Box::new(lease))?;
//!
//! PreProcess::execute(&mut context, &PreProcessParams::default())?;
//! QueryPhase::execute(&mut context, &QueryPhaseParams)?;
//! FetchPhase::execute(&mut context, &FetchPhaseParams)?;
//! assert_eq!(context.fetch_result().get().map(|r| r.hits.len()), Some(1));
//! # Ok::<(), shardsearch::error::SearchError>(())
//! ```

mod dfs;
mod fetch;
mod query;

pub use dfs::{DfsPhase, DfsPhaseParams};
pub use fetch::{FetchPhase, FetchPhaseParams};
pub use query::{QueryPhase, QueryPhaseParams};

use crate::context::SearchContext;
use crate::error::SearchError;
use apithing::ApiOperation;

/// Parameters of [`PreProcess`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreProcessParams {
    /// Rewrite the query into its simplest equivalent form
    pub rewrite: bool,
}

impl Default for PreProcessParams {
    fn default() -> Self {
        Self { rewrite: true }
    }
}

/// Validates the request and builds the executed query
pub struct PreProcess;

impl ApiOperation<SearchContext, PreProcessParams> for PreProcess {
    type Output = ();
    type Error = SearchError;

    fn execute(context: &mut SearchContext, parameters: &PreProcessParams) -> Result<Self::Output, Self::Error> {
        context.check_cancelled()?;
        context.pre_process(parameters.rewrite)
    }
}

/// Fails unless the context went through [`PreProcess`]
fn ensure_pre_processed(context: &SearchContext, phase: &str) -> Result<(), SearchError> {
    if context.is_pre_processed() {
        Ok(())
    } else {
        Err(SearchError::phase_failed(phase, "search context has not been pre-processed"))
    }
}

/// Cancellation polling shared by the document loops of the phases
struct CancellationCheck {
    low_level: bool,
    interval: usize,
}

impl CancellationCheck {
    fn new(context: &SearchContext) -> Self {
        let config = context.config();
        Self {
            low_level: config.low_level_cancellation,
            interval: config.cancellation_check_interval.max(1),
        }
    }

    /// True when the loop should poll cancellation before handling item `position`
    fn due(&self, position: usize) -> bool {
        if self.low_level {
            self.timeout_due(position)
        } else {
            position == 0
        }
    }

    /// True when the loop should check the search timeout. Independent of
    /// low-level cancellation.
    fn timeout_due(&self, position: usize) -> bool {
        position % self.interval == 0
    }
}
