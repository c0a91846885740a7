//! shardsearch - shard-level search execution
//!
//! A search request that reaches a shard is executed inside a
//! [`SearchContext`]: the context carries the parsed request, the optional
//! sub-phase configurations (aggregations, suggest, rescore, collapse,
//! highlight, inner hits) and the write-once results of the DFS, query and
//! fetch phases. Resources the request acquires are tracked by the context
//! and released exactly once when it closes, and a running search can be
//! cancelled cooperatively from another thread.
//!
//! [`ShardSearchService`] ties it together over an in-memory [`ShardIndex`].
//!
//! ```rust
//! use shardsearch::{Query, SearchSource, ShardIndex, ShardSearchRequest, ShardSearchService, ShardTarget};
//! use serde_json::json;
//!
//! let mut index = ShardIndex::new(ShardTarget::new("books", 0));
//! index.index_document("1", json!({"title": "Rust in Action", "price": 39.5}))?;
//! index.index_document("2", json!({"title": "Database Internals", "price": 29.0}))?;
//! let service = ShardSearchService::new(index.into_shared());
//!
//! let source = SearchSource::new().query(Query::matches_text("title", "rust"));
//! let response = service.execute(ShardSearchRequest::new(ShardTarget::new("books", 0), source))?;
//! assert_eq!(response.hit_ids(), vec!["1"]);
//! # Ok::<(), shardsearch::SearchError>(())
//! ```

pub mod aggregations;
pub mod collapse;
pub mod config;
pub mod config_persistence;
pub mod constants;
pub mod context;
pub mod error;
pub mod fetch_source;
pub mod highlight;
pub mod identifiers;
pub mod index;
pub mod inner_hits;
pub mod phases;
pub mod query;
pub mod releasable;
pub mod request;
pub mod rescore;
pub mod results;
pub mod service;
pub mod sort;
pub mod suggest;
pub mod task;

#[cfg(test)]
pub mod test_utils;

pub use aggregations::{AggregationResult, AggregationResults, AggregationSpec, SearchContextAggregations};
pub use collapse::{CollapseContext, CollapseSpec};
pub use config::SearchConfig;
pub use config_persistence::PersistedConfig;
pub use context::{ContextHandle, SearchContext};
pub use error::SearchError;
pub use fetch_source::{FetchSourceContext, FetchSourceSpec};
pub use highlight::{HighlightSpec, SearchHighlightContext};
pub use identifiers::{ContextId, ShardTarget};
pub use index::{DocId, IndexSearcher, SearcherLease, ShardIndex, StoredDocument, TermStatistics};
pub use inner_hits::{InnerHitsContext, InnerHitsSpec};
pub use phases::{
    DfsPhase, DfsPhaseParams, FetchPhase, FetchPhaseParams, PreProcess, PreProcessParams, QueryPhase, QueryPhaseParams,
};
pub use query::{BoolQuery, FilterState, Operator, Query};
pub use releasable::{Releasable, ReleasableLedger, ReleaseFn};
pub use request::{SearchSource, SearchType, ShardSearchRequest, TrackTotalHits};
pub use rescore::{RescoreContext, RescoreDocIds, RescoreSpec, ScoreMode};
pub use results::{
    DfsSearchResult, FetchSearchResult, QuerySearchResult, ResultSink, ScoreDoc, SearchHit, ShardSearchResponse,
    TotalHits, TotalHitsRelation,
};
pub use service::{ServiceStats, ShardSearchService};
pub use sort::{SortField, SortOrder, SortValue};
pub use suggest::{SuggestSpec, SuggestionSearchContext, TermSuggesterSpec};
pub use task::SearchTask;

/// Type alias for Results using SearchError
pub type Result<T> = std::result::Result<T, SearchError>;
