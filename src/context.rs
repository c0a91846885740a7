//! The per-shard search context
//!
//! A [`SearchContext`] is created for every shard-level search request and
//! threaded through the phases. It owns the request state, the optional
//! sub-phase configurations and the result sinks of the DFS, query and fetch
//! phases.
//!
//! # Lifecycle
//!
//! Resources acquired for the request (searcher leases, registry entries)
//! are registered with [`SearchContext::add_releasable`] and released exactly
//! once, in registration order, when the context closes. Closing is
//! idempotent and guarded by an atomic flag, so a context may be closed from
//! the executing thread and from a [`ContextHandle`] concurrently. Dropping
//! a context closes it.
//!
//! # Usage Examples
//!
//! ```rust
//! use shardsearch::config::SearchConfig;
//! use shardsearch::context::SearchContext;
//! use shardsearch::identifiers::ShardTarget;
//! use shardsearch::index::ShardIndex;
//! use shardsearch::request::{SearchSource, ShardSearchRequest};
//! use serde_json::json;
//!
//! let mut index = ShardIndex::new(ShardTarget::new("books", 0));
//! index.index_document("1", json!({"title": "Rust in Action"}))?;
//! let index = index.into_shared();
//!
//! let (searcher, lease) = index.acquire_searcher();
//! let request = ShardSearchRequest::new(ShardTarget::new("books", 0), SearchSource::new());
//! let context = SearchContext::new(request, searcher, SearchConfig::default());
//! context.add_releasable(Box::new(lease))?;
//!
//! context.close()?;
//! assert_eq!(index.open_searchers(), 0);
//! # Ok::<(), shardsearch::error::SearchError>(())
//! ```

use crate::aggregations::SearchContextAggregations;
use crate::collapse::CollapseContext;
use crate::config::SearchConfig;
use crate::constants::sort_fields;
use crate::error::SearchError;
use crate::fetch_source::FetchSourceContext;
use crate::highlight::SearchHighlightContext;
use crate::identifiers::{ContextId, ShardTarget};
use crate::index::{DocId, IndexSearcher};
use crate::inner_hits::InnerHitsContext;
use crate::query::{FilterState, Query};
use crate::releasable::{Releasable, ReleasableLedger};
use crate::request::{SearchSource, SearchType, ShardSearchRequest, TrackTotalHits};
use crate::rescore::{RescoreContext, RescoreDocIds};
use crate::results::{DfsSearchResult, FetchSearchResult, QuerySearchResult, ResultSink};
use crate::sort::{is_score_sort, SortField, SortValue};
use crate::suggest::SuggestionSearchContext;
use crate::task::SearchTask;
use crate::Result;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// State shared between a context and its handles
#[derive(Debug)]
struct ContextLifecycle {
    id: ContextId,
    closed: AtomicBool,
    ledger: ReleasableLedger,
    task: Arc<SearchTask>,
}

impl ContextLifecycle {
    fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        debug!("Closing search context {}", self.id);
        self.ledger.release_all()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_cancelled(&self) -> bool {
        self.task.is_cancelled() || self.is_closed()
    }
}

/// Cloneable handle to a running context, usable from other threads
#[derive(Debug, Clone)]
pub struct ContextHandle {
    lifecycle: Arc<ContextLifecycle>,
}

impl ContextHandle {
    pub fn id(&self) -> ContextId {
        self.lifecycle.id
    }

    /// Close the context, releasing its resources if nobody did before
    pub fn close(&self) -> Result<()> {
        self.lifecycle.close()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Signal cancellation; the executing phase aborts at its next check
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        self.lifecycle.task.cancel(reason)
    }

    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

/// Execution state of one shard-level search request
#[derive(Debug)]
pub struct SearchContext {
    lifecycle: Arc<ContextLifecycle>,
    shard: ShardTarget,
    number_of_shards: u32,
    search_type: SearchType,
    scroll: Option<Duration>,
    searcher: IndexSearcher,
    config: SearchConfig,
    source: SearchSource,
    started: Instant,

    filters: FilterState,
    parsed_query: Option<Query>,
    pre_processed: bool,

    from: usize,
    size: usize,
    terminate_after: usize,
    timeout: Option<Duration>,
    track_total_hits: TrackTotalHits,
    track_scores: bool,
    min_score: Option<f32>,
    sort: Vec<SortField>,
    search_after: Option<Vec<SortValue>>,
    explain: bool,
    version: bool,
    seq_no_primary_term: bool,
    stored_fields: Vec<String>,
    docvalue_fields: Vec<String>,
    fetch_source: FetchSourceContext,
    ext: BTreeMap<String, Value>,

    aggregations: Option<SearchContextAggregations>,
    suggest: Option<SuggestionSearchContext>,
    rescore: Vec<RescoreContext>,
    collapse: Option<CollapseContext>,
    highlight: Option<SearchHighlightContext>,
    inner_hits: Option<InnerHitsContext>,

    dfs_result: ResultSink<DfsSearchResult>,
    query_result: ResultSink<QuerySearchResult>,
    fetch_result: ResultSink<FetchSearchResult>,
    doc_ids_to_load: Vec<DocId>,
}

impl SearchContext {
    /// Create a context for `request` reading through `searcher`.
    ///
    /// Request options the source leaves unset take the configured
    /// defaults. Sub-phase sections are parsed by [`Self::pre_process`].
    pub fn new(request: ShardSearchRequest, searcher: IndexSearcher, config: SearchConfig) -> Self {
        let id = ContextId::new();
        let task = Arc::new(SearchTask::new(format!("{} {}", request.shard, id)));
        let source = request.source;

        let filters = FilterState {
            query: source.query.clone(),
            post_filter: source.post_filter.clone(),
            alias_filter: request.alias_filter,
            type_filter: request.type_filter,
        };

        let timeout = source
            .timeout_ms
            .map(Duration::from_millis)
            .or_else(|| config.default_timeout_duration());

        Self {
            lifecycle: Arc::new(ContextLifecycle {
                id,
                closed: AtomicBool::new(false),
                ledger: ReleasableLedger::new(),
                task,
            }),
            shard: request.shard,
            number_of_shards: request.number_of_shards,
            search_type: request.search_type,
            scroll: request.scroll_keep_alive_ms.map(Duration::from_millis),
            searcher,
            started: Instant::now(),

            filters,
            parsed_query: None,
            pre_processed: false,

            from: source.from.unwrap_or(0),
            size: source.size.unwrap_or(config.default_size),
            terminate_after: source.terminate_after.unwrap_or(config.default_terminate_after),
            timeout,
            track_total_hits: source
                .track_total_hits
                .unwrap_or(TrackTotalHits::UpTo(config.default_track_total_hits_up_to)),
            track_scores: source.track_scores,
            min_score: source.min_score,
            sort: source.sort.clone(),
            search_after: source.search_after.clone(),
            explain: source.explain,
            version: source.version,
            seq_no_primary_term: source.seq_no_primary_term,
            stored_fields: source.stored_fields.clone(),
            docvalue_fields: source.docvalue_fields.clone(),
            fetch_source: source.source.clone().map(FetchSourceContext::from).unwrap_or_default(),
            ext: source.ext.clone(),

            aggregations: None,
            suggest: None,
            rescore: Vec::new(),
            collapse: None,
            highlight: None,
            inner_hits: None,

            dfs_result: ResultSink::new("dfs"),
            query_result: ResultSink::new("query"),
            fetch_result: ResultSink::new("fetch"),
            doc_ids_to_load: Vec::new(),

            source,
            config,
        }
    }

    pub fn id(&self) -> ContextId {
        self.lifecycle.id
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    pub fn task(&self) -> &Arc<SearchTask> {
        &self.lifecycle.task
    }

    // Lifecycle

    /// Close the context and release every registered resource.
    ///
    /// Only the first call releases; it returns the aggregated release error,
    /// if any. Later calls return `Ok(())`.
    pub fn close(&self) -> Result<()> {
        self.lifecycle.close()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Register a resource to release when the context closes.
    ///
    /// On a closed context the resource is released right away and
    /// `ContextClosed` is returned.
    pub fn add_releasable(&self, releasable: Box<dyn Releasable>) -> Result<()> {
        self.lifecycle
            .ledger
            .register(releasable)
            .map_err(|_| SearchError::context_closed(self.id()))
    }

    /// Number of resources waiting for release
    pub fn pending_releasables(&self) -> usize {
        self.lifecycle.ledger.len()
    }

    // Cancellation and time

    /// True once the task was cancelled or the context closed
    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SearchError::context_closed(self.id()));
        }
        self.lifecycle.task.ensure_not_cancelled()
    }

    pub fn is_timed_out(&self) -> bool {
        self.timeout.is_some_and(|timeout| self.started.elapsed() >= timeout)
    }

    /// Milliseconds since the context was created
    pub fn relative_time_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    // Rescore bookkeeping

    /// Rescored doc ids of every rescorer that rescored something
    pub fn rescore_doc_ids(&self) -> RescoreDocIds {
        let map = self
            .rescore
            .iter()
            .enumerate()
            .filter_map(|(index, rescore)| rescore.rescored_docs().map(|docs| (index, docs.clone())))
            .collect();
        RescoreDocIds::new(map)
    }

    /// Hand rescored doc ids back to the rescorers; rescorers without an
    /// entry are left untouched
    pub fn assign_rescore_doc_ids(&mut self, doc_ids: &RescoreDocIds) {
        for (index, rescore) in self.rescore.iter_mut().enumerate() {
            if let Some(ids) = doc_ids.get_id(index) {
                rescore.set_rescored_docs(ids.clone());
            }
        }
    }

    // Request processing

    /// Parse the sub-phase sections, validate the request against the
    /// configured limits and build the final query.
    ///
    /// Sub-phase contexts that were set explicitly are kept.
    pub fn pre_process(&mut self, rewrite: bool) -> Result<()> {
        if self.pre_processed {
            return Ok(());
        }
        self.parse_source()?;
        self.validate()?;

        let query = self.filters.query.clone().unwrap_or(Query::MatchAll);
        let query = self.build_filtered_query(query);
        let query = if rewrite { query.rewrite() } else { query };
        if rewrite {
            self.filters.post_filter = self.filters.post_filter.take().map(Query::rewrite);
        }

        if self.config.enable_detailed_logging {
            debug!("[{}] pre-processed query: {}", self.id(), query);
        }
        self.parsed_query = Some(query);
        self.pre_processed = true;
        Ok(())
    }

    fn parse_source(&mut self) -> Result<()> {
        if self.aggregations.is_none() && !self.source.aggs.is_empty() {
            self.aggregations = Some(SearchContextAggregations::new(self.source.aggs.clone())?);
        }
        if self.suggest.is_none() {
            if let Some(suggest) = &self.source.suggest {
                self.suggest = Some(SuggestionSearchContext::new(suggest.clone())?);
            }
        }
        if self.rescore.is_empty() {
            self.rescore = self
                .source
                .rescore
                .iter()
                .cloned()
                .map(RescoreContext::new)
                .collect::<Result<_>>()?;
        }
        if self.collapse.is_none() {
            if let Some(collapse) = &self.source.collapse {
                self.collapse = Some(CollapseContext::new(collapse.clone())?);
            }
        }
        if self.highlight.is_none() {
            if let Some(highlight) = &self.source.highlight {
                self.highlight = Some(SearchHighlightContext::new(highlight.clone())?);
            }
        }
        let inner_hits = self.source.inner_hits.clone();
        for (name, spec) in inner_hits {
            let context = self.inner_hits();
            if !context.definitions().contains_key(&name) {
                context.add(name, spec)?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let max_window = self.config.max_result_window;
        match self.scroll {
            None => {
                let window = self.from.saturating_add(self.size);
                if window > max_window {
                    return Err(SearchError::invalid_input(
                        "from + size",
                        format!("result window is too large, from + size must be <= {} but was [{}]", max_window, window),
                        "Use search_after or a scroll to page through large result sets",
                    ));
                }
            }
            Some(_) => {
                if self.from > 0 {
                    return Err(SearchError::invalid_input(
                        "from",
                        "using [from] is not allowed in a scroll context",
                        "Remove [from] and page with the scroll instead",
                    ));
                }
                if self.size > max_window {
                    return Err(SearchError::invalid_input(
                        "size",
                        format!("batch size is too large, size must be <= {} but was [{}]", max_window, self.size),
                        "Lower the scroll batch size",
                    ));
                }
            }
        }

        if !self.rescore.is_empty() {
            if !is_score_sort(&self.sort) {
                return Err(SearchError::invalid_input(
                    "sort",
                    "cannot use [sort] option in conjunction with [rescore]",
                    "Remove the sort or the rescore section",
                ));
            }
            let max_rescore = self.config.max_rescore_window;
            if let Some(rescore) = self.rescore.iter().find(|r| r.window_size() > max_rescore) {
                return Err(SearchError::invalid_input(
                    "rescore.window_size",
                    format!(
                        "rescore window [{}] is too large, it must be <= {}",
                        rescore.window_size(),
                        max_rescore
                    ),
                    "Lower the rescore window_size",
                ));
            }
        }

        if let Some(search_after) = &self.search_after {
            let arity = self.sort.len().max(1);
            if search_after.len() != arity {
                return Err(SearchError::invalid_input(
                    "search_after",
                    format!(
                        "search_after has {} value(s) but sort has {}",
                        search_after.len(),
                        arity
                    ),
                    "Provide exactly one search_after value per sort field",
                ));
            }
            if self.from > 0 {
                return Err(SearchError::invalid_input(
                    "from",
                    "[from] parameter must be set to 0 when [search_after] is used",
                    "Remove [from] and page with search_after only",
                ));
            }
        }

        if self.collapse.is_some() {
            let conflict = if self.search_after.is_some() {
                Some("search_after")
            } else if !self.rescore.is_empty() {
                Some("rescore")
            } else if self.scroll.is_some() {
                Some("scroll")
            } else {
                None
            };
            if let Some(conflict) = conflict {
                return Err(SearchError::invalid_input(
                    "collapse",
                    format!("cannot use [collapse] in conjunction with [{}]", conflict),
                    "Remove the collapse section or the conflicting option",
                ));
            }
        }
        Ok(())
    }

    /// Wrap `query` with the alias and type filters
    pub fn build_filtered_query(&self, query: Query) -> Query {
        self.filters.build_filtered_query(query)
    }

    /// The request only asks for suggestions
    pub fn has_only_suggest(&self) -> bool {
        self.source.is_suggest_only()
    }

    pub fn is_pre_processed(&self) -> bool {
        self.pre_processed
    }

    /// The executed query once pre-processed, the request query before that
    pub fn query(&self) -> Option<&Query> {
        self.parsed_query.as_ref().or(self.filters.query.as_ref())
    }

    pub fn parsed_query(&self) -> Option<&Query> {
        self.parsed_query.as_ref()
    }

    pub fn post_filter(&self) -> Option<&Query> {
        self.filters.post_filter.as_ref()
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    /// `(field, term)` pairs of the executed query
    pub fn query_terms(&self) -> BTreeSet<(String, String)> {
        let mut terms = BTreeSet::new();
        if let Some(query) = self.query() {
            query.extract_terms(&mut terms);
        }
        terms
    }

    /// `(field, term)` pairs of the request query, without the alias and
    /// type filters
    pub fn highlight_terms(&self) -> BTreeSet<(String, String)> {
        let mut terms = BTreeSet::new();
        if let Some(query) = self.filters.query.as_ref() {
            query.extract_terms(&mut terms);
        }
        terms
    }

    // Request state

    pub fn shard_target(&self) -> &ShardTarget {
        &self.shard
    }

    pub fn number_of_shards(&self) -> u32 {
        self.number_of_shards
    }

    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    pub fn scroll(&self) -> Option<Duration> {
        self.scroll
    }

    pub fn searcher(&self) -> &IndexSearcher {
        &self.searcher
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn source(&self) -> &SearchSource {
        &self.source
    }

    pub fn from(&self) -> usize {
        self.from
    }

    pub fn set_from(&mut self, from: usize) {
        self.from = from;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    pub fn terminate_after(&self) -> usize {
        self.terminate_after
    }

    pub fn set_terminate_after(&mut self, terminate_after: usize) {
        self.terminate_after = terminate_after;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn track_total_hits(&self) -> TrackTotalHits {
        self.track_total_hits
    }

    pub fn set_track_total_hits(&mut self, track: TrackTotalHits) {
        self.track_total_hits = track;
    }

    pub fn track_scores(&self) -> bool {
        self.track_scores
    }

    pub fn set_track_scores(&mut self, track: bool) {
        self.track_scores = track;
    }

    pub fn min_score(&self) -> Option<f32> {
        self.min_score
    }

    pub fn set_min_score(&mut self, min_score: Option<f32>) {
        self.min_score = min_score;
    }

    pub fn sort(&self) -> &[SortField] {
        &self.sort
    }

    pub fn set_sort(&mut self, sort: Vec<SortField>) {
        self.sort = sort;
    }

    /// The sort the query phase applies: relevance when none was requested
    pub fn effective_sort(&self) -> Vec<SortField> {
        if self.sort.is_empty() {
            vec![SortField {
                field: sort_fields::SCORE.to_string(),
                order: None,
            }]
        } else {
            self.sort.clone()
        }
    }

    pub fn search_after(&self) -> Option<&[SortValue]> {
        self.search_after.as_deref()
    }

    pub fn set_search_after(&mut self, search_after: Option<Vec<SortValue>>) {
        self.search_after = search_after;
    }

    pub fn explain(&self) -> bool {
        self.explain
    }

    pub fn set_explain(&mut self, explain: bool) {
        self.explain = explain;
    }

    pub fn version(&self) -> bool {
        self.version
    }

    pub fn set_version(&mut self, version: bool) {
        self.version = version;
    }

    pub fn seq_no_and_primary_term(&self) -> bool {
        self.seq_no_primary_term
    }

    pub fn set_seq_no_and_primary_term(&mut self, enabled: bool) {
        self.seq_no_primary_term = enabled;
    }

    pub fn stored_fields(&self) -> &[String] {
        &self.stored_fields
    }

    pub fn set_stored_fields(&mut self, fields: Vec<String>) {
        self.stored_fields = fields;
    }

    pub fn docvalue_fields(&self) -> &[String] {
        &self.docvalue_fields
    }

    pub fn set_docvalue_fields(&mut self, fields: Vec<String>) {
        self.docvalue_fields = fields;
    }

    pub fn fetch_source(&self) -> &FetchSourceContext {
        &self.fetch_source
    }

    pub fn set_fetch_source(&mut self, fetch_source: FetchSourceContext) {
        self.fetch_source = fetch_source;
    }

    pub fn search_extension(&self, name: &str) -> Option<&Value> {
        self.ext.get(name)
    }

    pub fn add_search_extension(&mut self, name: impl Into<String>, value: Value) {
        self.ext.insert(name.into(), value);
    }

    // Sub-phases

    pub fn aggregations(&self) -> Option<&SearchContextAggregations> {
        self.aggregations.as_ref()
    }

    pub fn set_aggregations(&mut self, aggregations: Option<SearchContextAggregations>) {
        self.aggregations = aggregations;
    }

    pub fn suggest(&self) -> Option<&SuggestionSearchContext> {
        self.suggest.as_ref()
    }

    pub fn set_suggest(&mut self, suggest: Option<SuggestionSearchContext>) {
        self.suggest = suggest;
    }

    pub fn rescore(&self) -> &[RescoreContext] {
        &self.rescore
    }

    pub fn rescore_mut(&mut self) -> &mut [RescoreContext] {
        &mut self.rescore
    }

    pub fn add_rescore(&mut self, rescore: RescoreContext) {
        self.rescore.push(rescore);
    }

    pub fn collapse(&self) -> Option<&CollapseContext> {
        self.collapse.as_ref()
    }

    pub fn set_collapse(&mut self, collapse: Option<CollapseContext>) {
        self.collapse = collapse;
    }

    pub fn highlight(&self) -> Option<&SearchHighlightContext> {
        self.highlight.as_ref()
    }

    pub fn set_highlight(&mut self, highlight: Option<SearchHighlightContext>) {
        self.highlight = highlight;
    }

    /// Inner hits, created on first access
    pub fn inner_hits(&mut self) -> &mut InnerHitsContext {
        self.inner_hits.get_or_insert_with(InnerHitsContext::new)
    }

    /// Inner hits if any were ever requested
    pub fn existing_inner_hits(&self) -> Option<&InnerHitsContext> {
        self.inner_hits.as_ref()
    }

    // Results

    pub fn dfs_result(&self) -> &ResultSink<DfsSearchResult> {
        &self.dfs_result
    }

    pub fn dfs_result_mut(&mut self) -> &mut ResultSink<DfsSearchResult> {
        &mut self.dfs_result
    }

    pub fn query_result(&self) -> &ResultSink<QuerySearchResult> {
        &self.query_result
    }

    pub fn query_result_mut(&mut self) -> &mut ResultSink<QuerySearchResult> {
        &mut self.query_result
    }

    pub fn fetch_result(&self) -> &ResultSink<FetchSearchResult> {
        &self.fetch_result
    }

    pub fn fetch_result_mut(&mut self) -> &mut ResultSink<FetchSearchResult> {
        &mut self.fetch_result
    }

    pub fn doc_ids_to_load(&self) -> &[DocId] {
        &self.doc_ids_to_load
    }

    pub fn set_doc_ids_to_load(&mut self, doc_ids: Vec<DocId>) {
        self.doc_ids_to_load = doc_ids;
    }
}

impl Display for SearchContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shard)?;
        if self.search_type != SearchType::default() {
            write!(f, " searchType=[{}]", self.search_type)?;
        }
        if let Some(scroll) = self.scroll {
            write!(f, " scroll=[{}ms]", scroll.as_millis())?;
        }
        match self.query() {
            Some(query) => write!(f, " query=[{}]", query),
            None => write!(f, " query=[*:*]"),
        }
    }
}

impl Drop for SearchContext {
    fn drop(&mut self) {
        if let Err(e) = self.lifecycle.close() {
            warn!("Failed to release resources of search context {}: {}", self.id(), e);
        }
    }
}
