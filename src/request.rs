//! Search requests
//!
//! [`SearchSource`] is the JSON body of a search. [`ShardSearchRequest`]
//! wraps it with everything the shard needs to know about where the request
//! came from: the targeted shard, the search type, alias and type filters and
//! an optional scroll keep-alive.

use crate::aggregations::AggregationSpec;
use crate::collapse::CollapseSpec;
use crate::constants::DEFAULT_TRACK_TOTAL_HITS_UP_TO;
use crate::error::SearchError;
use crate::fetch_source::FetchSourceSpec;
use crate::highlight::HighlightSpec;
use crate::identifiers::ShardTarget;
use crate::inner_hits::InnerHitsSpec;
use crate::query::Query;
use crate::rescore::RescoreSpec;
use crate::sort::{SortField, SortValue};
use crate::suggest::SuggestSpec;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    #[default]
    QueryThenFetch,
    /// Collect term statistics first so that scores are comparable across shards
    DfsQueryThenFetch,
}

impl Display for SearchType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SearchType::QueryThenFetch => write!(f, "QUERY_THEN_FETCH"),
            SearchType::DfsQueryThenFetch => write!(f, "DFS_QUERY_THEN_FETCH"),
        }
    }
}

/// How precisely the total hit count is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TrackTotalHitsRepr", into = "TrackTotalHitsRepr")]
pub enum TrackTotalHits {
    Disabled,
    Accurate,
    /// Count accurately up to the bound, then report a lower bound
    UpTo(usize),
}

impl Default for TrackTotalHits {
    fn default() -> Self {
        TrackTotalHits::UpTo(DEFAULT_TRACK_TOTAL_HITS_UP_TO)
    }
}

/// JSON form of [`TrackTotalHits`]: `true`, `false` or a bound
#[doc(hidden)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackTotalHitsRepr {
    Flag(bool),
    Bound(usize),
}

impl From<TrackTotalHitsRepr> for TrackTotalHits {
    fn from(repr: TrackTotalHitsRepr) -> Self {
        match repr {
            TrackTotalHitsRepr::Flag(true) => TrackTotalHits::Accurate,
            TrackTotalHitsRepr::Flag(false) => TrackTotalHits::Disabled,
            TrackTotalHitsRepr::Bound(bound) => TrackTotalHits::UpTo(bound),
        }
    }
}

impl From<TrackTotalHits> for TrackTotalHitsRepr {
    fn from(track: TrackTotalHits) -> Self {
        match track {
            TrackTotalHits::Accurate => TrackTotalHitsRepr::Flag(true),
            TrackTotalHits::Disabled => TrackTotalHitsRepr::Flag(false),
            TrackTotalHits::UpTo(bound) => TrackTotalHitsRepr::Bound(bound),
        }
    }
}

/// The body of a search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_filter: Option<Query>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(alias = "aggregations", skip_serializing_if = "BTreeMap::is_empty")]
    pub aggs: BTreeMap<String, AggregationSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggest: Option<SuggestSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rescore: Vec<RescoreSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse: Option<CollapseSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<HighlightSpec>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub inner_hits: BTreeMap<String, InnerHitsSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_after: Option<Vec<SortValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminate_after: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_total_hits: Option<TrackTotalHits>,
    pub track_scores: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
    pub explain: bool,
    pub version: bool,
    pub seq_no_primary_term: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stored_fields: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docvalue_fields: Vec<String>,
    #[serde(rename = "_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<FetchSourceSpec>,
    /// Opaque plugin extensions, carried through untouched
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ext: BTreeMap<String, Value>,
}

impl SearchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON search body
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SearchError::QueryParsing(format!("invalid search source: {}", e)))
    }

    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn post_filter(mut self, filter: Query) -> Self {
        self.post_filter = Some(filter);
        self
    }

    pub fn from(mut self, from: usize) -> Self {
        self.from = Some(from);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn aggregation(mut self, name: impl Into<String>, spec: AggregationSpec) -> Self {
        self.aggs.insert(name.into(), spec);
        self
    }

    pub fn suggest(mut self, suggest: SuggestSpec) -> Self {
        self.suggest = Some(suggest);
        self
    }

    pub fn rescore(mut self, rescore: RescoreSpec) -> Self {
        self.rescore.push(rescore);
        self
    }

    pub fn collapse(mut self, collapse: CollapseSpec) -> Self {
        self.collapse = Some(collapse);
        self
    }

    pub fn highlight(mut self, highlight: HighlightSpec) -> Self {
        self.highlight = Some(highlight);
        self
    }

    pub fn inner_hits(mut self, name: impl Into<String>, spec: InnerHitsSpec) -> Self {
        self.inner_hits.insert(name.into(), spec);
        self
    }

    pub fn sort(mut self, field: SortField) -> Self {
        self.sort.push(field);
        self
    }

    pub fn search_after(mut self, values: Vec<SortValue>) -> Self {
        self.search_after = Some(values);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn terminate_after(mut self, terminate_after: usize) -> Self {
        self.terminate_after = Some(terminate_after);
        self
    }

    pub fn track_total_hits(mut self, track: TrackTotalHits) -> Self {
        self.track_total_hits = Some(track);
        self
    }

    pub fn track_scores(mut self, track: bool) -> Self {
        self.track_scores = track;
        self
    }

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn version(mut self, version: bool) -> Self {
        self.version = version;
        self
    }

    pub fn seq_no_primary_term(mut self, enabled: bool) -> Self {
        self.seq_no_primary_term = enabled;
        self
    }

    pub fn stored_field(mut self, field: impl Into<String>) -> Self {
        self.stored_fields.push(field.into());
        self
    }

    pub fn docvalue_field(mut self, field: impl Into<String>) -> Self {
        self.docvalue_fields.push(field.into());
        self
    }

    pub fn fetch_source(mut self, source: FetchSourceSpec) -> Self {
        self.source = Some(source);
        self
    }

    pub fn ext(mut self, name: impl Into<String>, value: Value) -> Self {
        self.ext.insert(name.into(), value);
        self
    }

    /// A suggest section and nothing that would need document collection
    pub fn is_suggest_only(&self) -> bool {
        self.suggest.is_some()
            && self.query.is_none()
            && self.post_filter.is_none()
            && self.aggs.is_empty()
            && self.rescore.is_empty()
    }
}

/// A search request as executed on one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSearchRequest {
    pub shard: ShardTarget,
    pub number_of_shards: u32,
    #[serde(default)]
    pub search_type: SearchType,
    #[serde(default)]
    pub source: SearchSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_filter: Option<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_filter: Option<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_keep_alive_ms: Option<u64>,
}

impl ShardSearchRequest {
    pub fn new(shard: ShardTarget, source: SearchSource) -> Self {
        Self {
            shard,
            number_of_shards: 1,
            search_type: SearchType::default(),
            source,
            alias_filter: None,
            type_filter: None,
            scroll_keep_alive_ms: None,
        }
    }

    pub fn number_of_shards(mut self, number_of_shards: u32) -> Self {
        self.number_of_shards = number_of_shards;
        self
    }

    pub fn search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn alias_filter(mut self, filter: Query) -> Self {
        self.alias_filter = Some(filter);
        self
    }

    pub fn type_filter(mut self, filter: Query) -> Self {
        self.type_filter = Some(filter);
        self
    }

    pub fn scroll(mut self, keep_alive: Duration) -> Self {
        self.scroll_keep_alive_ms = Some(keep_alive.as_millis() as u64);
        self
    }
}
