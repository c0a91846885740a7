//! Result sinks populated by the search phases
//!
//! Each phase writes its result exactly once into a [`ResultSink`] held by
//! the search context; the response assembler reads them afterwards.

use crate::aggregations::AggregationResults;
use crate::error::SearchError;
use crate::identifiers::{ContextId, ShardTarget};
use crate::index::{DocId, TermStatistics};
use crate::query::Explanation;
use crate::rescore::RescoreDocIds;
use crate::sort::SortValue;
use crate::suggest::SuggestResults;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A scored hit reference produced by the query phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDoc {
    pub doc: DocId,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_values: Vec<SortValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapse_value: Option<String>,
}

impl ScoreDoc {
    pub fn new(doc: DocId, score: f32) -> Self {
        Self {
            doc,
            score,
            sort_values: Vec::new(),
            collapse_value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TotalHitsRelation {
    #[serde(rename = "eq")]
    EqualTo,
    #[serde(rename = "gte")]
    GreaterThanOrEqualTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalHits {
    pub value: u64,
    pub relation: TotalHitsRelation,
}

impl TotalHits {
    pub fn exact(value: u64) -> Self {
        Self {
            value,
            relation: TotalHitsRelation::EqualTo,
        }
    }

    pub fn lower_bound(value: u64) -> Self {
        Self {
            value,
            relation: TotalHitsRelation::GreaterThanOrEqualTo,
        }
    }
}

/// Term statistics gathered by the DFS phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DfsSearchResult {
    pub context_id: ContextId,
    pub shard: ShardTarget,
    pub max_doc: u64,
    /// field -> term -> statistics
    pub term_statistics: BTreeMap<String, BTreeMap<String, TermStatistics>>,
}

impl DfsSearchResult {
    pub fn statistics_for(&self, field: &str, term: &str) -> Option<TermStatistics> {
        self.term_statistics.get(field).and_then(|terms| terms.get(term)).copied()
    }
}

/// Output of the query phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySearchResult {
    pub context_id: ContextId,
    pub shard: ShardTarget,
    pub from: usize,
    pub size: usize,
    /// The requested page of hits
    pub top_docs: Vec<ScoreDoc>,
    /// `None` when total hit tracking is disabled
    pub total_hits: Option<TotalHits>,
    pub max_score: Option<f32>,
    pub aggregations: Option<AggregationResults>,
    pub suggest: Option<SuggestResults>,
    pub timed_out: bool,
    pub terminated_early: Option<bool>,
    #[serde(default)]
    pub rescore_doc_ids: RescoreDocIds,
}

impl QuerySearchResult {
    pub fn empty(context_id: ContextId, shard: ShardTarget, from: usize, size: usize) -> Self {
        Self {
            context_id,
            shard,
            from,
            size,
            top_docs: Vec::new(),
            total_hits: None,
            max_score: None,
            aggregations: None,
            suggest: None,
            timed_out: false,
            terminated_early: None,
            rescore_doc_ids: RescoreDocIds::empty(),
        }
    }
}

/// A fully loaded hit produced by the fetch phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc: DocId,
    pub id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub highlight: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inner_hits: BTreeMap<String, Vec<SearchHit>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_values: Vec<SortValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_term: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}

impl SearchHit {
    pub fn new(doc: DocId, id: impl Into<String>, score: f32) -> Self {
        Self {
            doc,
            id: id.into(),
            score,
            source: None,
            fields: BTreeMap::new(),
            highlight: BTreeMap::new(),
            inner_hits: BTreeMap::new(),
            sort_values: Vec::new(),
            version: None,
            seq_no: None,
            primary_term: None,
            explanation: None,
        }
    }
}

/// Output of the fetch phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSearchResult {
    pub context_id: ContextId,
    pub shard: ShardTarget,
    pub hits: Vec<SearchHit>,
}

/// Write-once holder for a phase result
#[derive(Debug, Clone)]
pub struct ResultSink<T> {
    phase: &'static str,
    value: Option<T>,
    written: bool,
}

impl<T> ResultSink<T> {
    pub fn new(phase: &'static str) -> Self {
        Self {
            phase,
            value: None,
            written: false,
        }
    }

    /// Store the phase result; fails if the sink was written before
    pub fn set(&mut self, value: T) -> Result<()> {
        if self.written {
            return Err(SearchError::result_already_set(self.phase));
        }
        self.written = true;
        self.value = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Move the result out. The sink stays written.
    pub fn take(&mut self) -> Option<T> {
        self.value.take()
    }

    pub fn is_set(&self) -> bool {
        self.written
    }

    pub fn phase(&self) -> &'static str {
        self.phase
    }
}

/// Everything one shard produced for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSearchResponse {
    pub context_id: ContextId,
    pub shard: ShardTarget,
    pub took_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dfs: Option<DfsSearchResult>,
    pub query: QuerySearchResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch: Option<FetchSearchResult>,
}

impl ShardSearchResponse {
    /// Fetched hits, empty when the fetch phase did not run
    pub fn hits(&self) -> &[SearchHit] {
        self.fetch.as_ref().map(|f| f.hits.as_slice()).unwrap_or(&[])
    }

    pub fn hit_ids(&self) -> Vec<&str> {
        self.hits().iter().map(|hit| hit.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_sink_is_write_once() {
        let mut sink: ResultSink<u32> = ResultSink::new("query");
        assert!(!sink.is_set());
        sink.set(1).unwrap();
        assert_eq!(sink.get(), Some(&1));

        match sink.set(2) {
            Err(SearchError::ResultAlreadySet { phase }) => assert_eq!(phase, "query"),
            other => panic!("expected ResultAlreadySet, got {other:?}"),
        }
        assert_eq!(sink.get(), Some(&1));
    }

    #[test]
    fn test_result_sink_take_keeps_written() {
        let mut sink: ResultSink<&str> = ResultSink::new("fetch");
        sink.set("hits").unwrap();
        assert_eq!(sink.take(), Some("hits"));
        assert!(sink.get().is_none());
        assert!(sink.is_set());
        assert!(sink.set("again").is_err());
    }

    #[test]
    fn test_total_hits_json() {
        let json = serde_json::to_string(&TotalHits::lower_bound(10)).unwrap();
        assert_eq!(json, r#"{"value":10,"relation":"gte"}"#);
    }

    #[test]
    fn test_response_hits_without_fetch() {
        let response = ShardSearchResponse {
            context_id: ContextId::new(),
            shard: ShardTarget::new("i", 0),
            took_ms: 0,
            dfs: None,
            query: QuerySearchResult::empty(ContextId::new(), ShardTarget::new("i", 0), 0, 0),
            fetch: None,
        };
        assert!(response.hits().is_empty());
        assert!(response.hit_ids().is_empty());
    }
}
