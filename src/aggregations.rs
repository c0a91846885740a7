//! Aggregations collected during the query phase
//!
//! Aggregations see every document that matched the query (and `min_score`)
//! before the post filter is applied.

use crate::error::SearchError;
use crate::index::StoredDocument;
use crate::Result;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_terms_size() -> usize {
    10
}

/// One requested aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationSpec {
    /// Bucket documents by the keyword values of a field
    Terms {
        field: String,
        #[serde(default = "default_terms_size")]
        size: usize,
    },
    /// count, min, max, avg and sum of the numeric values of a field
    Stats { field: String },
    /// Number of values of a field
    ValueCount { field: String },
}

impl AggregationSpec {
    pub fn terms(field: impl Into<String>, size: usize) -> Self {
        Self::Terms {
            field: field.into(),
            size,
        }
    }

    pub fn stats(field: impl Into<String>) -> Self {
        Self::Stats { field: field.into() }
    }

    pub fn value_count(field: impl Into<String>) -> Self {
        Self::ValueCount { field: field.into() }
    }

    fn field(&self) -> &str {
        match self {
            AggregationSpec::Terms { field, .. }
            | AggregationSpec::Stats { field }
            | AggregationSpec::ValueCount { field } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsBucket {
    pub key: String,
    pub doc_count: u64,
}

/// Aggregation output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationResult {
    Terms {
        buckets: Vec<TermsBucket>,
        sum_other_doc_count: u64,
    },
    Stats {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        sum: f64,
    },
    ValueCount {
        value: u64,
    },
}

/// Aggregation results by name
pub type AggregationResults = BTreeMap<String, AggregationResult>;

/// The aggregations configured on a search context
#[derive(Debug, Clone, PartialEq)]
pub struct SearchContextAggregations {
    specs: BTreeMap<String, AggregationSpec>,
}

impl SearchContextAggregations {
    pub fn new(specs: BTreeMap<String, AggregationSpec>) -> Result<Self> {
        for (name, spec) in &specs {
            if name.is_empty() {
                return Err(SearchError::invalid_input(
                    "aggs",
                    "aggregation name must not be empty",
                    "Give every aggregation a unique, non-empty name",
                ));
            }
            if spec.field().is_empty() {
                return Err(SearchError::invalid_input(
                    format!("aggs.{}.field", name),
                    "field must not be empty",
                    "Name the field to aggregate on",
                ));
            }
            if let AggregationSpec::Terms { size: 0, .. } = spec {
                return Err(SearchError::invalid_input(
                    format!("aggs.{}.size", name),
                    "size must be greater than 0",
                    "Request at least one bucket",
                ));
            }
        }
        Ok(Self { specs })
    }

    pub fn specs(&self) -> &BTreeMap<String, AggregationSpec> {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Start a fresh collection pass
    pub fn collector(&self) -> AggregationCollector<'_> {
        let states = self
            .specs
            .iter()
            .map(|(name, spec)| {
                let state = match spec {
                    AggregationSpec::Terms { .. } => CollectorState::Terms(FxHashMap::default()),
                    AggregationSpec::Stats { .. } => CollectorState::Stats(StatsState::default()),
                    AggregationSpec::ValueCount { .. } => CollectorState::ValueCount(0),
                };
                (name.as_str(), spec, state)
            })
            .collect();
        AggregationCollector { states }
    }
}

#[derive(Debug, Default)]
struct StatsState {
    count: u64,
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
}

#[derive(Debug)]
enum CollectorState {
    Terms(FxHashMap<String, u64>),
    Stats(StatsState),
    ValueCount(u64),
}

/// Accumulates aggregation state over the matching documents
#[derive(Debug)]
pub struct AggregationCollector<'a> {
    states: Vec<(&'a str, &'a AggregationSpec, CollectorState)>,
}

impl AggregationCollector<'_> {
    pub fn collect(&mut self, doc: &StoredDocument) {
        for (_, spec, state) in self.states.iter_mut() {
            match state {
                CollectorState::Terms(counts) => {
                    let mut keys = doc.keyword_values(spec.field());
                    keys.sort();
                    keys.dedup();
                    for key in keys {
                        *counts.entry(key).or_insert(0) += 1;
                    }
                }
                CollectorState::Stats(stats) => {
                    for value in doc.numeric_values(spec.field()) {
                        stats.count += 1;
                        stats.sum += value;
                        stats.min = Some(stats.min.map_or(value, |min| min.min(value)));
                        stats.max = Some(stats.max.map_or(value, |max| max.max(value)));
                    }
                }
                CollectorState::ValueCount(count) => {
                    *count += doc.keyword_values(spec.field()).len() as u64;
                }
            }
        }
    }

    pub fn finish(self) -> AggregationResults {
        self.states
            .into_iter()
            .map(|(name, spec, state)| {
                let result = match state {
                    CollectorState::Terms(counts) => {
                        let size = match spec {
                            AggregationSpec::Terms { size, .. } => *size,
                            _ => default_terms_size(),
                        };
                        let mut buckets: Vec<TermsBucket> = counts
                            .into_iter()
                            .map(|(key, doc_count)| TermsBucket { key, doc_count })
                            .collect();
                        buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.key.cmp(&b.key)));
                        let sum_other_doc_count = buckets.iter().skip(size).map(|b| b.doc_count).sum();
                        buckets.truncate(size);
                        AggregationResult::Terms {
                            buckets,
                            sum_other_doc_count,
                        }
                    }
                    CollectorState::Stats(stats) => AggregationResult::Stats {
                        count: stats.count,
                        min: stats.min,
                        max: stats.max,
                        avg: (stats.count > 0).then(|| stats.sum / stats.count as f64),
                        sum: stats.sum,
                    },
                    CollectorState::ValueCount(value) => AggregationResult::ValueCount { value },
                };
                (name.to_string(), result)
            })
            .collect()
    }
}
