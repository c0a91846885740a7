//! Field collapsing
//!
//! Keeps only the best hit per value of a field. Hits must arrive in their
//! final order; the first hit of every group wins. Documents without a value
//! for the field all fall into one null group.

use crate::error::SearchError;
use crate::index::IndexSearcher;
use crate::results::ScoreDoc;
use crate::Result;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapseSpec {
    pub field: String,
}

impl CollapseSpec {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollapseContext {
    spec: CollapseSpec,
}

impl CollapseContext {
    pub fn new(spec: CollapseSpec) -> Result<Self> {
        if spec.field.is_empty() {
            return Err(SearchError::invalid_input(
                "collapse.field",
                "field must not be empty",
                "Name a single-valued keyword or numeric field to collapse on",
            ));
        }
        Ok(Self { spec })
    }

    pub fn field(&self) -> &str {
        &self.spec.field
    }

    pub fn collapse(&self, hits: Vec<ScoreDoc>, searcher: &IndexSearcher) -> Vec<ScoreDoc> {
        let mut seen: FxHashSet<Option<String>> = FxHashSet::default();
        let mut kept = Vec::with_capacity(hits.len());

        for mut hit in hits {
            let key = searcher
                .doc(hit.doc)
                .and_then(|doc| doc.keyword_values(&self.spec.field).into_iter().next());
            if seen.insert(key.clone()) {
                hit.collapse_value = key;
                kept.push(hit);
            }
        }
        kept
    }
}
