//! Inner hits
//!
//! An inner hits definition joins every top-level hit with the other
//! documents of the shard that share its value for a join field, optionally
//! narrowed by a query. The context is created lazily the first time a
//! definition is added.

use crate::error::SearchError;
use crate::index::DocId;
use crate::query::{Query, Scorer};
use crate::results::SearchHit;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

fn default_size() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerHitsSpec {
    /// Join field
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_size")]
    pub size: usize,
}

impl InnerHitsSpec {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            query: None,
            from: 0,
            size: default_size(),
        }
    }

    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InnerHitsContext {
    definitions: BTreeMap<String, InnerHitsSpec>,
}

impl InnerHitsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, spec: InnerHitsSpec) -> Result<()> {
        let name = name.into();
        if spec.field.is_empty() {
            return Err(SearchError::invalid_input(
                format!("inner_hits.{}.field", name),
                "join field must not be empty",
                "Name the field that links inner documents to their hit",
            ));
        }
        if self.definitions.contains_key(&name) {
            return Err(SearchError::invalid_input(
                "inner_hits",
                format!("[{}] already defined", name),
                "Use a unique name for every inner hits definition",
            ));
        }
        let spec = InnerHitsSpec {
            query: spec.query.map(Query::rewrite),
            ..spec
        };
        self.definitions.insert(name, spec);
        Ok(())
    }

    pub fn definitions(&self) -> &BTreeMap<String, InnerHitsSpec> {
        &self.definitions
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Inner hits of `hit_doc` for every definition
    pub fn fetch(&self, hit_doc: DocId, scorer: &Scorer) -> BTreeMap<String, Vec<SearchHit>> {
        let mut out = BTreeMap::new();
        let Some(parent) = scorer.doc(hit_doc) else {
            return out;
        };

        for (name, spec) in &self.definitions {
            let keys = parent.keyword_values(&spec.field);
            let mut matched: Vec<(DocId, f32)> = Vec::new();
            if !keys.is_empty() {
                for doc_id in 0..scorer.searcher().max_doc() {
                    if doc_id == hit_doc {
                        continue;
                    }
                    let Some(doc) = scorer.doc(doc_id) else { continue };
                    if !doc.keyword_values(&spec.field).iter().any(|value| keys.contains(value)) {
                        continue;
                    }
                    let score = match &spec.query {
                        Some(query) => match query.score(scorer, doc) {
                            Some(score) => score,
                            None => continue,
                        },
                        None => 1.0,
                    };
                    matched.push((doc_id, score));
                }
            }
            matched.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });

            let hits = matched
                .into_iter()
                .skip(spec.from)
                .take(spec.size)
                .filter_map(|(doc_id, score)| {
                    scorer.doc(doc_id).map(|doc| {
                        let mut hit = SearchHit::new(doc_id, doc.id.clone(), score);
                        hit.source = Some(Value::Object(doc.source.clone()));
                        hit
                    })
                })
                .collect();
            out.insert(name.clone(), hits);
        }
        out
    }
}
