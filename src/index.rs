//! In-memory shard index and point-in-time searchers
//!
//! A [`ShardIndex`] stores JSON documents together with the per-field term
//! frequencies and term statistics the phases need for matching and scoring.
//! Once built it is frozen behind an `Arc` and read through
//! [`IndexSearcher`] handles. Every acquired searcher comes with a
//! [`SearcherLease`] that must be released, which is what search contexts
//! register in their releasable ledger.

use crate::error::SearchError;
use crate::identifiers::ShardTarget;
use crate::releasable::Releasable;
use crate::Result;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shard-local document number
pub type DocId = u32;

/// Split text into lowercase alphanumeric tokens
pub fn analyze(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Byte ranges of the tokens `analyze` produces, in order
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (offset, c) in text.char_indices() {
        match (c.is_alphanumeric(), start) {
            (true, None) => start = Some(offset),
            (false, Some(begin)) => {
                spans.push((begin, offset));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(begin) = start {
        spans.push((begin, text.len()));
    }
    spans
}

/// Frequency statistics of a term within one field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermStatistics {
    /// Number of documents containing the term
    pub doc_freq: u64,
    /// Total number of occurrences across all documents
    pub total_term_freq: u64,
}

/// A document as stored in the shard
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub source: Map<String, Value>,
    pub version: u64,
    pub seq_no: u64,
    pub primary_term: u64,
    term_freqs: FxHashMap<String, FxHashMap<String, u32>>,
}

impl StoredDocument {
    fn new(id: String, source: Map<String, Value>, version: u64, seq_no: u64, primary_term: u64) -> Self {
        let mut flattened = Vec::new();
        for (key, value) in &source {
            flatten_strings(key, value, &mut flattened);
        }

        let mut term_freqs: FxHashMap<String, FxHashMap<String, u32>> = FxHashMap::default();
        for (field, text) in flattened {
            let freqs = term_freqs.entry(field).or_default();
            for token in analyze(text) {
                *freqs.entry(token).or_insert(0) += 1;
            }
        }

        Self {
            id,
            source,
            version,
            seq_no,
            primary_term,
            term_freqs,
        }
    }

    /// Number of times `term` occurs in the analyzed `field`
    pub fn term_freq(&self, field: &str, term: &str) -> u32 {
        self.term_freqs
            .get(field)
            .and_then(|freqs| freqs.get(term))
            .copied()
            .unwrap_or(0)
    }

    /// All raw values at a dotted field path, with arrays flattened
    pub fn values(&self, field: &str) -> Vec<&Value> {
        let mut out = Vec::new();
        let mut segments = field.split('.');
        if let Some(first) = segments.next() {
            if let Some(value) = self.source.get(first) {
                let rest: Vec<&str> = segments.collect();
                collect_path(value, &rest, &mut out);
            }
        }
        out
    }

    /// Field values rendered as exact keywords
    pub fn keyword_values(&self, field: &str) -> Vec<String> {
        self.values(field)
            .into_iter()
            .filter_map(|value| match value {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Numeric field values; numeric strings are parsed
    pub fn numeric_values(&self, field: &str) -> Vec<f64> {
        self.values(field)
            .into_iter()
            .filter_map(|value| match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            })
            .collect()
    }

    /// String values of a field, used by highlighting
    pub fn text_values(&self, field: &str) -> Vec<&str> {
        self.values(field).into_iter().filter_map(Value::as_str).collect()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.values(field).iter().any(|value| !value.is_null())
    }
}

fn flatten_strings<'a>(path: &str, value: &'a Value, out: &mut Vec<(String, &'a str)>) {
    match value {
        Value::String(s) => out.push((path.to_string(), s.as_str())),
        Value::Array(items) => {
            for item in items {
                flatten_strings(path, item, out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                flatten_strings(&format!("{}.{}", path, key), child, out);
            }
        }
        _ => {}
    }
}

fn collect_path<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_path(item, rest, out);
            }
        }
        _ if rest.is_empty() => out.push(value),
        Value::Object(map) => {
            if let Some(child) = map.get(rest[0]) {
                collect_path(child, &rest[1..], out);
            }
        }
        _ => {}
    }
}

/// In-memory index of one shard
#[derive(Debug)]
pub struct ShardIndex {
    target: ShardTarget,
    primary_term: u64,
    documents: Vec<StoredDocument>,
    id_lookup: FxHashMap<String, DocId>,
    term_stats: FxHashMap<String, BTreeMap<String, TermStatistics>>,
    next_seq_no: u64,
    open_searchers: AtomicUsize,
}

impl ShardIndex {
    pub fn new(target: ShardTarget) -> Self {
        Self {
            target,
            primary_term: 1,
            documents: Vec::new(),
            id_lookup: FxHashMap::default(),
            term_stats: FxHashMap::default(),
            next_seq_no: 0,
            open_searchers: AtomicUsize::new(0),
        }
    }

    pub fn target(&self) -> &ShardTarget {
        &self.target
    }

    /// Index a JSON object under `id`.
    ///
    /// Re-indexing an existing id replaces the document in place and bumps
    /// its version.
    pub fn index_document(&mut self, id: impl Into<String>, source: Value) -> Result<DocId> {
        let id = id.into();
        if id.is_empty() {
            return Err(SearchError::invalid_input(
                "id",
                "document id must not be empty",
                "Provide a non-empty document id",
            ));
        }
        let source = match source {
            Value::Object(map) => map,
            other => {
                return Err(SearchError::invalid_input(
                    "source",
                    format!("expected a JSON object, got {}", json_type_name(&other)),
                    "Index documents as JSON objects",
                ))
            }
        };

        let seq_no = self.next_seq_no;
        self.next_seq_no += 1;

        match self.id_lookup.get(&id).copied() {
            Some(doc_id) => {
                let previous_version = self.documents[doc_id as usize].version;
                let document = StoredDocument::new(id, source, previous_version + 1, seq_no, self.primary_term);
                let previous = std::mem::replace(&mut self.documents[doc_id as usize], document);
                self.remove_stats(&previous);
                let current = self.documents[doc_id as usize].term_freqs.clone();
                self.add_stats(&current);
                Ok(doc_id)
            }
            None => {
                let doc_id = self.documents.len() as DocId;
                let document = StoredDocument::new(id.clone(), source, 1, seq_no, self.primary_term);
                let freqs = document.term_freqs.clone();
                self.documents.push(document);
                self.id_lookup.insert(id, doc_id);
                self.add_stats(&freqs);
                Ok(doc_id)
            }
        }
    }

    fn add_stats(&mut self, term_freqs: &FxHashMap<String, FxHashMap<String, u32>>) {
        for (field, freqs) in term_freqs {
            let stats = self.term_stats.entry(field.clone()).or_default();
            for (term, freq) in freqs {
                let entry = stats.entry(term.clone()).or_default();
                entry.doc_freq += 1;
                entry.total_term_freq += u64::from(*freq);
            }
        }
    }

    fn remove_stats(&mut self, document: &StoredDocument) {
        for (field, freqs) in &document.term_freqs {
            if let Some(stats) = self.term_stats.get_mut(field) {
                for (term, freq) in freqs {
                    let now_empty = match stats.get_mut(term) {
                        Some(entry) => {
                            entry.doc_freq = entry.doc_freq.saturating_sub(1);
                            entry.total_term_freq = entry.total_term_freq.saturating_sub(u64::from(*freq));
                            entry.doc_freq == 0
                        }
                        None => false,
                    };
                    if now_empty {
                        stats.remove(term);
                    }
                }
            }
        }
    }

    pub fn num_docs(&self) -> usize {
        self.documents.len()
    }

    /// Freeze the index so searchers can be acquired
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Acquire a point-in-time searcher and the lease that releases it
    pub fn acquire_searcher(self: &Arc<Self>) -> (IndexSearcher, SearcherLease) {
        self.open_searchers.fetch_add(1, Ordering::SeqCst);
        (
            IndexSearcher {
                index: Arc::clone(self),
            },
            SearcherLease {
                index: Arc::clone(self),
                released: false,
            },
        )
    }

    /// Number of searchers acquired and not yet released
    pub fn open_searchers(&self) -> usize {
        self.open_searchers.load(Ordering::SeqCst)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read handle over a frozen shard index
#[derive(Debug, Clone)]
pub struct IndexSearcher {
    index: Arc<ShardIndex>,
}

impl IndexSearcher {
    pub fn max_doc(&self) -> DocId {
        self.index.documents.len() as DocId
    }

    pub fn doc(&self, doc_id: DocId) -> Option<&StoredDocument> {
        self.index.documents.get(doc_id as usize)
    }

    pub fn doc_id(&self, id: &str) -> Option<DocId> {
        self.index.id_lookup.get(id).copied()
    }

    pub fn term_statistics(&self, field: &str, term: &str) -> TermStatistics {
        self.index
            .term_stats
            .get(field)
            .and_then(|terms| terms.get(term))
            .copied()
            .unwrap_or_default()
    }

    /// All indexed terms of a field in lexical order
    pub fn terms(&self, field: &str) -> impl Iterator<Item = (&String, &TermStatistics)> {
        self.index.term_stats.get(field).into_iter().flat_map(|terms| terms.iter())
    }

    pub fn shard_target(&self) -> &ShardTarget {
        &self.index.target
    }
}

/// Releases one acquired searcher
#[derive(Debug)]
pub struct SearcherLease {
    index: Arc<ShardIndex>,
    released: bool,
}

impl Releasable for SearcherLease {
    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.index.open_searchers.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "searcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_index() -> ShardIndex {
        let mut index = ShardIndex::new(ShardTarget::new("books", 0));
        index
            .index_document("1", json!({"title": "Rust in Action", "tags": ["rust", "systems"], "price": 39.5}))
            .unwrap();
        index
            .index_document("2", json!({"title": "Programming Rust, Rust edition", "author": {"name": "Blandy"}}))
            .unwrap();
        index
    }

    #[test]
    fn test_analyze() {
        assert_eq!(analyze("Hello, World! 42x"), vec!["hello", "world", "42x"]);
        assert!(analyze(" ,.; ").is_empty());
    }

    #[test]
    fn test_token_spans_match_analyze() {
        let text = "Héllo, wörld!x";
        let spans = token_spans(text);
        let tokens: Vec<String> = spans.iter().map(|(s, e)| text[*s..*e].to_lowercase()).collect();
        assert_eq!(tokens, analyze(text));
        assert_eq!(spans[0], (0, 6));
    }

    #[test]
    fn test_term_statistics() {
        let index = sample_index().into_shared();
        let (searcher, _lease) = index.acquire_searcher();

        let rust = searcher.term_statistics("title", "rust");
        assert_eq!(rust.doc_freq, 2);
        assert_eq!(rust.total_term_freq, 3);
        assert_eq!(searcher.term_statistics("title", "missing"), TermStatistics::default());
        assert_eq!(searcher.term_statistics("author.name", "blandy").doc_freq, 1);
    }

    #[test]
    fn test_field_values() {
        let index = sample_index().into_shared();
        let (searcher, _lease) = index.acquire_searcher();
        let doc = searcher.doc(0).unwrap();

        assert_eq!(doc.keyword_values("tags"), vec!["rust", "systems"]);
        assert_eq!(doc.numeric_values("price"), vec![39.5]);
        assert!(doc.has_field("price"));
        assert!(!doc.has_field("author.name"));
        assert_eq!(searcher.doc(1).unwrap().keyword_values("author.name"), vec!["Blandy"]);
    }

    #[test]
    fn test_reindex_replaces_document() {
        let mut index = sample_index();
        let doc_id = index.index_document("1", json!({"title": "Zero to Production"})).unwrap();
        assert_eq!(doc_id, 0);
        assert_eq!(index.num_docs(), 2);

        let index = index.into_shared();
        let (searcher, _lease) = index.acquire_searcher();
        let doc = searcher.doc(0).unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.seq_no, 2);
        assert_eq!(searcher.term_statistics("title", "rust").doc_freq, 1);
        assert_eq!(searcher.term_statistics("title", "production").doc_freq, 1);
        assert_eq!(searcher.terms("tags").count(), 0);
    }

    #[test]
    fn test_rejects_non_object_source() {
        let mut index = ShardIndex::new(ShardTarget::new("books", 0));
        assert!(index.index_document("1", json!("text")).is_err());
        assert!(index.index_document("", json!({})).is_err());
    }

    #[test]
    fn test_searcher_lease_counts() {
        let index = sample_index().into_shared();
        let (_searcher, mut lease) = index.acquire_searcher();
        let (_other, mut other_lease) = index.acquire_searcher();
        assert_eq!(index.open_searchers(), 2);

        lease.release().unwrap();
        lease.release().unwrap();
        assert_eq!(index.open_searchers(), 1);

        other_lease.release().unwrap();
        assert_eq!(index.open_searchers(), 0);
    }
}
