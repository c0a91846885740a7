//! Query rescoring of the top hits
//!
//! A rescorer revisits the top `window_size` hits of the query phase, scores
//! them again with a secondary query and combines both scores. Every rescore
//! context remembers which documents it rescored; the search context
//! aggregates those sets into [`RescoreDocIds`] so later phases (possibly on
//! another context) can tell which hits were rescored without knowing about
//! the rescorers themselves.

use crate::constants::DEFAULT_RESCORE_WINDOW_SIZE;
use crate::error::SearchError;
use crate::index::DocId;
use crate::query::{Query, Scorer};
use crate::results::ScoreDoc;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_window_size() -> usize {
    DEFAULT_RESCORE_WINDOW_SIZE
}

fn default_weight() -> f32 {
    1.0
}

/// How the primary and the rescore query scores are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    #[default]
    Total,
    Multiply,
    Avg,
    Max,
    Min,
}

impl ScoreMode {
    pub fn combine(self, primary: f32, secondary: f32) -> f32 {
        match self {
            ScoreMode::Total => primary + secondary,
            ScoreMode::Multiply => primary * secondary,
            ScoreMode::Avg => (primary + secondary) / 2.0,
            ScoreMode::Max => primary.max(secondary),
            ScoreMode::Min => primary.min(secondary),
        }
    }
}

/// Rescore section of a search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescoreSpec {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    pub rescore_query: Query,
    #[serde(default = "default_weight")]
    pub query_weight: f32,
    #[serde(default = "default_weight")]
    pub rescore_query_weight: f32,
    #[serde(default)]
    pub score_mode: ScoreMode,
}

impl RescoreSpec {
    pub fn new(rescore_query: Query) -> Self {
        Self {
            window_size: DEFAULT_RESCORE_WINDOW_SIZE,
            rescore_query,
            query_weight: 1.0,
            rescore_query_weight: 1.0,
            score_mode: ScoreMode::Total,
        }
    }

    pub fn window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn weights(mut self, query_weight: f32, rescore_query_weight: f32) -> Self {
        self.query_weight = query_weight;
        self.rescore_query_weight = rescore_query_weight;
        self
    }

    pub fn score_mode(mut self, score_mode: ScoreMode) -> Self {
        self.score_mode = score_mode;
        self
    }
}

/// One configured rescorer and the documents it rescored
#[derive(Debug, Clone, PartialEq)]
pub struct RescoreContext {
    spec: RescoreSpec,
    rescored_docs: Option<BTreeSet<DocId>>,
}

impl RescoreContext {
    pub fn new(spec: RescoreSpec) -> Result<Self> {
        if spec.window_size == 0 {
            return Err(SearchError::invalid_input(
                "rescore.window_size",
                "must be greater than 0",
                "Use a window_size of at least 1 (default: 10)",
            ));
        }
        Ok(Self {
            spec,
            rescored_docs: None,
        })
    }

    pub fn window_size(&self) -> usize {
        self.spec.window_size
    }

    pub fn query(&self) -> &Query {
        &self.spec.rescore_query
    }

    pub fn spec(&self) -> &RescoreSpec {
        &self.spec
    }

    pub fn rescored_docs(&self) -> Option<&BTreeSet<DocId>> {
        self.rescored_docs.as_ref()
    }

    pub fn set_rescored_docs(&mut self, docs: BTreeSet<DocId>) {
        self.rescored_docs = Some(docs);
    }

    /// Rescore the leading window of `top_docs`, which must be sorted by score.
    ///
    /// The window is re-sorted by the combined score; hits outside the window
    /// keep their score and order behind it.
    pub fn rescore(&mut self, top_docs: &mut [ScoreDoc], scorer: &Scorer) {
        let window = self.spec.window_size.min(top_docs.len());
        let mut rescored = BTreeSet::new();

        for hit in top_docs[..window].iter_mut() {
            let primary = hit.score * self.spec.query_weight;
            let secondary = scorer
                .doc(hit.doc)
                .and_then(|doc| self.spec.rescore_query.score(scorer, doc));
            hit.score = match secondary {
                Some(secondary) => self
                    .spec
                    .score_mode
                    .combine(primary, secondary * self.spec.rescore_query_weight),
                None => primary,
            };
            rescored.insert(hit.doc);
        }

        top_docs[..window].sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc.cmp(&b.doc))
        });
        self.rescored_docs = Some(rescored);
    }
}

/// Rescored document ids keyed by rescorer index; empty sets are omitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawRescoreDocIds")]
pub struct RescoreDocIds {
    doc_ids: BTreeMap<usize, BTreeSet<DocId>>,
}

/// Wire form of [`RescoreDocIds`]; deserialization goes through
/// [`RescoreDocIds::new`]
#[derive(Deserialize)]
struct RawRescoreDocIds {
    #[serde(default)]
    doc_ids: BTreeMap<usize, BTreeSet<DocId>>,
}

impl From<RawRescoreDocIds> for RescoreDocIds {
    fn from(raw: RawRescoreDocIds) -> Self {
        Self::new(raw.doc_ids)
    }
}

impl RescoreDocIds {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(doc_ids: BTreeMap<usize, BTreeSet<DocId>>) -> Self {
        Self {
            doc_ids: doc_ids.into_iter().filter(|(_, ids)| !ids.is_empty()).collect(),
        }
    }

    /// Doc ids of the rescorer at `index`, if it rescored anything
    pub fn get_id(&self, index: usize) -> Option<&BTreeSet<DocId>> {
        self.doc_ids.get(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    /// True if any rescorer rescored `doc`
    pub fn contains_doc(&self, doc: DocId) -> bool {
        self.doc_ids.values().any(|ids| ids.contains(&doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_shard;

    fn scored(docs: &[(DocId, f32)]) -> Vec<ScoreDoc> {
        docs.iter().map(|(doc, score)| ScoreDoc::new(*doc, *score)).collect()
    }

    #[test]
    fn test_score_modes() {
        assert_eq!(ScoreMode::Total.combine(1.0, 2.0), 3.0);
        assert_eq!(ScoreMode::Multiply.combine(1.5, 2.0), 3.0);
        assert_eq!(ScoreMode::Avg.combine(1.0, 2.0), 1.5);
        assert_eq!(ScoreMode::Max.combine(1.0, 2.0), 2.0);
        assert_eq!(ScoreMode::Min.combine(1.0, 2.0), 1.0);
    }

    #[test]
    fn test_rejects_empty_window() {
        assert!(RescoreContext::new(RescoreSpec::new(Query::MatchAll).window_size(0)).is_err());
    }

    #[test]
    fn test_rescore_window_only() {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();
        let scorer = Scorer::new(searcher, None);

        // doc 4 is the only "web" book
        let spec = RescoreSpec::new(Query::constant_score(Query::term("category", "web"), 10.0)).window_size(3);
        let mut rescore = RescoreContext::new(spec).unwrap();
        let mut docs = scored(&[(0, 3.0), (4, 2.0), (1, 1.0), (3, 0.5)]);
        rescore.rescore(&mut docs, &scorer);

        let order: Vec<DocId> = docs.iter().map(|d| d.doc).collect();
        assert_eq!(order, vec![4, 0, 1, 3]);
        assert_eq!(docs[0].score, 12.0);
        assert_eq!(docs[3].score, 0.5);
        let expected: BTreeSet<DocId> = [0, 1, 4].into_iter().collect();
        assert_eq!(rescore.rescored_docs(), Some(&expected));
    }

    #[test]
    fn test_rescore_weights() {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();
        let scorer = Scorer::new(searcher, None);

        let spec = RescoreSpec::new(Query::constant_score(Query::MatchAll, 2.0))
            .weights(0.5, 3.0)
            .score_mode(ScoreMode::Multiply);
        let mut rescore = RescoreContext::new(spec).unwrap();
        let mut docs = scored(&[(0, 4.0)]);
        rescore.rescore(&mut docs, &scorer);
        assert_eq!(docs[0].score, 12.0);
    }

    #[test]
    fn test_rescore_doc_ids_omit_empty_sets() {
        let mut map = BTreeMap::new();
        map.insert(0, [1, 2].into_iter().collect::<BTreeSet<DocId>>());
        map.insert(1, BTreeSet::new());
        map.insert(3, [7].into_iter().collect::<BTreeSet<DocId>>());

        let ids = RescoreDocIds::new(map);
        assert_eq!(ids.len(), 2);
        assert!(ids.get_id(1).is_none());
        assert!(ids.get_id(3).unwrap().contains(&7));
        assert!(ids.contains_doc(2));
        assert!(!ids.contains_doc(5));
        assert!(RescoreDocIds::empty().is_empty());
    }

    #[test]
    fn test_rescore_doc_ids_json() {
        let mut map = BTreeMap::new();
        map.insert(2, [5, 6].into_iter().collect::<BTreeSet<DocId>>());
        let ids = RescoreDocIds::new(map);
        let json = serde_json::to_string(&ids).unwrap();
        let restored: RescoreDocIds = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, ids);
    }

    #[test]
    fn test_deserialized_rescore_doc_ids_drop_empty_sets() {
        let ids: RescoreDocIds = serde_json::from_str(r#"{"doc_ids":{"0":[],"1":[3]}}"#).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.get_id(0).is_none());
        assert!(ids.get_id(1).unwrap().contains(&3));

        let empty: RescoreDocIds = serde_json::from_str(r#"{"doc_ids":{"2":[]}}"#).unwrap();
        assert!(empty.is_empty());
    }
}
