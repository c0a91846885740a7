//! Query model, matching and scoring
//!
//! [`Query`] is the parsed query tree carried by a search request. It can be
//! rewritten into a simpler equivalent, matched and scored against stored
//! documents, and explained. [`FilterState`] holds the query together with
//! the post filter and the alias/type filters that are merged into the
//! executed query by [`FilterState::build_filtered_query`].
//!
//! Scoring is a plain TF-IDF: a term contributes `sqrt(tf) * idf` with
//! `idf = 1 + ln((max_doc + 1) / (doc_freq + 1))`. Term statistics come from
//! the DFS result when one was collected, otherwise from the local shard.

use crate::index::{analyze, DocId, IndexSearcher, StoredDocument, TermStatistics};
use crate::results::DfsSearchResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

fn default_boost() -> f32 {
    1.0
}

/// How the analyzed tokens of a match query combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Or,
    And,
}

/// Boolean combination of queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub filter: Vec<Query>,
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_should_match: Option<usize>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn filter(mut self, query: Query) -> Self {
        self.filter.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn minimum_should_match(mut self, minimum: usize) -> Self {
        self.minimum_should_match = Some(minimum);
        self
    }

    fn is_empty(&self) -> bool {
        self.must.is_empty() && self.filter.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    fn required_should(&self) -> usize {
        match self.minimum_should_match {
            Some(minimum) => minimum,
            None if self.should.is_empty() => 0,
            None if self.must.is_empty() && self.filter.is_empty() => 1,
            None => 0,
        }
    }
}

/// A parsed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    MatchAll,
    MatchNone,
    /// Exact term, compared against analyzed tokens and raw keyword values
    Term { field: String, value: String },
    /// Analyzed full-text match
    Match {
        field: String,
        query: String,
        #[serde(default)]
        operator: Operator,
    },
    /// Numeric range; unset bounds are open
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gt: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lt: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<f64>,
    },
    Prefix { field: String, value: String },
    Exists { field: String },
    Ids { values: Vec<String> },
    ConstantScore {
        filter: Box<Query>,
        #[serde(default = "default_boost")]
        boost: f32,
    },
    Bool(BoolQuery),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches_text(field: impl Into<String>, query: impl Into<String>) -> Self {
        Self::Match {
            field: field.into(),
            query: query.into(),
            operator: Operator::Or,
        }
    }

    pub fn range(field: impl Into<String>, gte: Option<f64>, lte: Option<f64>) -> Self {
        Self::Range {
            field: field.into(),
            gt: None,
            gte,
            lt: None,
            lte,
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists { field: field.into() }
    }

    pub fn constant_score(filter: Query, boost: f32) -> Self {
        Self::ConstantScore {
            filter: Box::new(filter),
            boost,
        }
    }

    /// Rewrite into a simpler, equivalent query
    pub fn rewrite(self) -> Query {
        match self {
            Query::Bool(bool_query) => rewrite_bool(bool_query),
            Query::ConstantScore { filter, boost } => match filter.rewrite() {
                Query::MatchNone => Query::MatchNone,
                inner => Query::ConstantScore {
                    filter: Box::new(inner),
                    boost,
                },
            },
            Query::Match { ref query, .. } if analyze(query).is_empty() => Query::MatchNone,
            Query::Ids { ref values } if values.is_empty() => Query::MatchNone,
            other => other,
        }
    }

    /// Collect the `(field, term)` pairs that contribute to scoring
    pub fn extract_terms(&self, out: &mut BTreeSet<(String, String)>) {
        match self {
            Query::Term { field, value } => {
                out.insert((field.clone(), value.to_lowercase()));
            }
            Query::Match { field, query, .. } => {
                for token in analyze(query) {
                    out.insert((field.clone(), token));
                }
            }
            Query::ConstantScore { filter, .. } => filter.extract_terms(out),
            Query::Bool(bool_query) => {
                for clause in bool_query
                    .must
                    .iter()
                    .chain(&bool_query.filter)
                    .chain(&bool_query.should)
                {
                    clause.extract_terms(out);
                }
            }
            _ => {}
        }
    }

    /// Match `doc` and return its score, or `None` if it does not match
    pub fn score(&self, scorer: &Scorer, doc: &StoredDocument) -> Option<f32> {
        match self {
            Query::MatchAll => Some(1.0),
            Query::MatchNone => None,
            Query::Term { field, value } => {
                let term = value.to_lowercase();
                let tf = doc.term_freq(field, &term);
                if tf > 0 {
                    Some(scorer.term_score(field, &term, tf))
                } else if doc.keyword_values(field).iter().any(|v| v == value) {
                    Some(1.0)
                } else {
                    None
                }
            }
            Query::Match { field, query, operator } => {
                let tokens = analyze(query);
                if tokens.is_empty() {
                    return None;
                }
                let mut matched = 0;
                let mut score = 0.0;
                for token in &tokens {
                    let tf = doc.term_freq(field, token);
                    if tf > 0 {
                        matched += 1;
                        score += scorer.term_score(field, token, tf);
                    }
                }
                let is_match = match operator {
                    Operator::Or => matched > 0,
                    Operator::And => matched == tokens.len(),
                };
                is_match.then_some(score)
            }
            Query::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => doc
                .numeric_values(field)
                .into_iter()
                .any(|value| {
                    gt.map_or(true, |bound| value > bound)
                        && gte.map_or(true, |bound| value >= bound)
                        && lt.map_or(true, |bound| value < bound)
                        && lte.map_or(true, |bound| value <= bound)
                })
                .then_some(1.0),
            Query::Prefix { field, value } => {
                let prefix = value.to_lowercase();
                let by_token = doc
                    .text_values(field)
                    .into_iter()
                    .flat_map(analyze)
                    .any(|token| token.starts_with(&prefix));
                let by_keyword = doc.keyword_values(field).iter().any(|v| v.starts_with(value.as_str()));
                (by_token || by_keyword).then_some(1.0)
            }
            Query::Exists { field } => doc.has_field(field).then_some(1.0),
            Query::Ids { values } => values.iter().any(|id| *id == doc.id).then_some(1.0),
            Query::ConstantScore { filter, boost } => filter.score(scorer, doc).map(|_| *boost),
            Query::Bool(bool_query) => score_bool(bool_query, scorer, doc),
        }
    }

    pub fn matches(&self, scorer: &Scorer, doc: &StoredDocument) -> bool {
        self.score(scorer, doc).is_some()
    }

    /// Explain how `doc` was scored; `None` if it does not match
    pub fn explain(&self, scorer: &Scorer, doc: &StoredDocument) -> Option<Explanation> {
        let score = self.score(scorer, doc)?;
        let explanation = match self {
            Query::Term { field, value } => {
                let term = value.to_lowercase();
                let tf = doc.term_freq(field, &term);
                if tf > 0 {
                    term_explanation(scorer, field, &term, tf)
                } else {
                    Explanation::leaf(score, format!("keyword match {}", self))
                }
            }
            Query::Match { field, query, .. } => {
                let details = analyze(query)
                    .into_iter()
                    .filter_map(|token| {
                        let tf = doc.term_freq(field, &token);
                        (tf > 0).then(|| term_explanation(scorer, field, &token, tf))
                    })
                    .collect();
                Explanation::new(score, "sum of:", details)
            }
            Query::Bool(bool_query) => {
                let details = bool_query
                    .must
                    .iter()
                    .chain(&bool_query.should)
                    .filter_map(|clause| clause.explain(scorer, doc))
                    .collect();
                Explanation::new(score, "sum of:", details)
            }
            other => Explanation::leaf(score, other.to_string()),
        };
        Some(explanation)
    }
}

fn rewrite_bool(bool_query: BoolQuery) -> Query {
    if bool_query.is_empty() {
        return Query::MatchAll;
    }

    let minimum_should_match = bool_query.minimum_should_match;
    let must: Vec<Query> = bool_query.must.into_iter().map(Query::rewrite).collect();
    let filter: Vec<Query> = bool_query
        .filter
        .into_iter()
        .map(Query::rewrite)
        .filter(|q| *q != Query::MatchAll)
        .collect();
    let should: Vec<Query> = bool_query.should.into_iter().map(Query::rewrite).collect();
    let must_not: Vec<Query> = bool_query.must_not.into_iter().map(Query::rewrite).collect();

    if must.iter().chain(&filter).any(|q| *q == Query::MatchNone) || must_not.contains(&Query::MatchAll) {
        return Query::MatchNone;
    }

    if filter.is_empty() && should.is_empty() && must_not.is_empty() && must.len() == 1 {
        return must.into_iter().next().unwrap_or(Query::MatchAll);
    }

    if must.is_empty()
        && filter.is_empty()
        && must_not.is_empty()
        && should.len() == 1
        && minimum_should_match.map_or(true, |minimum| minimum <= 1)
    {
        return should.into_iter().next().unwrap_or(Query::MatchNone);
    }

    Query::Bool(BoolQuery {
        must,
        filter,
        should,
        must_not,
        minimum_should_match,
    })
}

fn score_bool(bool_query: &BoolQuery, scorer: &Scorer, doc: &StoredDocument) -> Option<f32> {
    if bool_query.must_not.iter().any(|q| q.matches(scorer, doc)) {
        return None;
    }
    if !bool_query.filter.iter().all(|q| q.matches(scorer, doc)) {
        return None;
    }

    let mut score = 0.0;
    for clause in &bool_query.must {
        score += clause.score(scorer, doc)?;
    }

    let mut should_matched = 0;
    for clause in &bool_query.should {
        if let Some(clause_score) = clause.score(scorer, doc) {
            should_matched += 1;
            score += clause_score;
        }
    }
    if should_matched < bool_query.required_should() {
        return None;
    }

    if bool_query.must.is_empty() && bool_query.should.is_empty() && bool_query.filter.is_empty() {
        return Some(1.0);
    }
    Some(score)
}

fn term_explanation(scorer: &Scorer, field: &str, term: &str, tf: u32) -> Explanation {
    let idf = scorer.idf(field, term);
    let tf_factor = (tf as f32).sqrt();
    Explanation::new(
        tf_factor * idf,
        format!("weight({}:{}), product of:", field, term),
        vec![
            Explanation::leaf(tf_factor, format!("tf, sqrt of termFreq={}", tf)),
            Explanation::leaf(idf, "idf, 1 + ln((maxDocs + 1) / (docFreq + 1))"),
        ],
    )
}

/// Score explanation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub value: f32,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Explanation>,
}

impl Explanation {
    pub fn new(value: f32, description: impl Into<String>, details: Vec<Explanation>) -> Self {
        Self {
            value,
            description: description.into(),
            details,
        }
    }

    pub fn leaf(value: f32, description: impl Into<String>) -> Self {
        Self::new(value, description, Vec::new())
    }
}

/// Term statistics source for scoring
#[derive(Debug, Clone)]
pub struct Scorer {
    searcher: IndexSearcher,
    global_max_doc: Option<u64>,
    global_stats: BTreeMap<String, BTreeMap<String, TermStatistics>>,
}

impl Scorer {
    /// Scorer using DFS statistics when available, shard statistics otherwise
    pub fn new(searcher: IndexSearcher, dfs: Option<&DfsSearchResult>) -> Self {
        match dfs {
            Some(dfs) => Self {
                searcher,
                global_max_doc: Some(dfs.max_doc),
                global_stats: dfs.term_statistics.clone(),
            },
            None => Self {
                searcher,
                global_max_doc: None,
                global_stats: BTreeMap::new(),
            },
        }
    }

    pub fn uses_global_statistics(&self) -> bool {
        self.global_max_doc.is_some()
    }

    pub fn searcher(&self) -> &IndexSearcher {
        &self.searcher
    }

    pub fn doc(&self, doc_id: DocId) -> Option<&StoredDocument> {
        self.searcher.doc(doc_id)
    }

    pub fn idf(&self, field: &str, term: &str) -> f32 {
        let stats = self
            .global_stats
            .get(field)
            .and_then(|terms| terms.get(term))
            .copied()
            .unwrap_or_else(|| self.searcher.term_statistics(field, term));
        let max_doc = self
            .global_max_doc
            .unwrap_or_else(|| u64::from(self.searcher.max_doc()));
        1.0 + ((max_doc as f32 + 1.0) / (stats.doc_freq as f32 + 1.0)).ln()
    }

    pub fn term_score(&self, field: &str, term: &str, tf: u32) -> f32 {
        (tf as f32).sqrt() * self.idf(field, term)
    }
}

/// Query and filters of one request, merged at execution time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    /// The parsed query; `None` means match all
    pub query: Option<Query>,
    /// Filter applied to hits after aggregations were collected
    pub post_filter: Option<Query>,
    /// Filter attached to the alias the request was sent to
    pub alias_filter: Option<Query>,
    /// Filter restricting the request to particular document types
    pub type_filter: Option<Query>,
}

impl FilterState {
    /// Wrap `query` with the alias and type filters as non-scoring clauses.
    ///
    /// The post filter is deliberately left out; it runs after aggregation.
    pub fn build_filtered_query(&self, query: Query) -> Query {
        let filters: Vec<Query> = self
            .alias_filter
            .iter()
            .chain(self.type_filter.iter())
            .cloned()
            .collect();
        if filters.is_empty() {
            return query;
        }
        Query::Bool(BoolQuery {
            must: vec![query],
            filter: filters,
            ..BoolQuery::default()
        })
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Query::MatchAll => write!(f, "*:*"),
            Query::MatchNone => write!(f, "MatchNoDocs"),
            Query::Term { field, value } => write!(f, "{}:{}", field, value),
            Query::Match { field, query, operator } => {
                let tokens = analyze(query);
                let joined = match operator {
                    Operator::Or => tokens.join(" "),
                    Operator::And => tokens.iter().map(|t| format!("+{}", t)).collect::<Vec<_>>().join(" "),
                };
                write!(f, "{}:({})", field, joined)
            }
            Query::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => {
                let (open, lower) = match (gte, gt) {
                    (Some(v), _) => ('[', v.to_string()),
                    (None, Some(v)) => ('{', v.to_string()),
                    (None, None) => ('[', "*".to_string()),
                };
                let (close, upper) = match (lte, lt) {
                    (Some(v), _) => (']', v.to_string()),
                    (None, Some(v)) => ('}', v.to_string()),
                    (None, None) => (']', "*".to_string()),
                };
                write!(f, "{}:{}{} TO {}{}", field, open, lower, upper, close)
            }
            Query::Prefix { field, value } => write!(f, "{}:{}*", field, value),
            Query::Exists { field } => write!(f, "_exists_:{}", field),
            Query::Ids { values } => write!(f, "_id:({})", values.join(" ")),
            Query::ConstantScore { filter, boost } => write!(f, "ConstantScore({})^{}", filter, boost),
            Query::Bool(bool_query) => {
                let mut parts = Vec::new();
                parts.extend(bool_query.must.iter().map(|q| format!("+{}", q)));
                parts.extend(bool_query.filter.iter().map(|q| format!("#{}", q)));
                parts.extend(bool_query.should.iter().map(|q| q.to_string()));
                parts.extend(bool_query.must_not.iter().map(|q| format!("-{}", q)));
                write!(f, "({})", parts.join(" "))?;
                if let Some(minimum) = bool_query.minimum_should_match {
                    write!(f, "~{}", minimum)?;
                }
                Ok(())
            }
        }
    }
}
