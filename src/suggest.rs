//! Term suggester
//!
//! For each token of the suggestion text the suggester proposes indexed terms
//! of the same field within a small edit distance.

use crate::error::SearchError;
use crate::index::{analyze, token_spans, IndexSearcher};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_size() -> usize {
    5
}

fn default_max_edits() -> usize {
    2
}

fn default_prefix_length() -> usize {
    1
}

fn default_min_word_length() -> usize {
    4
}

/// When suggestions are produced for a token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestMode {
    /// Only for tokens that are not in the index
    #[default]
    Missing,
    /// For every token
    Always,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSuggesterSpec {
    pub field: String,
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default = "default_max_edits")]
    pub max_edits: usize,
    #[serde(default = "default_prefix_length")]
    pub prefix_length: usize,
    #[serde(default = "default_min_word_length")]
    pub min_word_length: usize,
    #[serde(default)]
    pub suggest_mode: SuggestMode,
}

impl TermSuggesterSpec {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            size: default_size(),
            max_edits: default_max_edits(),
            prefix_length: default_prefix_length(),
            min_word_length: default_min_word_length(),
            suggest_mode: SuggestMode::Missing,
        }
    }
}

/// One named suggestion. `text` falls back to the global suggest text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSuggestionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub term: TermSuggesterSpec,
}

/// The `suggest` section of a search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub suggestions: BTreeMap<String, TermSuggestionSpec>,
}

impl SuggestSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn term(mut self, name: impl Into<String>, text: Option<String>, term: TermSuggesterSpec) -> Self {
        self.suggestions.insert(name.into(), TermSuggestionSpec { text, term });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestOption {
    pub text: String,
    pub score: f32,
    pub freq: u64,
}

/// Suggestions for one token of the input text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestEntry {
    pub text: String,
    pub offset: usize,
    pub length: usize,
    pub options: Vec<SuggestOption>,
}

/// Suggest output by suggestion name
pub type SuggestResults = BTreeMap<String, Vec<SuggestEntry>>;

#[derive(Debug, Clone, PartialEq)]
struct ResolvedSuggestion {
    text: String,
    term: TermSuggesterSpec,
}

/// Validated suggest configuration of a search context
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionSearchContext {
    suggestions: BTreeMap<String, ResolvedSuggestion>,
}

impl SuggestionSearchContext {
    pub fn new(spec: SuggestSpec) -> Result<Self> {
        if spec.suggestions.is_empty() {
            return Err(SearchError::invalid_input(
                "suggest",
                "no suggestions defined",
                "Add at least one named term suggestion",
            ));
        }
        let mut suggestions = BTreeMap::new();
        for (name, suggestion) in spec.suggestions {
            let text = match suggestion.text.or_else(|| spec.text.clone()) {
                Some(text) => text,
                None => {
                    return Err(SearchError::invalid_input(
                        format!("suggest.{}.text", name),
                        "suggestion has no text",
                        "Set the suggestion text or a global suggest text",
                    ))
                }
            };
            if suggestion.term.field.is_empty() {
                return Err(SearchError::invalid_input(
                    format!("suggest.{}.term.field", name),
                    "field must not be empty",
                    "Name the field to draw suggestions from",
                ));
            }
            if suggestion.term.max_edits == 0 || suggestion.term.max_edits > 2 {
                return Err(SearchError::invalid_input(
                    format!("suggest.{}.term.max_edits", name),
                    format!("max_edits must be 1 or 2, got {}", suggestion.term.max_edits),
                    "Use max_edits of 1 or 2",
                ));
            }
            suggestions.insert(
                name,
                ResolvedSuggestion {
                    text,
                    term: suggestion.term,
                },
            );
        }
        Ok(Self { suggestions })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.suggestions.keys().map(String::as_str)
    }

    pub fn execute(&self, searcher: &IndexSearcher) -> SuggestResults {
        self.suggestions
            .iter()
            .map(|(name, suggestion)| (name.clone(), suggest_terms(searcher, &suggestion.text, &suggestion.term)))
            .collect()
    }
}

fn suggest_terms(searcher: &IndexSearcher, text: &str, spec: &TermSuggesterSpec) -> Vec<SuggestEntry> {
    token_spans(text)
        .into_iter()
        .zip(analyze(text))
        .map(|((start, end), token)| {
            let options = if token.chars().count() < spec.min_word_length {
                Vec::new()
            } else {
                candidates(searcher, &token, spec)
            };
            SuggestEntry {
                text: text[start..end].to_string(),
                offset: start,
                length: end - start,
                options,
            }
        })
        .collect()
}

fn candidates(searcher: &IndexSearcher, token: &str, spec: &TermSuggesterSpec) -> Vec<SuggestOption> {
    let exists = searcher.term_statistics(&spec.field, token).doc_freq > 0;
    if exists && spec.suggest_mode == SuggestMode::Missing {
        return Vec::new();
    }

    let prefix: String = token.chars().take(spec.prefix_length).collect();
    let token_len = token.chars().count();
    let mut options: Vec<SuggestOption> = searcher
        .terms(&spec.field)
        .filter(|(term, _)| term.as_str() != token && term.starts_with(&prefix))
        .filter_map(|(term, stats)| {
            let distance = levenshtein(token, term);
            if distance > spec.max_edits {
                return None;
            }
            let max_len = token_len.max(term.chars().count()).max(1);
            Some(SuggestOption {
                text: term.clone(),
                score: 1.0 - distance as f32 / max_len as f32,
                freq: stats.doc_freq,
            })
        })
        .collect();

    options.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.freq.cmp(&a.freq))
            .then_with(|| a.text.cmp(&b.text))
    });
    options.truncate(spec.size);
    options
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_shard;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("rust", "rust"), 0);
        assert_eq!(levenshtein("rsut", "rust"), 2);
        assert_eq!(levenshtein("databse", "database"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn test_suggests_close_terms() {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();
        let spec = SuggestSpec::new()
            .text("Databse internls")
            .term("fix", None, TermSuggesterSpec::new("title"));
        let context = SuggestionSearchContext::new(spec).unwrap();
        let results = context.execute(&searcher);

        let entries = &results["fix"];
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "Databse");
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[0].length, 7);
        let options: Vec<&str> = entries[0].options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(options, vec!["database", "databases"]);
        assert_eq!(entries[1].offset, 8);
        assert_eq!(entries[1].options[0].text, "internals");
    }

    #[test]
    fn test_missing_mode_skips_known_terms() {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();

        let missing = SuggestSpec::new().term("s", Some("rust".into()), TermSuggesterSpec::new("title"));
        let results = SuggestionSearchContext::new(missing).unwrap().execute(&searcher);
        assert!(results["s"][0].options.is_empty());

        let mut always_spec = TermSuggesterSpec::new("tags");
        always_spec.suggest_mode = SuggestMode::Always;
        let always = SuggestSpec::new().term("s", Some("database".into()), always_spec);
        let results = SuggestionSearchContext::new(always).unwrap().execute(&searcher);
        let options: Vec<&str> = results["s"][0].options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(options, vec!["databases"]);
    }

    #[test]
    fn test_short_words_have_no_options() {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();
        let spec = SuggestSpec::new().term("s", Some("wbe".into()), TermSuggesterSpec::new("title"));
        let results = SuggestionSearchContext::new(spec).unwrap().execute(&searcher);
        assert_eq!(results["s"].len(), 1);
        assert!(results["s"][0].options.is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(SuggestionSearchContext::new(SuggestSpec::new()).is_err());
        let no_text = SuggestSpec::new().term("s", None, TermSuggesterSpec::new("title"));
        assert!(SuggestionSearchContext::new(no_text).is_err());
        let mut spec = TermSuggesterSpec::new("title");
        spec.max_edits = 3;
        assert!(SuggestionSearchContext::new(SuggestSpec::new().text("x").term("s", None, spec)).is_err());
    }

    #[test]
    fn test_json_shape() {
        let spec: SuggestSpec = serde_json::from_str(
            r#"{"text": "rsut", "my-fix": {"term": {"field": "title", "size": 3}}}"#,
        )
        .unwrap();
        assert_eq!(spec.text.as_deref(), Some("rsut"));
        assert_eq!(spec.suggestions["my-fix"].term.size, 3);
        assert_eq!(spec.suggestions["my-fix"].term.prefix_length, 1);
    }
}
