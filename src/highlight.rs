//! Highlighting of query terms in fetched hits

use crate::constants::highlight_tags;
use crate::error::SearchError;
use crate::index::{token_spans, StoredDocument};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn default_pre_tag() -> String {
    highlight_tags::PRE.to_string()
}

fn default_post_tag() -> String {
    highlight_tags::POST.to_string()
}

fn default_require_field_match() -> bool {
    true
}

/// The `highlight` section of a search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightSpec {
    pub fields: Vec<String>,
    #[serde(default = "default_pre_tag", alias = "pre_tags")]
    pub pre_tag: String,
    #[serde(default = "default_post_tag", alias = "post_tags")]
    pub post_tag: String,
    /// Only highlight terms queried on the same field
    #[serde(default = "default_require_field_match")]
    pub require_field_match: bool,
}

impl HighlightSpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            pre_tag: default_pre_tag(),
            post_tag: default_post_tag(),
            require_field_match: true,
        }
    }

    pub fn tags(mut self, pre_tag: impl Into<String>, post_tag: impl Into<String>) -> Self {
        self.pre_tag = pre_tag.into();
        self.post_tag = post_tag.into();
        self
    }

    pub fn require_field_match(mut self, require: bool) -> Self {
        self.require_field_match = require;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHighlightContext {
    spec: HighlightSpec,
}

impl SearchHighlightContext {
    pub fn new(spec: HighlightSpec) -> Result<Self> {
        if spec.fields.is_empty() || spec.fields.iter().any(String::is_empty) {
            return Err(SearchError::invalid_input(
                "highlight.fields",
                "at least one non-empty field name is required",
                "List the fields to highlight",
            ));
        }
        Ok(Self { spec })
    }

    pub fn fields(&self) -> &[String] {
        &self.spec.fields
    }

    /// Highlight `terms` (as `(field, token)` pairs) in the requested fields.
    ///
    /// Fields without any highlighted term are left out of the result.
    pub fn highlight(&self, doc: &StoredDocument, terms: &BTreeSet<(String, String)>) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        for field in &self.spec.fields {
            let wanted: BTreeSet<&str> = terms
                .iter()
                .filter(|(term_field, _)| !self.spec.require_field_match || term_field == field)
                .map(|(_, token)| token.as_str())
                .collect();
            if wanted.is_empty() {
                continue;
            }

            let fragments: Vec<String> = doc
                .text_values(field)
                .into_iter()
                .filter_map(|text| self.mark(text, &wanted))
                .collect();
            if !fragments.is_empty() {
                out.insert(field.clone(), fragments);
            }
        }
        out
    }

    fn mark(&self, text: &str, wanted: &BTreeSet<&str>) -> Option<String> {
        let mut fragment = String::with_capacity(text.len() + 16);
        let mut cursor = 0;
        let mut marked = false;
        for (start, end) in token_spans(text) {
            let token = text[start..end].to_lowercase();
            if wanted.contains(token.as_str()) {
                fragment.push_str(&text[cursor..start]);
                fragment.push_str(&self.spec.pre_tag);
                fragment.push_str(&text[start..end]);
                fragment.push_str(&self.spec.post_tag);
                cursor = end;
                marked = true;
            }
        }
        if !marked {
            return None;
        }
        fragment.push_str(&text[cursor..]);
        Some(fragment)
    }
}
