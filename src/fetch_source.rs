//! `_source` filtering for fetched hits

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `_source` option of a request: a flag, a list of includes, or an
/// object with includes and excludes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchSourceSpec {
    Enabled(bool),
    Includes(Vec<String>),
    Filter {
        #[serde(default)]
        includes: Vec<String>,
        #[serde(default)]
        excludes: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSourceContext {
    fetch_source: bool,
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl Default for FetchSourceContext {
    fn default() -> Self {
        Self {
            fetch_source: true,
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

impl From<FetchSourceSpec> for FetchSourceContext {
    fn from(spec: FetchSourceSpec) -> Self {
        match spec {
            FetchSourceSpec::Enabled(fetch_source) => Self {
                fetch_source,
                ..Self::default()
            },
            FetchSourceSpec::Includes(includes) => Self {
                includes,
                ..Self::default()
            },
            FetchSourceSpec::Filter { includes, excludes } => Self {
                fetch_source: true,
                includes,
                excludes,
            },
        }
    }
}

impl FetchSourceContext {
    pub fn disabled() -> Self {
        Self {
            fetch_source: false,
            ..Self::default()
        }
    }

    pub fn fetch_source(&self) -> bool {
        self.fetch_source
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    /// Filtered copy of `source`, or `None` when source fetching is disabled
    pub fn filter(&self, source: &Map<String, Value>) -> Option<Value> {
        if !self.fetch_source {
            return None;
        }
        if self.includes.is_empty() && self.excludes.is_empty() {
            return Some(Value::Object(source.clone()));
        }
        Some(Value::Object(self.filter_object(source, "")))
    }

    fn filter_object(&self, object: &Map<String, Value>, prefix: &str) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in object {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            if self.excludes.iter().any(|pattern| glob_match(pattern, &path)) {
                continue;
            }
            let included = self.includes.is_empty() || self.includes.iter().any(|pattern| glob_match(pattern, &path));
            match value {
                Value::Object(child) if !included => {
                    let might_include = self.includes.iter().any(|pattern| is_path_prefix(&path, pattern));
                    if might_include {
                        let filtered = self.filter_object(child, &path);
                        if !filtered.is_empty() {
                            out.insert(key.clone(), Value::Object(filtered));
                        }
                    }
                }
                Value::Object(child) => {
                    out.insert(key.clone(), Value::Object(self.filter_object_excludes(child, &path)));
                }
                _ if included => {
                    out.insert(key.clone(), value.clone());
                }
                _ => {}
            }
        }
        out
    }

    fn filter_object_excludes(&self, object: &Map<String, Value>, prefix: &str) -> Map<String, Value> {
        if self.excludes.is_empty() {
            return object.clone();
        }
        let mut out = Map::new();
        for (key, value) in object {
            let path = format!("{}.{}", prefix, key);
            if self.excludes.iter().any(|pattern| glob_match(pattern, &path)) {
                continue;
            }
            match value {
                Value::Object(child) => {
                    out.insert(key.clone(), Value::Object(self.filter_object_excludes(child, &path)));
                }
                other => {
                    out.insert(key.clone(), other.clone());
                }
            }
        }
        out
    }
}

/// True when `path` could be a parent of fields matched by `pattern`
fn is_path_prefix(path: &str, pattern: &str) -> bool {
    pattern.starts_with(&format!("{}.", path)) || pattern.starts_with('*')
}

/// Glob matching where `*` matches any run of characters, dots included
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> Map<String, Value> {
        match json!({
            "title": "Rust in Action",
            "price": 39.5,
            "author": {"name": "Tim", "email": "tim@example.com"},
            "tags": ["rust"]
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("title", "title"));
        assert!(glob_match("auth*", "author.name"));
        assert!(glob_match("*.name", "author.name"));
        assert!(!glob_match("price", "prices"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn test_default_returns_everything() {
        let context = FetchSourceContext::default();
        assert_eq!(context.filter(&source()), Some(Value::Object(source())));
        assert_eq!(FetchSourceContext::disabled().filter(&source()), None);
    }

    #[test]
    fn test_includes_and_excludes() {
        let context = FetchSourceContext::from(FetchSourceSpec::Filter {
            includes: vec!["title".into(), "author.*".into()],
            excludes: vec!["author.email".into()],
        });
        assert_eq!(
            context.filter(&source()),
            Some(json!({"title": "Rust in Action", "author": {"name": "Tim"}}))
        );

        let context = FetchSourceContext::from(FetchSourceSpec::Filter {
            includes: vec![],
            excludes: vec!["author".into(), "tags".into()],
        });
        assert_eq!(context.filter(&source()), Some(json!({"title": "Rust in Action", "price": 39.5})));
    }

    #[test]
    fn test_json_forms() {
        let spec: FetchSourceSpec = serde_json::from_str("false").unwrap();
        assert!(!FetchSourceContext::from(spec).fetch_source());
        let spec: FetchSourceSpec = serde_json::from_str(r#"["title"]"#).unwrap();
        assert_eq!(FetchSourceContext::from(spec).includes(), ["title".to_string()]);
        let spec: FetchSourceSpec = serde_json::from_str(r#"{"excludes": ["price"]}"#).unwrap();
        assert_eq!(FetchSourceContext::from(spec).excludes(), ["price".to_string()]);
    }
}
