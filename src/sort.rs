//! Sorting of hits and `search_after` pagination

use crate::constants::sort_fields;
use crate::index::{DocId, StoredDocument};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One sort criterion. `_score` sorts descending by default, everything else ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
}

impl SortField {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order: Some(order),
        }
    }

    pub fn effective_order(&self) -> SortOrder {
        match self.order {
            Some(order) => order,
            None if self.field == sort_fields::SCORE => SortOrder::Desc,
            None => SortOrder::Asc,
        }
    }

    pub fn is_score(&self) -> bool {
        self.field == sort_fields::SCORE
    }
}

impl Display for SortField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let order = match self.effective_order() {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        write!(f, "{}:{}", self.field, order)
    }
}

/// A sort key value of one hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortValue {
    Number(f64),
    Text(String),
    Missing,
}

impl SortValue {
    fn cmp_present(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Number(a), SortValue::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
            (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }
}

/// True when hits are ordered by relevance
pub fn is_score_sort(sort: &[SortField]) -> bool {
    match sort {
        [] => true,
        [only] => only.is_score() && only.effective_order() == SortOrder::Desc,
        _ => false,
    }
}

/// Compute the sort key of a hit. Multi-valued fields use their minimum for
/// ascending and their maximum for descending order.
pub fn sort_values(sort: &[SortField], doc_id: DocId, score: f32, doc: &StoredDocument) -> Vec<SortValue> {
    sort.iter()
        .map(|field| {
            if field.is_score() {
                return SortValue::Number(f64::from(score));
            }
            if field.field == sort_fields::DOC {
                return SortValue::Number(f64::from(doc_id));
            }
            let descending = field.effective_order() == SortOrder::Desc;

            let numbers = doc.numeric_values(&field.field);
            let picked = if descending {
                numbers.into_iter().reduce(f64::max)
            } else {
                numbers.into_iter().reduce(f64::min)
            };
            if let Some(number) = picked {
                return SortValue::Number(number);
            }

            let keywords = doc.keyword_values(&field.field).into_iter();
            let picked = if descending { keywords.max() } else { keywords.min() };
            picked.map(SortValue::Text).unwrap_or(SortValue::Missing)
        })
        .collect()
}

/// Compare two sort keys. Missing values sort last in either direction.
pub fn compare(sort: &[SortField], a: &[SortValue], b: &[SortValue]) -> Ordering {
    for (field, (left, right)) in sort.iter().zip(a.iter().zip(b.iter())) {
        let ordering = match (left, right) {
            (SortValue::Missing, SortValue::Missing) => Ordering::Equal,
            (SortValue::Missing, _) => Ordering::Greater,
            (_, SortValue::Missing) => Ordering::Less,
            _ => {
                let natural = left.cmp_present(right);
                match field.effective_order() {
                    SortOrder::Asc => natural,
                    SortOrder::Desc => natural.reverse(),
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
