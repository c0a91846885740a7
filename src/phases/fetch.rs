//! Fetch phase: load the hits chosen by the query phase

use super::{ensure_pre_processed, CancellationCheck};
use crate::context::SearchContext;
use crate::error::SearchError;
use crate::index::StoredDocument;
use crate::query::{Query, Scorer};
use crate::results::{FetchSearchResult, ScoreDoc, SearchHit};
use apithing::ApiOperation;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchPhaseParams;

pub struct FetchPhase;

impl ApiOperation<SearchContext, FetchPhaseParams> for FetchPhase {
    type Output = ();
    type Error = SearchError;

    fn execute(context: &mut SearchContext, _parameters: &FetchPhaseParams) -> Result<Self::Output, Self::Error> {
        ensure_pre_processed(context, "fetch")?;
        context.check_cancelled()?;

        let query_result = context
            .query_result()
            .get()
            .ok_or_else(|| SearchError::phase_failed("fetch", "query phase has not produced a result"))?;
        let by_doc: FxHashMap<_, &ScoreDoc> = query_result.top_docs.iter().map(|hit| (hit.doc, hit)).collect();

        let check = CancellationCheck::new(context);
        let query = context.query().cloned().unwrap_or(Query::MatchAll);
        let scorer = Scorer::new(context.searcher().clone(), context.dfs_result().get());
        let terms = context.highlight_terms();

        let mut hits = Vec::with_capacity(context.doc_ids_to_load().len());
        for (position, doc_id) in context.doc_ids_to_load().iter().copied().enumerate() {
            if check.due(position) {
                context.check_cancelled()?;
            }

            let doc = scorer.doc(doc_id).ok_or_else(|| {
                SearchError::phase_failed("fetch", format!("document [{}] is not in the searcher", doc_id))
            })?;
            let score_doc = by_doc.get(&doc_id);
            let score = score_doc.map_or(0.0, |hit| hit.score);

            let mut hit = SearchHit::new(doc_id, doc.id.clone(), score);
            hit.source = context.fetch_source().filter(&doc.source);
            load_fields(context, doc, &mut hit);
            if context.version() {
                hit.version = Some(doc.version);
            }
            if context.seq_no_and_primary_term() {
                hit.seq_no = Some(doc.seq_no);
                hit.primary_term = Some(doc.primary_term);
            }
            if let Some(score_doc) = score_doc {
                hit.sort_values = score_doc.sort_values.clone();
            }
            if context.explain() {
                hit.explanation = query.explain(&scorer, doc);
            }
            if let Some(highlight) = context.highlight() {
                hit.highlight = highlight.highlight(doc, &terms);
            }
            if let Some(inner_hits) = context.existing_inner_hits().filter(|inner| !inner.is_empty()) {
                hit.inner_hits = inner_hits.fetch(doc_id, &scorer);
            }
            hits.push(hit);
        }

        if context.config().enable_detailed_logging {
            debug!("[{}] fetch phase loaded {} hit(s)", context.id(), hits.len());
        }

        let result = FetchSearchResult {
            context_id: context.id(),
            shard: context.shard_target().clone(),
            hits,
        };
        context.fetch_result_mut().set(result)
    }
}

/// Copy requested stored and doc value fields into `hit.fields`
fn load_fields(context: &SearchContext, doc: &StoredDocument, hit: &mut SearchHit) {
    for field in context.stored_fields() {
        let values: Vec<Value> = doc.values(field).into_iter().cloned().collect();
        if !values.is_empty() {
            hit.fields.insert(field.clone(), values);
        }
    }
    for field in context.docvalue_fields() {
        let numbers = doc.numeric_values(field);
        let values: Vec<Value> = if numbers.is_empty() {
            doc.keyword_values(field).into_iter().map(Value::String).collect()
        } else {
            numbers.into_iter().map(Value::from).collect()
        };
        if !values.is_empty() {
            hit.fields.insert(field.clone(), values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::fetch_source::FetchSourceSpec;
    use crate::highlight::HighlightSpec;
    use crate::identifiers::ShardTarget;
    use crate::inner_hits::InnerHitsSpec;
    use crate::phases::{PreProcess, PreProcessParams, QueryPhase, QueryPhaseParams};
    use crate::request::{SearchSource, ShardSearchRequest};
    use crate::sort::{SortField, SortOrder, SortValue};
    use crate::test_utils::sample_shard;
    use serde_json::json;

    fn fetched(source: SearchSource) -> FetchSearchResult {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();
        let request = ShardSearchRequest::new(ShardTarget::new("books", 0), source);
        let mut context = SearchContext::new(request, searcher, SearchConfig::default());
        PreProcess::execute(&mut context, &PreProcessParams::default()).unwrap();
        QueryPhase::execute(&mut context, &QueryPhaseParams).unwrap();
        FetchPhase::execute(&mut context, &FetchPhaseParams).unwrap();
        context.fetch_result_mut().take().unwrap()
    }

    #[test]
    fn test_loads_hits_in_query_order() {
        let result = fetched(
            SearchSource::new()
                .query(Query::term("category", "systems"))
                .sort(SortField::new("price", SortOrder::Desc)),
        );
        let ids: Vec<&str> = result.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(result.hits[0].sort_values, vec![SortValue::Number(44.0)]);
        assert_eq!(result.hits[0].source.as_ref().unwrap()["title"], json!("Programming Rust"));
        assert!(result.hits[0].version.is_none());
    }

    #[test]
    fn test_source_filtering_and_fields() {
        let result = fetched(
            SearchSource::new()
                .query(Query::Ids {
                    values: vec!["3".into()],
                })
                .fetch_source(FetchSourceSpec::Includes(vec!["title".into()]))
                .stored_field("tags")
                .docvalue_field("year")
                .version(true)
                .seq_no_primary_term(true),
        );
        let hit = &result.hits[0];
        assert_eq!(hit.source, Some(json!({"title": "Designing Databases"})));
        assert_eq!(hit.fields["tags"], vec![json!("databases"), json!("distributed")]);
        assert_eq!(hit.fields["year"], vec![json!(2017.0)]);
        assert_eq!(hit.version, Some(1));
        assert_eq!(hit.seq_no, Some(2));
        assert_eq!(hit.primary_term, Some(1));
    }

    #[test]
    fn test_explain_highlight_and_inner_hits() {
        let result = fetched(
            SearchSource::new()
                .query(Query::matches_text("title", "programming"))
                .explain(true)
                .highlight(HighlightSpec::new(["title"]))
                .inner_hits("same_category", InnerHitsSpec::new("category")),
        );
        let hit = &result.hits[0];
        assert_eq!(hit.id, "2");
        assert_eq!(hit.explanation.as_ref().map(|e| e.value), Some(hit.score));
        assert_eq!(hit.highlight["title"], vec!["<em>Programming</em> Rust"]);
        let inner: Vec<&str> = hit.inner_hits["same_category"].iter().map(|h| h.id.as_str()).collect();
        assert_eq!(inner, vec!["1"]);
    }

    #[test]
    fn test_alias_filter_terms_are_not_highlighted() {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();
        let source = SearchSource::new()
            .query(Query::term("title", "rust"))
            .highlight(HighlightSpec::new(["title", "tags"]));
        let request = ShardSearchRequest::new(ShardTarget::new("books", 0), source)
            .alias_filter(Query::term("tags", "systems"));
        let mut context = SearchContext::new(request, searcher, SearchConfig::default());
        PreProcess::execute(&mut context, &PreProcessParams::default()).unwrap();
        QueryPhase::execute(&mut context, &QueryPhaseParams).unwrap();
        FetchPhase::execute(&mut context, &FetchPhaseParams).unwrap();

        let result = context.fetch_result_mut().take().unwrap();
        assert_eq!(result.hits.len(), 1);
        let hit = &result.hits[0];
        assert_eq!(hit.id, "1");
        assert_eq!(hit.highlight["title"], vec!["<em>Rust</em> in Action"]);
        assert!(!hit.highlight.contains_key("tags"));
    }

    #[test]
    fn test_disabled_source() {
        let result = fetched(SearchSource::new().size(1).fetch_source(FetchSourceSpec::Enabled(false)));
        assert_eq!(result.hits.len(), 1);
        assert!(result.hits[0].source.is_none());
    }

    #[test]
    fn test_requires_query_result() {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();
        let request = ShardSearchRequest::new(ShardTarget::new("books", 0), SearchSource::new());
        let mut context = SearchContext::new(request, searcher, SearchConfig::default());
        PreProcess::execute(&mut context, &PreProcessParams::default()).unwrap();
        assert!(matches!(
            FetchPhase::execute(&mut context, &FetchPhaseParams),
            Err(SearchError::PhaseFailed { .. })
        ));
    }
}
