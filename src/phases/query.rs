//! Query phase: match, score, aggregate, sort and page
//!
//! The phase walks every document of the shard once. Per matching document
//! it applies `min_score`, feeds the aggregations, applies the post filter
//! and counts the hit; collection stops early on `terminate_after` or when
//! the search timeout elapses. The collected hits are then sorted, filtered
//! by `search_after`, collapsed, rescored and paged. Suggest-only requests
//! skip document collection entirely.

use super::{ensure_pre_processed, CancellationCheck};
use crate::context::SearchContext;
use crate::error::SearchError;
use crate::index::DocId;
use crate::query::{Query, Scorer};
use crate::request::TrackTotalHits;
use crate::results::{QuerySearchResult, ScoreDoc, TotalHits};
use crate::sort::{self, is_score_sort};
use apithing::ApiOperation;
use std::cmp::Ordering;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryPhaseParams;

pub struct QueryPhase;

struct Collected {
    hits: Vec<ScoreDoc>,
    total: u64,
    timed_out: bool,
    terminated_early: Option<bool>,
}

impl ApiOperation<SearchContext, QueryPhaseParams> for QueryPhase {
    type Output = ();
    type Error = SearchError;

    fn execute(context: &mut SearchContext, _parameters: &QueryPhaseParams) -> Result<Self::Output, Self::Error> {
        ensure_pre_processed(context, "query")?;
        context.check_cancelled()?;

        let query = context.query().cloned().unwrap_or(Query::MatchAll);
        let scorer = Scorer::new(context.searcher().clone(), context.dfs_result().get());
        let suggest_only = context.has_only_suggest();

        let (mut collected, aggregations) = if suggest_only {
            (
                Collected {
                    hits: Vec::new(),
                    total: 0,
                    timed_out: false,
                    terminated_early: None,
                },
                None,
            )
        } else {
            collect(context, &query, &scorer)?
        };

        if collected.timed_out {
            warn!("[{}] query phase timed out after {}ms", context.id(), context.relative_time_millis());
        }

        let score_sort = is_score_sort(context.sort());
        sort_hits(context, &mut collected.hits, score_sort);

        if let Some(after) = context.search_after() {
            let effective = context.effective_sort();
            collected
                .hits
                .retain(|hit| sort::compare(&effective, &hit.sort_values, after) == Ordering::Greater);
        }

        if let Some(collapse) = context.collapse() {
            collected.hits = collapse.collapse(std::mem::take(&mut collected.hits), context.searcher());
        }

        for rescore in context.rescore_mut() {
            rescore.rescore(&mut collected.hits, &scorer);
        }

        let max_score = if score_sort || context.track_scores() {
            collected.hits.iter().map(|hit| hit.score).reduce(f32::max)
        } else {
            None
        };

        let total_hits = match context.track_total_hits() {
            TrackTotalHits::Disabled => None,
            TrackTotalHits::Accurate => Some(TotalHits::exact(collected.total)),
            TrackTotalHits::UpTo(bound) if collected.total > bound as u64 => Some(TotalHits::lower_bound(bound as u64)),
            TrackTotalHits::UpTo(_) => Some(TotalHits::exact(collected.total)),
        };

        let suggest = context.suggest().map(|suggest| suggest.execute(context.searcher()));

        let (from, size) = (context.from(), context.size());
        let top_docs: Vec<ScoreDoc> = collected.hits.into_iter().skip(from).take(size).collect();
        let doc_ids: Vec<DocId> = top_docs.iter().map(|hit| hit.doc).collect();

        if context.config().enable_detailed_logging {
            debug!(
                "[{}] query phase: total={} returned={} timed_out={} terminated_early={:?}",
                context.id(),
                collected.total,
                top_docs.len(),
                collected.timed_out,
                collected.terminated_early
            );
        }

        let result = QuerySearchResult {
            context_id: context.id(),
            shard: context.shard_target().clone(),
            from,
            size,
            top_docs,
            total_hits,
            max_score,
            aggregations,
            suggest,
            timed_out: collected.timed_out,
            terminated_early: collected.terminated_early,
            rescore_doc_ids: context.rescore_doc_ids(),
        };
        context.set_doc_ids_to_load(doc_ids);
        context.query_result_mut().set(result)
    }
}

fn collect(
    context: &SearchContext,
    query: &Query,
    scorer: &Scorer,
) -> Result<(Collected, Option<crate::aggregations::AggregationResults>), SearchError> {
    let check = CancellationCheck::new(context);
    let post_filter = context.post_filter();
    let min_score = context.min_score();
    let terminate_after = context.terminate_after();
    let field_sort = !is_score_sort(context.sort()) || context.search_after().is_some();
    let effective_sort = context.effective_sort();
    let mut aggregations = context.aggregations().map(|aggs| aggs.collector());

    let mut collected = Collected {
        hits: Vec::new(),
        total: 0,
        timed_out: false,
        terminated_early: None,
    };

    for doc_id in 0..scorer.searcher().max_doc() {
        if check.due(doc_id as usize) {
            context.check_cancelled()?;
        }
        if check.timeout_due(doc_id as usize) && context.is_timed_out() {
            collected.timed_out = true;
            break;
        }

        let Some(doc) = scorer.doc(doc_id) else { continue };
        let Some(score) = query.score(scorer, doc) else { continue };
        if min_score.is_some_and(|min| score < min) {
            continue;
        }
        if let Some(collector) = aggregations.as_mut() {
            collector.collect(doc);
        }
        if let Some(filter) = post_filter {
            if !filter.matches(scorer, doc) {
                continue;
            }
        }

        let mut hit = ScoreDoc::new(doc_id, score);
        if field_sort {
            hit.sort_values = sort::sort_values(&effective_sort, doc_id, score, doc);
        }
        collected.hits.push(hit);
        collected.total += 1;

        if terminate_after > 0 && collected.total >= terminate_after as u64 {
            collected.terminated_early = Some(true);
            break;
        }
    }
    if terminate_after > 0 && collected.terminated_early.is_none() {
        collected.terminated_early = Some(false);
    }

    Ok((collected, aggregations.map(|collector| collector.finish())))
}

fn sort_hits(context: &SearchContext, hits: &mut [ScoreDoc], score_sort: bool) {
    if score_sort {
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.doc.cmp(&b.doc))
        });
    } else {
        let effective = context.effective_sort();
        hits.sort_by(|a, b| sort::compare(&effective, &a.sort_values, &b.sort_values).then(a.doc.cmp(&b.doc)));
    }
}
