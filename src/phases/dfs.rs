//! DFS phase: term statistics for globally consistent scoring

use super::ensure_pre_processed;
use crate::context::SearchContext;
use crate::error::SearchError;
use crate::results::DfsSearchResult;
use apithing::ApiOperation;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DfsPhaseParams;

/// Collects document and term frequencies of every term in the query and
/// the rescore queries
pub struct DfsPhase;

impl ApiOperation<SearchContext, DfsPhaseParams> for DfsPhase {
    type Output = ();
    type Error = SearchError;

    fn execute(context: &mut SearchContext, _parameters: &DfsPhaseParams) -> Result<Self::Output, Self::Error> {
        ensure_pre_processed(context, "dfs")?;
        context.check_cancelled()?;

        let mut terms = context.query_terms();
        for rescore in context.rescore() {
            let mut rescore_terms = BTreeSet::new();
            rescore.query().extract_terms(&mut rescore_terms);
            terms.extend(rescore_terms);
        }

        let searcher = context.searcher();
        let mut term_statistics: BTreeMap<String, BTreeMap<_, _>> = BTreeMap::new();
        for (field, term) in terms {
            let stats = searcher.term_statistics(&field, &term);
            term_statistics.entry(field).or_default().insert(term, stats);
        }

        let result = DfsSearchResult {
            context_id: context.id(),
            shard: context.shard_target().clone(),
            max_doc: u64::from(searcher.max_doc()),
            term_statistics,
        };
        debug!(
            "[{}] dfs phase collected statistics for {} field(s)",
            context.id(),
            result.term_statistics.len()
        );
        context.dfs_result_mut().set(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::identifiers::ShardTarget;
    use crate::phases::{PreProcess, PreProcessParams};
    use crate::query::Query;
    use crate::request::{SearchSource, ShardSearchRequest};
    use crate::rescore::RescoreSpec;
    use crate::test_utils::sample_shard;

    fn context(source: SearchSource) -> SearchContext {
        let index = sample_shard();
        let (searcher, _lease) = index.acquire_searcher();
        let request = ShardSearchRequest::new(ShardTarget::new("books", 0), source);
        SearchContext::new(request, searcher, SearchConfig::default())
    }

    #[test]
    fn test_collects_query_and_rescore_terms() {
        let source = SearchSource::new()
            .query(Query::matches_text("title", "rust databases"))
            .rescore(RescoreSpec::new(Query::term("category", "web")));
        let mut context = context(source);
        PreProcess::execute(&mut context, &PreProcessParams::default()).unwrap();
        DfsPhase::execute(&mut context, &DfsPhaseParams).unwrap();

        let dfs = context.dfs_result().get().unwrap();
        assert_eq!(dfs.max_doc, 5);
        assert_eq!(dfs.statistics_for("title", "rust").unwrap().doc_freq, 3);
        assert_eq!(dfs.statistics_for("title", "databases").unwrap().doc_freq, 1);
        assert_eq!(dfs.statistics_for("category", "web").unwrap().doc_freq, 1);
    }

    #[test]
    fn test_requires_pre_process() {
        let mut context = context(SearchSource::new());
        assert!(matches!(
            DfsPhase::execute(&mut context, &DfsPhaseParams),
            Err(SearchError::PhaseFailed { .. })
        ));
    }

    #[test]
    fn test_second_run_is_rejected() {
        let mut context = context(SearchSource::new().query(Query::term("title", "rust")));
        PreProcess::execute(&mut context, &PreProcessParams::default()).unwrap();
        DfsPhase::execute(&mut context, &DfsPhaseParams).unwrap();
        assert!(matches!(
            DfsPhase::execute(&mut context, &DfsPhaseParams),
            Err(SearchError::ResultAlreadySet { .. })
        ));
    }
}
