//! Integration tests for end-to-end search execution
//!
//! Requests are parsed from JSON the way they arrive over the wire and run
//! through the service.

use serde_json::json;
use shardsearch::{
    AggregationResult, Query, SearchError, SearchSource, SearchType, ShardSearchRequest, ShardSearchService,
    TotalHits,
};
use std::sync::Arc;

mod common;
use common::{books_target, create_books_shard};

fn json_request(body: &str) -> ShardSearchRequest {
    ShardSearchRequest::new(books_target(), SearchSource::from_json(body).unwrap())
}

#[test]
fn test_sorted_search_with_aggregations() {
    let index = create_books_shard();
    let service = ShardSearchService::new(Arc::clone(&index));

    let response = service
        .execute(json_request(
            r#"{
                "query": {"match": {"field": "title", "query": "rust"}},
                "sort": [{"field": "price", "order": "asc"}],
                "size": 2,
                "track_total_hits": true,
                "aggs": {"categories": {"terms": {"field": "category"}}},
                "_source": ["title"]
            }"#,
        ))
        .unwrap();

    assert_eq!(response.hit_ids(), vec!["5", "1"]);
    assert_eq!(response.query.total_hits, Some(TotalHits::exact(3)));
    assert_eq!(response.query.max_score, None);
    assert_eq!(response.hits()[0].source, Some(json!({"title": "Rust Web Development"})));

    let aggregations = response.query.aggregations.as_ref().unwrap();
    match &aggregations["categories"] {
        AggregationResult::Terms {
            buckets,
            sum_other_doc_count,
        } => {
            let keys: Vec<(&str, u64)> = buckets.iter().map(|b| (b.key.as_str(), b.doc_count)).collect();
            assert_eq!(keys, vec![("systems", 2), ("web", 1)]);
            assert_eq!(*sum_other_doc_count, 0);
        }
        other => panic!("Expected terms aggregation, got {other:?}"),
    }
    assert_eq!(index.open_searchers(), 0);
}

#[test]
fn test_post_filter_applies_after_aggregations() {
    let service = ShardSearchService::new(create_books_shard());
    let response = service
        .execute(json_request(
            r#"{
                "post_filter": {"term": {"field": "category", "value": "systems"}},
                "aggs": {"price": {"stats": {"field": "price"}}}
            }"#,
        ))
        .unwrap();

    assert_eq!(response.hit_ids(), vec!["1", "2"]);
    match &response.query.aggregations.as_ref().unwrap()["price"] {
        AggregationResult::Stats { count, sum, .. } => {
            assert_eq!(*count, 5);
            assert_eq!(*sum, 186.5);
        }
        other => panic!("Expected stats aggregation, got {other:?}"),
    }
}

#[test]
fn test_alias_filter_restricts_matches() {
    let service = ShardSearchService::new(create_books_shard());
    let request = ShardSearchRequest::new(books_target(), SearchSource::new())
        .alias_filter(Query::range("price", None, Some(40.0)));

    let response = service.execute(request).unwrap();
    assert_eq!(response.hit_ids(), vec!["1", "4", "5"]);
}

#[test]
fn test_dfs_search_reports_statistics() {
    let service = ShardSearchService::new(create_books_shard());
    let request = json_request(r#"{"query": {"match": {"field": "title", "query": "rust internals"}}}"#)
        .search_type(SearchType::DfsQueryThenFetch);

    let response = service.execute(request).unwrap();
    let dfs = response.dfs.as_ref().unwrap();
    assert_eq!(dfs.max_doc, 5);
    assert_eq!(dfs.statistics_for("title", "rust").unwrap().doc_freq, 3);
    assert_eq!(dfs.statistics_for("title", "internals").unwrap().doc_freq, 1);
    assert_eq!(response.hits().len(), 4);
}

#[test]
fn test_suggest_only_request_skips_fetch() {
    let service = ShardSearchService::new(create_books_shard());
    let response = service
        .execute(json_request(
            r#"{"suggest": {"text": "rsut", "fix": {"term": {"field": "title"}}}}"#,
        ))
        .unwrap();

    assert!(response.fetch.is_none());
    assert!(response.query.top_docs.is_empty());
    let suggest = response.query.suggest.as_ref().unwrap();
    assert_eq!(suggest["fix"][0].text, "rsut");
    assert_eq!(suggest["fix"][0].options[0].text, "rust");
}

#[test]
fn test_invalid_requests_are_rejected() {
    let service = ShardSearchService::new(create_books_shard());

    assert!(matches!(
        SearchSource::from_json(r#"{"query": {"fuzzy": {}}}"#),
        Err(SearchError::QueryParsing(_))
    ));

    let result = service.execute(json_request(r#"{"from": 9990, "size": 20}"#));
    assert!(matches!(result, Err(SearchError::InvalidInput { .. })));

    let stats = service.stats();
    assert_eq!(stats.searches_failed, 1);
    assert!(stats.failure_rate() > 99.0);
}

#[test]
fn test_response_serializes_to_json() {
    let service = ShardSearchService::new(create_books_shard());
    let response = service
        .execute(json_request(r#"{"query": {"ids": {"values": ["4"]}}, "version": true}"#))
        .unwrap();

    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["shard"]["index"], json!("books"));
    assert_eq!(value["fetch"]["hits"][0]["id"], json!("4"));
    assert_eq!(value["fetch"]["hits"][0]["version"], json!(1));
}
