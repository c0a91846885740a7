//! Integration tests for search context lifecycle
//!
//! Covers release ordering, exactly-once release under concurrent close and
//! the behavior of a context after it was closed.

use apithing::ApiOperation;
use parking_lot::Mutex;
use shardsearch::{
    PreProcess, PreProcessParams, Query, QueryPhase, QueryPhaseParams, ReleaseFn, SearchConfig, SearchContext,
    SearchError, SearchSource, ShardIndex, ShardSearchRequest, ShardSearchService,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

mod common;
use common::{books_target, create_books_shard};

fn new_context(source: SearchSource) -> (Arc<ShardIndex>, SearchContext) {
    let index = create_books_shard();
    let (searcher, lease) = index.acquire_searcher();
    let context = SearchContext::new(ShardSearchRequest::new(books_target(), source), searcher, SearchConfig::default());
    context.add_releasable(Box::new(lease)).unwrap();
    (index, context)
}

#[test]
fn test_resources_release_in_registration_order() {
    let (index, context) = new_context(SearchSource::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        context
            .add_releasable(Box::new(ReleaseFn::new(name, move || {
                order.lock().push(name);
                Ok(())
            })))
            .unwrap();
    }
    assert_eq!(context.pending_releasables(), 4);

    context.close().unwrap();
    assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    assert_eq!(context.pending_releasables(), 0);
    assert_eq!(index.open_searchers(), 0);
}

#[test]
fn test_concurrent_close_releases_once() {
    let (index, context) = new_context(SearchSource::new());
    let releases = Arc::new(AtomicUsize::new(0));
    {
        let releases = Arc::clone(&releases);
        context
            .add_releasable(Box::new(ReleaseFn::new("counter", move || {
                releases.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();
    }

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let handle = context.handle();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                handle.close()
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap().unwrap();
    }
    drop(context);

    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(index.open_searchers(), 0);
}

#[test]
fn test_failing_resource_does_not_block_the_rest() {
    let (index, context) = new_context(SearchSource::new());
    let released = Arc::new(AtomicUsize::new(0));

    context
        .add_releasable(Box::new(ReleaseFn::new("broken", || {
            Err(SearchError::phase_failed("release", "simulated failure"))
        })))
        .unwrap();
    {
        let released = Arc::clone(&released);
        context
            .add_releasable(Box::new(ReleaseFn::new("healthy", move || {
                released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
            .unwrap();
    }

    match context.close() {
        Err(SearchError::ReleaseFailed { count, details }) => {
            assert_eq!(count, 1);
            assert!(details.contains("broken"));
        }
        other => panic!("Expected ReleaseFailed, got {other:?}"),
    }
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(index.open_searchers(), 0);
    assert!(context.close().is_ok());
}

#[test]
fn test_registration_after_close_releases_immediately() {
    let (_index, context) = new_context(SearchSource::new());
    context.close().unwrap();

    let released = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&released);
    let result = context.add_releasable(Box::new(ReleaseFn::new("late", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })));

    assert!(matches!(result, Err(SearchError::ContextClosed { .. })));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_closed_context_refuses_to_run_phases() {
    let (_index, mut context) = new_context(SearchSource::new().query(Query::term("category", "web")));
    PreProcess::execute(&mut context, &PreProcessParams::default()).unwrap();
    context.handle().close().unwrap();

    assert!(context.is_cancelled());
    let result = QueryPhase::execute(&mut context, &QueryPhaseParams);
    assert!(result.unwrap_err().is_cancellation());
}

#[test]
fn test_dropping_context_deregisters_from_service() {
    let index = create_books_shard();
    let service = ShardSearchService::new(Arc::clone(&index));

    let contexts: Vec<_> = (0..4)
        .map(|_| service.create_context(ShardSearchRequest::new(books_target(), SearchSource::new())).unwrap())
        .collect();
    assert_eq!(service.active_contexts().len(), 4);
    assert_eq!(index.open_searchers(), 4);

    drop(contexts);
    assert!(service.active_contexts().is_empty());
    assert_eq!(index.open_searchers(), 0);
    assert_eq!(service.stats().contexts_created, 4);
}
