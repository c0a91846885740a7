//! Common test utilities for integration tests
//!
//! Integration tests cannot reach the crate's private test_utils module, so
//! the shared fixtures live here.

use serde_json::json;
use shardsearch::{ShardIndex, ShardTarget};
use std::sync::Arc;
use tempfile::TempDir;

/// Error messages for consistent test error reporting
pub mod test_error_messages {
    pub const FAILED_TO_CREATE_TEMP_DIR: &str = "Failed to create test temporary directory";
    pub const FAILED_TO_INDEX_DOCUMENT: &str = "Failed to index test document";
}

/// Test environment with an isolated temporary directory
#[allow(dead_code)]
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub test_name: String,
}

#[allow(dead_code)]
impl TestEnvironment {
    pub fn new(test_name: &str) -> Self {
        let temp_dir = TempDir::new()
            .unwrap_or_else(|e| panic!("{} for test {}: {}", test_error_messages::FAILED_TO_CREATE_TEMP_DIR, test_name, e));

        Self {
            temp_dir,
            test_name: test_name.to_string(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

pub fn books_target() -> ShardTarget {
    ShardTarget::new("books", 0)
}

/// Five books across four categories, ids "1" to "5"
#[allow(dead_code)]
pub fn create_books_shard() -> Arc<ShardIndex> {
    let mut index = ShardIndex::new(books_target());
    let books = [
        ("1", json!({"title": "Rust in Action", "category": "systems", "tags": ["rust", "systems"], "price": 39.5, "year": 2021})),
        ("2", json!({"title": "Programming Rust", "category": "systems", "tags": ["rust"], "price": 44.0, "year": 2021})),
        ("3", json!({"title": "Designing Data Systems", "category": "database", "tags": ["databases", "distributed"], "price": 49.0, "year": 2017})),
        ("4", json!({"title": "Database Internals", "category": "storage", "tags": ["databases", "storage"], "price": 29.0, "year": 2019})),
        ("5", json!({"title": "Rust Web Development", "category": "web", "tags": ["rust", "web"], "price": 25.0, "year": 2023})),
    ];
    for (id, source) in books {
        index
            .index_document(id, source)
            .expect(test_error_messages::FAILED_TO_INDEX_DOCUMENT);
    }
    index.into_shared()
}

/// A shard of `count` generated log lines, large enough for searches to
/// take noticeable time
#[allow(dead_code)]
pub fn create_large_shard(count: usize) -> Arc<ShardIndex> {
    let mut index = ShardIndex::new(books_target());
    let levels = ["info", "warn", "error", "debug"];
    for i in 0..count {
        let source = json!({
            "message": format!("request {} handled by worker {} in {} ms", i, i % 17, i % 250),
            "level": levels[i % levels.len()],
            "latency": (i % 250) as f64,
        });
        index
            .index_document(i.to_string(), source)
            .expect(test_error_messages::FAILED_TO_INDEX_DOCUMENT);
    }
    index.into_shared()
}
