//! Test utilities
//!
//! RAII temporary directories for persistence tests and a small, fixed
//! sample shard that the unit tests of the query, sub-phase and phase
//! modules share.

use crate::identifiers::ShardTarget;
use crate::index::ShardIndex;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// RAII-based test environment for isolated testing
///
/// Each test gets its own temporary directory, removed when the environment
/// is dropped.
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub test_name: String,
}

impl TestEnvironment {
    /// # Panics
    /// Panics if unable to create temporary directory
    pub fn new(test_name: &str) -> Self {
        let temp_dir = TempDir::new()
            .unwrap_or_else(|e| panic!("Failed to create temp dir for test {}: {}", test_name, e));

        Self {
            temp_dir,
            test_name: test_name.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn path_buf(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }
}

/// Documents of the sample shard, in indexing order (doc ids 0..5)
pub fn sample_documents() -> Vec<(&'static str, serde_json::Value)> {
    vec![
        (
            "1",
            json!({"title": "Rust in Action", "category": "systems", "tags": ["rust", "systems"],
                   "price": 39.5, "year": 2021, "author": "Tim McNamara"}),
        ),
        (
            "2",
            json!({"title": "Programming Rust", "category": "systems", "tags": ["rust"],
                   "price": 44.0, "year": 2021, "author": "Jim Blandy"}),
        ),
        (
            "3",
            json!({"title": "Designing Databases", "category": "database", "tags": ["databases", "distributed"],
                   "price": 49.0, "year": 2017}),
        ),
        (
            "4",
            json!({"title": "Database Internals", "category": "storage", "tags": ["databases", "storage"],
                   "price": 29.0, "year": 2019, "discontinued": true}),
        ),
        (
            "5",
            json!({"title": "Rust Web Development", "category": "web", "tags": ["rust", "web"],
                   "price": 25.0, "year": 2023}),
        ),
    ]
}

/// Five books on shard `[books][0]`
pub fn sample_shard() -> Arc<ShardIndex> {
    let mut index = ShardIndex::new(ShardTarget::new("books", 0));
    for (id, source) in sample_documents() {
        index
            .index_document(id, source)
            .unwrap_or_else(|e| panic!("Failed to index sample document {}: {}", id, e));
    }
    index.into_shared()
}

/// `count` generated log lines on shard `[books][0]`
pub fn large_shard(count: usize) -> Arc<ShardIndex> {
    let mut index = ShardIndex::new(ShardTarget::new("books", 0));
    for i in 0..count {
        let source = json!({
            "message": format!("request {} handled by worker {}", i, i % 17),
            "latency": (i % 250) as f64,
        });
        index
            .index_document(i.to_string(), source)
            .unwrap_or_else(|e| panic!("Failed to index generated document {}: {}", i, e));
    }
    index.into_shared()
}
