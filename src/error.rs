//! Error types for shard search execution
//!
//! This module defines the error type used throughout the crate, providing
//! clear error messages and proper error chaining support.

use thiserror::Error;

/// Main error type for all search execution operations
#[derive(Debug, Error)]
pub enum SearchError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input validation failed
    #[error("Invalid input: {field} - {reason}. {suggestion}")]
    InvalidInput {
        field: String,
        reason: String,
        suggestion: String,
    },

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Query could not be parsed or built
    #[error("Query parsing error: {0}")]
    QueryParsing(String),

    /// The search context was closed while work was still outstanding
    #[error("Search context {context_id} is closed")]
    ContextClosed { context_id: String },

    /// The owning task was cancelled
    #[error("Task cancelled: {reason}")]
    TaskCancelled { reason: String },

    /// The request exceeded its time budget
    #[error("Search timed out after {elapsed_ms}ms (timeout {timeout_ms}ms)")]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },

    /// A search phase failed
    #[error("{phase} phase failed: {reason}")]
    PhaseFailed { phase: String, reason: String },

    /// A write-once result sink was written twice
    #[error("Result of the {phase} phase has already been set")]
    ResultAlreadySet { phase: String },

    /// One or more resources failed to release
    #[error("Failed to release {count} resource(s): {details}")]
    ReleaseFailed { count: usize, details: String },

    /// Persisted data failed an integrity check
    #[error("Corruption detected: {0}")]
    Corruption(String),
}

impl SearchError {
    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a detailed config error
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config(format!("{} - {}: {}", field.into(), reason.into(), suggestion.into()))
    }

    /// Create a context closed error
    pub fn context_closed(context_id: impl ToString) -> Self {
        Self::ContextClosed {
            context_id: context_id.to_string(),
        }
    }

    /// Create a task cancelled error
    pub fn task_cancelled(reason: impl Into<String>) -> Self {
        Self::TaskCancelled { reason: reason.into() }
    }

    /// Create a phase failure error
    pub fn phase_failed(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PhaseFailed {
            phase: phase.into(),
            reason: reason.into(),
        }
    }

    /// Create a result already set error
    pub fn result_already_set(phase: impl Into<String>) -> Self {
        Self::ResultAlreadySet { phase: phase.into() }
    }

    /// Check if this error was caused by cancellation or context shutdown
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::TaskCancelled { .. } | Self::ContextClosed { .. })
    }

    /// Check if this error represents a condition a caller may retry
    ///
    /// Phases are never retried internally; this only classifies the error
    /// for the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_) | Self::TaskCancelled { .. })
    }

    /// Add operation context to an error, preserving the original error information
    pub fn with_operation_context(self, operation: &str, additional_context: &str) -> Self {
        let context = format!("{}: {}", operation, additional_context);

        match self {
            Self::Io(ref err) => Self::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err))),
            Self::Config(ref msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::QueryParsing(ref msg) => Self::QueryParsing(format!("{}: {}", context, msg)),
            Self::Corruption(ref msg) => Self::Corruption(format!("{}: {}", context, msg)),
            Self::InvalidInput {
                field,
                reason,
                suggestion,
            } => Self::InvalidInput {
                field,
                reason: format!("{}: {}", context, reason),
                suggestion,
            },
            Self::PhaseFailed { phase, reason } => Self::PhaseFailed {
                phase,
                reason: format!("{}: {}", context, reason),
            },
            _ => self,
        }
    }
}
