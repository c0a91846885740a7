//! Central constants for search execution defaults
//!
//! Single source of truth for the default limits shared by configuration,
//! request parsing and the phases.

/// `terminate_after` value meaning "never terminate early"
pub const DEFAULT_TERMINATE_AFTER: usize = 0;

/// Default upper bound for accurate total hit counting
pub const DEFAULT_TRACK_TOTAL_HITS_UP_TO: usize = 10_000;

/// Default number of hits returned when the request does not set `size`
pub const DEFAULT_SIZE: usize = 10;

/// Default maximum value of `from + size`
pub const DEFAULT_MAX_RESULT_WINDOW: usize = 10_000;

/// Default maximum rescore window
pub const DEFAULT_MAX_RESCORE_WINDOW: usize = 10_000;

/// Default number of documents between two cancellation checks
pub const DEFAULT_CANCELLATION_CHECK_INTERVAL: usize = 128;

/// Default rescore window size
pub const DEFAULT_RESCORE_WINDOW_SIZE: usize = 10;

/// Highlight tags used when the request does not provide any
pub mod highlight_tags {
    pub const PRE: &str = "<em>";
    pub const POST: &str = "</em>";
}

/// Reserved sort field names
pub mod sort_fields {
    pub const SCORE: &str = "_score";
    pub const DOC: &str = "_doc";
}
