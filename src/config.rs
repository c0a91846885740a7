//! Configuration for search execution
//!
//! This module provides the configuration used by the search service and the
//! contexts it creates, including parameter validation and builder methods.

use crate::constants::{
    DEFAULT_CANCELLATION_CHECK_INTERVAL, DEFAULT_MAX_RESCORE_WINDOW, DEFAULT_MAX_RESULT_WINDOW, DEFAULT_SIZE,
    DEFAULT_TERMINATE_AFTER, DEFAULT_TRACK_TOTAL_HITS_UP_TO,
};
use crate::error::SearchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by all search contexts of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of hits returned when a request does not set `size`
    pub default_size: usize,
    /// Maximum allowed value of `from + size`
    pub max_result_window: usize,
    /// Maximum allowed rescore window
    pub max_rescore_window: usize,
    /// Timeout applied when the request does not set one; `None` disables it
    pub default_timeout_ms: Option<u64>,
    /// `terminate_after` applied when the request does not set one
    pub default_terminate_after: usize,
    /// Upper bound for total hit counting when the request does not say otherwise
    pub default_track_total_hits_up_to: usize,
    /// Poll for cancellation while iterating documents, not only between phases
    pub low_level_cancellation: bool,
    /// Number of documents processed between two cancellation checks
    pub cancellation_check_interval: usize,
    /// Enable detailed per-phase logging
    pub enable_detailed_logging: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_SIZE,
            max_result_window: DEFAULT_MAX_RESULT_WINDOW,
            max_rescore_window: DEFAULT_MAX_RESCORE_WINDOW,
            default_timeout_ms: None,
            default_terminate_after: DEFAULT_TERMINATE_AFTER,
            default_track_total_hits_up_to: DEFAULT_TRACK_TOTAL_HITS_UP_TO,
            low_level_cancellation: true,
            cancellation_check_interval: DEFAULT_CANCELLATION_CHECK_INTERVAL,
            enable_detailed_logging: false,
        }
    }
}

impl SearchConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default number of hits
    pub fn default_size(mut self, size: usize) -> Self {
        self.default_size = size;
        self
    }

    /// Set the maximum result window
    pub fn max_result_window(mut self, window: usize) -> Self {
        self.max_result_window = window;
        self
    }

    /// Set the maximum rescore window
    pub fn max_rescore_window(mut self, window: usize) -> Self {
        self.max_rescore_window = window;
        self
    }

    /// Set the default timeout
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Set the default terminate-after count
    pub fn default_terminate_after(mut self, terminate_after: usize) -> Self {
        self.default_terminate_after = terminate_after;
        self
    }

    /// Set the default bound for total hit counting
    pub fn default_track_total_hits_up_to(mut self, up_to: usize) -> Self {
        self.default_track_total_hits_up_to = up_to;
        self
    }

    /// Enable or disable low-level cancellation checks
    pub fn low_level_cancellation(mut self, enabled: bool) -> Self {
        self.low_level_cancellation = enabled;
        self
    }

    /// Set the number of documents between cancellation checks
    pub fn cancellation_check_interval(mut self, interval: usize) -> Self {
        self.cancellation_check_interval = interval;
        self
    }

    /// Enable or disable detailed logging
    pub fn enable_detailed_logging(mut self, enabled: bool) -> Self {
        self.enable_detailed_logging = enabled;
        self
    }

    /// The default timeout as a duration
    pub fn default_timeout_duration(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.max_result_window == 0 {
            return Err(SearchError::config_error(
                "max_result_window",
                "must be greater than 0",
                "Set max_result_window to the deepest page you want to serve (default: 10000)",
            ));
        }

        if self.default_size > self.max_result_window {
            return Err(SearchError::config_error(
                "default_size",
                format!(
                    "value {} exceeds max_result_window {}",
                    self.default_size, self.max_result_window
                ),
                "Lower default_size or raise max_result_window",
            ));
        }

        if self.max_rescore_window == 0 {
            return Err(SearchError::config_error(
                "max_rescore_window",
                "must be greater than 0",
                "Set max_rescore_window to at least the largest rescore window_size you accept",
            ));
        }

        if self.default_timeout_ms == Some(0) {
            return Err(SearchError::config_error(
                "default_timeout_ms",
                "must be greater than 0 when set",
                "Leave default_timeout_ms unset to disable the timeout",
            ));
        }

        if self.cancellation_check_interval == 0 {
            return Err(SearchError::config_error(
                "cancellation_check_interval",
                "must be greater than 0",
                "Set cancellation_check_interval to a positive number of documents (recommended: 64-1024)",
            ));
        }

        Ok(())
    }

    /// Build the configuration after validation
    pub fn build(self) -> Result<Self, SearchError> {
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_size, 10);
        assert_eq!(config.max_result_window, 10_000);
        assert_eq!(config.default_terminate_after, 0);
        assert!(config.default_timeout_duration().is_none());
    }

    #[test]
    fn test_builder_methods() {
        let config = SearchConfig::new()
            .default_size(20)
            .max_result_window(500)
            .max_rescore_window(50)
            .default_timeout(Some(Duration::from_millis(250)))
            .default_terminate_after(1000)
            .default_track_total_hits_up_to(100)
            .low_level_cancellation(false)
            .cancellation_check_interval(16)
            .enable_detailed_logging(true)
            .build()
            .unwrap();

        assert_eq!(config.default_size, 20);
        assert_eq!(config.max_result_window, 500);
        assert_eq!(config.max_rescore_window, 50);
        assert_eq!(config.default_timeout_duration(), Some(Duration::from_millis(250)));
        assert_eq!(config.default_terminate_after, 1000);
        assert_eq!(config.default_track_total_hits_up_to, 100);
        assert!(!config.low_level_cancellation);
        assert_eq!(config.cancellation_check_interval, 16);
        assert!(config.enable_detailed_logging);
    }

    #[test]
    fn test_validation_failures() {
        assert!(SearchConfig::new().max_result_window(0).validate().is_err());
        assert!(SearchConfig::new().default_size(50).max_result_window(10).validate().is_err());
        assert!(SearchConfig::new().max_rescore_window(0).validate().is_err());
        assert!(SearchConfig::new().cancellation_check_interval(0).validate().is_err());
        assert!(SearchConfig::new()
            .default_timeout(Some(Duration::ZERO))
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SearchConfig = serde_json::from_str(r#"{"default_size": 25}"#).unwrap();
        assert_eq!(config.default_size, 25);
        assert_eq!(config.max_result_window, 10_000);
        assert!(config.low_level_cancellation);
    }
}
