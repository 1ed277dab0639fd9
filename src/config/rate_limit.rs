//! Rate limiting configuration for signed routes.

use serde::Deserialize;

/// Per-caller request ceilings.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per caller IP within one window (default: 20).
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Window length in seconds (default: 60).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Keys tracked by the in-process store before the oldest is evicted
    /// (default: 1000).
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    /// Shared Redis store for multi-instance deployments.
    /// When unset, counters live in process memory.
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            memory_capacity: default_memory_capacity(),
            redis_url: None,
        }
    }
}

fn default_max_requests() -> u64 {
    20
}

fn default_window_secs() -> u64 {
    60
}

fn default_memory_capacity() -> usize {
    1000
}
