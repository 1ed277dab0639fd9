//! Tracing setup and span constructors.

use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise everything logs at `info`.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

/// Guard that records cascade latency and outcome when dropped.
pub struct CascadeTimer {
    start: Instant,
    outcome: &'static str,
}

impl CascadeTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            outcome: "error",
        }
    }

    /// Outcome label reported on drop. Defaults to `error`.
    pub fn set_outcome(&mut self, outcome: &'static str) {
        self.outcome = outcome;
    }
}

impl Drop for CascadeTimer {
    fn drop(&mut self) {
        crate::metrics::record_cascade(self.outcome, self.start.elapsed().as_secs_f64());
    }
}

/// Standardized spans for request handling.
pub mod spans {
    use tracing::{Span, info_span};
    use uuid::Uuid;

    /// Span for one moderation request.
    pub fn moderation(request_id: Uuid, user: &str) -> Span {
        info_span!("moderation", request_id = %request_id, user = %user)
    }

    /// Span for one verification request.
    pub fn verification(request_id: Uuid, user: &str) -> Span {
        info_span!("verification", request_id = %request_id, user = %user)
    }
}
