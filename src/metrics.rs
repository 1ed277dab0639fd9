//! Prometheus metrics collection for trustguard.
//!
//! Exposed at `GET /metrics`. Recording helpers are no-ops until [`init`]
//! has run, so library code and unit tests can call them freely.
//!
//! - `trustguard_auth_failures_total{reason}` - rejected signed requests
//! - `trustguard_rate_limit_denied_total` - requests over the per-IP ceiling
//! - `trustguard_rate_limit_fallback_total` - shared store errors absorbed in memory
//! - `trustguard_bans_created_total{kind}` - ban records written
//! - `trustguard_cascades_total{outcome}` - cascade invocations
//! - `trustguard_verifications_total{outcome}` - verification attempts

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Signed requests rejected, by failure code.
pub static AUTH_FAILURES: OnceLock<IntCounterVec> = OnceLock::new();

/// Requests denied by the per-IP limiter.
pub static RATE_LIMIT_DENIED: OnceLock<IntCounter> = OnceLock::new();

/// Increments served by the in-memory store because the shared store failed.
pub static RATE_LIMIT_FALLBACK: OnceLock<IntCounter> = OnceLock::new();

/// Ban records written, by target kind (USER, IP, DEVICE).
pub static BANS_CREATED: OnceLock<IntCounterVec> = OnceLock::new();

/// Cascade invocations by outcome.
pub static CASCADES: OnceLock<IntCounterVec> = OnceLock::new();

/// Verification attempts by outcome.
pub static VERIFICATIONS: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// Wall time of a whole cascade, lock wait included.
pub static CASCADE_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Call once at startup. Later calls keep the first registration.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                match $init {
                    Ok(m) => {
                        if let Err(e) = r.register(Box::new(m.clone())) {
                            tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                        }
                        let _ = $metric.set(m);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                    }
                }
            }
        };
    }

    register!(AUTH_FAILURES, IntCounterVec::new(Opts::new("trustguard_auth_failures_total", "Signed requests rejected by reason"), &["reason"]));
    register!(RATE_LIMIT_DENIED, IntCounter::new("trustguard_rate_limit_denied_total", "Requests denied by the per-IP limiter"));
    register!(RATE_LIMIT_FALLBACK, IntCounter::new("trustguard_rate_limit_fallback_total", "Rate limit increments served from memory after a shared store error"));
    register!(BANS_CREATED, IntCounterVec::new(Opts::new("trustguard_bans_created_total", "Ban records written by target kind"), &["kind"]));
    register!(CASCADES, IntCounterVec::new(Opts::new("trustguard_cascades_total", "Ban cascade invocations by outcome"), &["outcome"]));
    register!(VERIFICATIONS, IntCounterVec::new(Opts::new("trustguard_verifications_total", "Verification attempts by outcome"), &["outcome"]));
    register!(CASCADE_DURATION, Histogram::with_opts(
        HistogramOpts::new("trustguard_cascade_duration_seconds", "Ban cascade wall time")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

#[inline]
pub fn record_auth_failure(reason: &str) {
    if let Some(c) = AUTH_FAILURES.get() {
        c.with_label_values(&[reason]).inc();
    }
}

#[inline]
pub fn record_rate_limit_denied() {
    if let Some(c) = RATE_LIMIT_DENIED.get() {
        c.inc();
    }
}

#[inline]
pub fn record_rate_limit_fallback() {
    if let Some(c) = RATE_LIMIT_FALLBACK.get() {
        c.inc();
    }
}

/// Record one ban record of `kind` (USER, IP or DEVICE).
#[inline]
pub fn record_ban_created(kind: &str) {
    if let Some(c) = BANS_CREATED.get() {
        c.with_label_values(&[kind]).inc();
    }
}

/// Record a finished cascade and how long it took.
#[inline]
pub fn record_cascade(outcome: &str, duration_secs: f64) {
    if let Some(c) = CASCADES.get() {
        c.with_label_values(&[outcome]).inc();
    }
    if let Some(h) = CASCADE_DURATION.get() {
        h.observe(duration_secs);
    }
}

#[inline]
pub fn record_verification(outcome: &str) {
    if let Some(c) = VERIFICATIONS.get() {
        c.with_label_values(&[outcome]).inc();
    }
}
