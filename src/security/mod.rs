//! Security primitives for trustguard.
//!
//! - **Fingerprints**: salted HMAC-SHA256 hashing of IP and device signals,
//!   plus reversible AES-256-GCM encryption keyed from the same salt
//! - **Rate Limiting**: fixed-window counters behind a pluggable store
//!   (process memory, Redis, or Redis with memory fallback)
//! - **Signing**: the HMAC request-signing scheme shared by callers and the
//!   server
//! - **Request Auth**: the ordered check chain every service call passes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Security Module                         │
//! ├──────────────┬───────────────┬──────────────┬────────────────┤
//! │ Fingerprint  │ Rate Limiting │   Signing    │  Request Auth  │
//! │ HMAC-SHA256  │ Memory/Redis  │ HMAC-SHA256  │ allowlist →    │
//! │ AES-256-GCM  │ Fallback      │ body SHA-256 │ rate → ts → key│
//! │              │               │              │ → hash → sig   │
//! └──────────────┴───────────────┴──────────────┴────────────────┘
//! ```

pub mod fingerprint;
pub mod rate_limit;
pub mod request_auth;
pub mod signing;

pub use fingerprint::{FingerprintHasher, HasherError, RawSignal};
pub use rate_limit::{
    CounterStore, FallbackStore, MemoryStore, RateDecision, RateLimitError, RateLimiter,
    RedisStore,
};
pub use request_auth::{AuthFailure, Authenticated, RequestAuthenticator, RequestEvidence};
pub use signing::SignedHeaders;
