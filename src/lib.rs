//! trustguard - trust and moderation core.
//!
//! Hashes IP and device fingerprints, authenticates signed service calls,
//! verifies users against their fingerprints, and bans users together with
//! every alt account that shares a fingerprint with them.

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod metrics;
pub mod moderation;
pub mod security;
pub mod telemetry;

pub use client::SignedApiClient;
pub use config::Config;
pub use db::Database;
pub use crate::http::{AppState, router};
