//! Security configuration: fingerprint salt, request signing, caller allowlist.
//!
//! Rotating `salt` invalidates every stored fingerprint and every reversible
//! ciphertext. Rotating `signing_secret` invalidates all outstanding request
//! signatures. Both are read once at startup.

use serde::Deserialize;

/// Security configuration for fingerprinting and service-to-service calls.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Secret key for fingerprint HMACs and reversible IP encryption.
    /// Required: there is no fallback value.
    #[serde(default)]
    pub salt: Option<String>,
    /// Shared secret for `X-Signature` HMACs.
    #[serde(default)]
    pub signing_secret: Option<String>,
    /// Valid bearer credentials. More than one allows key rotation.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Caller IPs (or CIDR ranges) allowed to reach signed routes.
    /// Empty means any caller.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// Maximum clock skew / replay window for `X-Request-Timestamp`.
    #[serde(default = "default_timestamp_window")]
    pub timestamp_window_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            salt: None,
            signing_secret: None,
            api_keys: Vec::new(),
            allowed_ips: Vec::new(),
            timestamp_window_secs: default_timestamp_window(),
        }
    }
}

fn default_timestamp_window() -> u64 {
    300
}
