//! Request signing shared by trusted callers and the authenticator.
//!
//! A signed request carries four headers:
//!
//! ```text
//! Authorization:        Bearer <api key>
//! X-Request-Timestamp:  <unix seconds>
//! X-Body-Hash:          hex(SHA-256(raw body))
//! X-Signature:          hex(HMAC-SHA256(signing secret, "<timestamp>:<body hash>"))
//! ```

use http::{HeaderMap, HeaderValue};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_TIMESTAMP: &str = "x-request-timestamp";
pub const HEADER_BODY_HASH: &str = "x-body-hash";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const BEARER_PREFIX: &str = "Bearer ";

/// Hex SHA-256 of a raw request body.
pub fn body_hash(body: &[u8]) -> String {
    hex::encode(&Sha256::digest(body))
}

/// The exact bytes covered by the signature.
pub fn signing_payload(timestamp: &str, body_hash: &str) -> String {
    format!("{}:{}", timestamp, body_hash)
}

/// Pre-keyed MAC over the signing payload.
///
/// HMAC accepts keys of any length, so this only fails on an empty key.
pub(crate) fn keyed_mac(secret: &[u8], timestamp: &str, body_hash: &str) -> Option<HmacSha256> {
    if secret.is_empty() {
        return None;
    }
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).ok()?;
    mac.update(signing_payload(timestamp, body_hash).as_bytes());
    Some(mac)
}

/// Hex HMAC-SHA256 signature for `timestamp:body_hash`.
pub fn sign(secret: &[u8], timestamp: &str, body_hash: &str) -> Option<String> {
    keyed_mac(secret, timestamp, body_hash).map(|mac| hex::encode(&mac.finalize().into_bytes()))
}

/// Header values for one signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub timestamp: String,
    pub body_hash: String,
    pub signature: String,
}

impl SignedHeaders {
    /// Sign `body` at `timestamp` (unix seconds).
    pub fn new(api_key: &str, secret: &[u8], body: &[u8], timestamp: i64) -> Option<Self> {
        let timestamp = timestamp.to_string();
        let body_hash = body_hash(body);
        let signature = sign(secret, &timestamp, &body_hash)?;
        Some(Self {
            authorization: format!("{}{}", BEARER_PREFIX, api_key),
            timestamp,
            body_hash,
            signature,
        })
    }

    /// Sign `body` with the current time.
    pub fn now(api_key: &str, secret: &[u8], body: &[u8]) -> Option<Self> {
        Self::new(api_key, secret, body, chrono::Utc::now().timestamp())
    }

    /// Write the headers into `headers`. Values that are not valid header
    /// text are skipped, which the receiver rejects as unauthenticated.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let pairs = [
            (HEADER_AUTHORIZATION, &self.authorization),
            (HEADER_TIMESTAMP, &self.timestamp),
            (HEADER_BODY_HASH, &self.body_hash),
            (HEADER_SIGNATURE, &self.signature),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
    }
}
