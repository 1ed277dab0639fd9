//! Fingerprint hashing - stable comparison keys for IP and device signals.
//!
//! # Security Model
//!
//! - HMAC-SHA256 keyed by the server salt, never a plain hash: a digest cannot
//!   be reproduced (or brute-forced from the small IPv4 space) without the salt
//! - Deterministic: same raw input + salt always produces the same key, so
//!   fingerprints are content-addressed in the store
//! - Structured device signals are canonicalized (sorted object keys) first
//!
//! A reversible mode (AES-256-GCM, fresh nonce per call) exists for values an
//! authorized process must later recover in cleartext. Rotating the salt
//! invalidates both every stored digest and every stored ciphertext.
//!
//! # Format
//!
//! - Digest: 64 lowercase hex characters
//! - Ciphertext: `hex(nonce):hex(ciphertext||tag)`

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Prefix the kernel puts on IPv4 peers seen through a dual-stack socket.
const IPV4_MAPPED_PREFIX: &str = "::ffff:";

/// Errors from fingerprint hashing and reversible encryption.
#[derive(Debug, Error)]
pub enum HasherError {
    #[error("salt is not configured")]
    MissingSalt,
    #[error("invalid salt: {0}")]
    InvalidSalt(String),
    #[error("malformed ciphertext")]
    MalformedCiphertext,
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed: ciphertext rejected")]
    Decryption,
    #[error("decrypted value is not UTF-8")]
    NotUtf8,
}

/// Raw signal accepted for hashing.
///
/// Devices report either a single opaque string, a list of signal strings, or
/// an arbitrary JSON object of named signals.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawSignal {
    Text(String),
    List(Vec<String>),
    Object(Map<String, Value>),
}

impl RawSignal {
    /// Stable byte representation fed to the HMAC.
    ///
    /// Strings hash as-is; lists and objects hash as canonical JSON.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            RawSignal::Text(s) => s.as_bytes().to_vec(),
            RawSignal::List(items) => {
                let values: Vec<Value> = items.iter().cloned().map(Value::String).collect();
                let mut out = String::new();
                write_canonical(&Value::Array(values), &mut out);
                out.into_bytes()
            }
            RawSignal::Object(map) => {
                let mut out = String::new();
                write_canonical(&Value::Object(map.clone()), &mut out);
                out.into_bytes()
            }
        }
    }

    /// An empty string, empty list, or empty object carries no signal.
    pub fn is_empty(&self) -> bool {
        match self {
            RawSignal::Text(s) => s.trim().is_empty(),
            RawSignal::List(items) => items.is_empty(),
            RawSignal::Object(map) => map.is_empty(),
        }
    }
}

impl From<&str> for RawSignal {
    fn from(value: &str) -> Self {
        RawSignal::Text(value.to_string())
    }
}

/// Serialize JSON with object keys in sorted order at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Salted hasher and cipher for fingerprint material.
///
/// Built once at startup from configuration and shared read-only.
#[derive(Clone)]
pub struct FingerprintHasher {
    /// Pre-keyed MAC, cloned per digest.
    mac: HmacSha256,
    /// SHA-256(salt), the AES-256 key.
    cipher_key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintHasher").finish_non_exhaustive()
    }
}

impl FingerprintHasher {
    /// Create a hasher. An empty salt is rejected; there is no default.
    pub fn new(salt: &str) -> Result<Self, HasherError> {
        if salt.is_empty() {
            return Err(HasherError::MissingSalt);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(salt.as_bytes())
            .map_err(|e| HasherError::InvalidSalt(e.to_string()))?;
        let mut cipher_key = [0u8; 32];
        cipher_key.copy_from_slice(&Sha256::digest(salt.as_bytes()));

        Ok(Self {
            mac,
            cipher_key: Zeroizing::new(cipher_key),
        })
    }

    /// Build from an optional configured salt, failing fast when absent.
    pub fn from_config(salt: Option<&str>) -> Result<Self, HasherError> {
        Self::new(salt.ok_or(HasherError::MissingSalt)?)
    }

    /// Keyed digest of an arbitrary raw signal.
    pub fn hash(&self, raw: &RawSignal) -> String {
        self.digest(&raw.canonical_bytes())
    }

    /// Keyed digest of an IP address string.
    ///
    /// `::ffff:1.2.3.4` and `1.2.3.4` hash identically.
    pub fn hash_ip(&self, ip: &str) -> String {
        let ip = ip.trim();
        let clean = ip.strip_prefix(IPV4_MAPPED_PREFIX).unwrap_or(ip);
        self.digest(clean.as_bytes())
    }

    /// Keyed digest of device signals.
    pub fn hash_device(&self, signals: &RawSignal) -> String {
        self.hash(signals)
    }

    /// Constant-time check that `raw` produces `expected`.
    pub fn verify(&self, raw: &RawSignal, expected: &str) -> bool {
        let actual = self.hash(raw);
        actual.as_bytes().ct_eq(expected.as_bytes()).into()
    }

    /// Constant-time check that `ip` produces `expected`.
    pub fn verify_ip(&self, ip: &str, expected: &str) -> bool {
        let actual = self.hash_ip(ip);
        actual.as_bytes().ct_eq(expected.as_bytes()).into()
    }

    fn digest(&self, bytes: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(bytes);
        hex::encode(&mac.finalize().into_bytes())
    }

    /// Encrypt a value for later recovery by an authorized process.
    ///
    /// Every call draws a fresh random nonce, so equal plaintexts produce
    /// different ciphertexts.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, HasherError> {
        use aes_gcm::Aes256Gcm;
        use aes_gcm::aead::generic_array::GenericArray;
        use aes_gcm::aead::{Aead, KeyInit};
        use rand::RngCore;

        let cipher = Aes256Gcm::new(GenericArray::from_slice(self.cipher_key.as_slice()));

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| HasherError::Encryption)?;

        Ok(format!("{}:{}", hex::encode(&nonce), hex::encode(&ciphertext)))
    }

    /// Recover a value produced by [`FingerprintHasher::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<String, HasherError> {
        use aes_gcm::Aes256Gcm;
        use aes_gcm::aead::generic_array::GenericArray;
        use aes_gcm::aead::{Aead, KeyInit};

        let (nonce_hex, data_hex) = encoded
            .split_once(':')
            .ok_or(HasherError::MalformedCiphertext)?;
        let nonce = hex::decode(nonce_hex).map_err(|_| HasherError::MalformedCiphertext)?;
        let data = hex::decode(data_hex).map_err(|_| HasherError::MalformedCiphertext)?;
        if nonce.len() != NONCE_LEN {
            return Err(HasherError::MalformedCiphertext);
        }

        let cipher = Aes256Gcm::new(GenericArray::from_slice(self.cipher_key.as_slice()));
        let plaintext = cipher
            .decrypt(GenericArray::from_slice(&nonce), data.as_slice())
            .map_err(|_| HasherError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| HasherError::NotUtf8)
    }
}

/// Check if a secret is an insecure placeholder.
///
/// Returns `true` if the value looks like a default that should be changed.
pub fn is_default_secret(secret: &str) -> bool {
    let lower = secret.to_ascii_lowercase();
    secret.is_empty()
        || lower.contains("default")
        || lower.contains("changeme")
        || lower.contains("secret")
        || secret.len() < 16
}
