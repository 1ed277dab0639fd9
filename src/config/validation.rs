//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early. A missing
//! salt or signing secret is always fatal; weak ones can be tolerated for
//! local development only.

use super::Config;
use crate::security::fingerprint::is_default_secret;
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("security.salt (SALT) is required")]
    MissingSalt,
    #[error("security.salt is a placeholder or shorter than 16 characters")]
    WeakSalt,
    #[error("security.signing_secret (SIGNING_SECRET) is required")]
    MissingSigningSecret,
    #[error("security.signing_secret is a placeholder or shorter than 16 characters")]
    WeakSigningSecret,
    #[error("at least one API key (security.api_keys or API_KEY) is required")]
    NoApiKeys,
    #[error("security.allowed_ips entry is not an IP or CIDR range: {0}")]
    InvalidAllowlistEntry(String),
    #[error("security.timestamp_window_secs must be greater than zero")]
    ZeroTimestampWindow,
    #[error("rate_limit.window_secs must be greater than zero")]
    ZeroRateLimitWindow,
    #[error("rate_limit.memory_capacity must be greater than zero")]
    ZeroMemoryCapacity,
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
///
/// `allow_insecure` downgrades weak (but present) secrets to warnings.
pub fn validate(config: &Config, allow_insecure: bool) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let security = &config.security;

    match security.salt.as_deref() {
        None | Some("") => errors.push(ValidationError::MissingSalt),
        Some(salt) if is_default_secret(salt) => {
            if allow_insecure {
                tracing::warn!("INSECURE: weak salt accepted for development");
            } else {
                errors.push(ValidationError::WeakSalt);
            }
        }
        Some(_) => {}
    }

    match security.signing_secret.as_deref() {
        None | Some("") => errors.push(ValidationError::MissingSigningSecret),
        Some(secret) if is_default_secret(secret) => {
            if allow_insecure {
                tracing::warn!("INSECURE: weak signing secret accepted for development");
            } else {
                errors.push(ValidationError::WeakSigningSecret);
            }
        }
        Some(_) => {}
    }

    if security.api_keys.iter().all(|k| k.is_empty()) {
        errors.push(ValidationError::NoApiKeys);
    }

    for entry in &security.allowed_ips {
        if entry.parse::<IpAddr>().is_err() && entry.parse::<IpNet>().is_err() {
            errors.push(ValidationError::InvalidAllowlistEntry(entry.clone()));
        }
    }

    if security.timestamp_window_secs == 0 {
        errors.push(ValidationError::ZeroTimestampWindow);
    }
    if config.rate_limit.window_secs == 0 {
        errors.push(ValidationError::ZeroRateLimitWindow);
    }
    if config.rate_limit.memory_capacity == 0 {
        errors.push(ValidationError::ZeroMemoryCapacity);
    }

    // Database path validation
    if config.database.path != ":memory:" {
        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(config.database.path.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
