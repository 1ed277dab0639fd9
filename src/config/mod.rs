//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, DatabaseConfig)
//! - [`security`]: Secrets and request-authentication settings (SecurityConfig)
//! - [`rate_limit`]: Per-caller request ceilings and store selection (RateLimitConfig)
//! - [`validation`]: Startup validation that refuses weak or missing secrets
//!
//! Values come from a TOML file and are then overridden by environment
//! variables, so secrets never have to live on disk.

mod rate_limit;
mod security;
mod types;
pub mod validation;

pub use rate_limit::RateLimitConfig;
pub use security::SecurityConfig;
pub use types::{Config, ConfigError, DatabaseConfig, ServerConfig};
pub use validation::{ValidationError, validate};
