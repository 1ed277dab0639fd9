//! Integration test common infrastructure.
//!
//! Spawns an in-process trustguard server on an ephemeral port with an
//! in-memory database, plus helpers for seeding users and reading replies.

pub mod server;

#[allow(unused_imports)]
pub use server::{API_KEY, FALLBACK_API_KEY, SIGNING_KEY, TestServer, read_json};
