//! Ban records for users, IP fingerprints and device fingerprints.

mod models;
pub mod queries;

pub use models::{Ban, BanDetails, BanStatus, BanTarget, NewBan};
pub use queries::BanRepository;
