//! Row types for users, fingerprints and associations.

use super::DbError;
use serde::{Deserialize, Serialize};

/// How much a user is trusted. Stored as upper-case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
    New,
    Pending,
    Verified,
    Suspicious,
    Banned,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Suspicious => "SUSPICIOUS",
            Self::Banned => "BANNED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DbError> {
        match value {
            "NEW" => Ok(Self::New),
            "PENDING" => Ok(Self::Pending),
            "VERIFIED" => Ok(Self::Verified),
            "SUSPICIOUS" => Ok(Self::Suspicious),
            "BANNED" => Ok(Self::Banned),
            other => Err(DbError::Corrupt(format!("unknown trust level {:?}", other))),
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user known to the trust core.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    /// Provider-issued id (the Discord snowflake).
    pub external_id: String,
    pub username: Option<String>,
    pub trust_level: TrustLevel,
    pub created_at: i64,
    pub last_seen_at: i64,
}

/// Which signal a fingerprint was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintKind {
    Ip,
    Device,
}

impl FingerprintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "IP",
            Self::Device => "DEVICE",
        }
    }

    /// Column in `associations` that references this kind.
    pub(crate) fn association_column(&self) -> &'static str {
        match self {
            Self::Ip => "ip_fingerprint_id",
            Self::Device => "device_fingerprint_id",
        }
    }
}

/// A stored fingerprint row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub id: i64,
    pub kind: FingerprintKind,
    pub hash: String,
    pub first_seen_at: i64,
}

/// Fingerprint id plus its hash, as carried by an association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRef {
    pub id: i64,
    pub hash: String,
}

/// One observation of a user on an IP and/or device.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub id: i64,
    pub user_id: i64,
    pub ip_fingerprint_id: Option<i64>,
    pub device_fingerprint_id: Option<i64>,
    pub trust_score: f64,
    pub risk_flags: Vec<String>,
    pub is_blocked: bool,
    pub created_at: i64,
    pub last_seen_at: i64,
}
