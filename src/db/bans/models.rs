//! Ban entry models and data structures.

use crate::db::{DbError, TrustLevel};
use serde::{Deserialize, Serialize};

/// What a ban applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BanTarget {
    /// Target id is the user's external id.
    User,
    /// Target id is an IP fingerprint hash.
    Ip,
    /// Target id is a device fingerprint hash.
    Device,
}

impl BanTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Ip => "IP",
            Self::Device => "DEVICE",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DbError> {
        match value {
            "USER" => Ok(Self::User),
            "IP" => Ok(Self::Ip),
            "DEVICE" => Ok(Self::Device),
            other => Err(DbError::Corrupt(format!("unknown ban target {:?}", other))),
        }
    }
}

/// Why a ban was created, stored as JSON keyed by `method`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BanDetails {
    /// Issued directly against the user, or against a fingerprint on the
    /// user's behalf.
    #[serde(rename_all = "camelCase")]
    Origin {
        source_user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_trust_level: Option<TrustLevel>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip_hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_hash: Option<String>,
    },
    /// Alt found on the origin's IP fingerprint.
    #[serde(rename_all = "camelCase")]
    IpMatch { linked_to: String },
    /// Alt found on the origin's device fingerprint.
    #[serde(rename_all = "camelCase")]
    DeviceMatch { linked_to: String },
}

/// Status filter for ban listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanStatus {
    /// Neither revoked nor expired.
    Active,
    /// Revoked, or past its expiry.
    Expired,
    #[default]
    All,
}

/// A stored ban.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ban {
    pub id: i64,
    pub target_type: BanTarget,
    pub target_id: String,
    pub user_id: Option<i64>,
    pub reason: String,
    pub banned_by: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub details: BanDetails,
}

impl Ban {
    /// Not revoked and not past its expiry at `now`.
    pub fn is_active(&self, now: i64) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|at| at > now)
    }
}

/// Values for a new ban row. `created_at` is stamped on insert.
#[derive(Debug, Clone)]
pub struct NewBan {
    pub target_type: BanTarget,
    pub target_id: String,
    pub user_id: Option<i64>,
    pub reason: String,
    pub banned_by: String,
    pub expires_at: Option<i64>,
    pub details: BanDetails,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_details_are_tagged_by_method() {
        let alt = BanDetails::IpMatch {
            linked_to: "100".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&alt).unwrap(),
            json!({"method": "IP_MATCH", "linkedTo": "100"})
        );

        let origin = BanDetails::Origin {
            source_user_id: "100".to_string(),
            previous_trust_level: Some(TrustLevel::Verified),
            ip_hash: Some("ab".to_string()),
            device_hash: None,
        };
        let value = serde_json::to_value(&origin).unwrap();
        assert_eq!(value["method"], "ORIGIN");
        assert_eq!(value["previousTrustLevel"], "VERIFIED");
        assert!(value.get("deviceHash").is_none());
        assert_eq!(serde_json::from_value::<BanDetails>(value).unwrap(), origin);
    }

    #[test]
    fn test_activity_respects_expiry_and_revocation() {
        let mut ban = Ban {
            id: 1,
            target_type: BanTarget::User,
            target_id: "1".to_string(),
            user_id: None,
            reason: "r".to_string(),
            banned_by: "system".to_string(),
            created_at: 0,
            expires_at: Some(100),
            revoked_at: None,
            details: BanDetails::DeviceMatch {
                linked_to: "2".to_string(),
            },
        };
        assert!(ban.is_active(99));
        assert!(!ban.is_active(100));

        ban.expires_at = None;
        assert!(ban.is_active(i64::MAX));
        ban.revoked_at = Some(5);
        assert!(!ban.is_active(0));
    }
}
