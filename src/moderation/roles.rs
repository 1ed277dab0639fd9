//! Role granting on the community side after a successful verification.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoleError {
    #[error("role granting is not configured")]
    NotConfigured,
    #[error("role grant failed: {0}")]
    Failed(String),
}

/// Grants the verified role to a user on the community platform.
///
/// Called after verification commits. Failures are reported back to the
/// caller but never undo a verification.
#[async_trait]
pub trait RoleGranter: Send + Sync {
    async fn grant_verified_role(&self, external_id: &str) -> Result<(), RoleError>;
}

/// Granter used when no platform integration is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRoleGranter;

#[async_trait]
impl RoleGranter for DisabledRoleGranter {
    async fn grant_verified_role(&self, _external_id: &str) -> Result<(), RoleError> {
        Err(RoleError::NotConfigured)
    }
}
