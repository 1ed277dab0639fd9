//! Moderation core: the ban cascade engine and the verification flow.

pub mod cascade;
mod locks;
pub mod roles;
pub mod verify;

pub use cascade::{BanRequest, CascadeEngine, CascadeError, CascadeOutcome};
pub use locks::{TargetGuard, TargetLocks};
pub use roles::{DisabledRoleGranter, RoleError, RoleGranter};
pub use verify::{VerificationService, VerifyError, VerifyOutcome, VerifyRequest};
