//! Role-scoped approvals bound to a bundle digest.
//!
//! # Modules
//!
//! - [`canonical`]: the signed message format
//! - [`backend`]: backend trait and registry
//! - [`ssh`] / [`gpg`]: concrete backends
//! - [`sign`]: create approvals
//! - [`verify`]: check approvals against a current digest
//! - [`roles`]: required-role coverage
//! - [`store`]: approvals kept in a [`Repository`](crate::repository::Repository)

pub mod backend;
pub mod canonical;
pub mod gpg;
pub mod roles;
pub mod sign;
pub mod ssh;
pub mod store;
pub mod verify;

pub use backend::{BackendSignature, Backends, SignatureBackend};
pub use canonical::canonical_message;
pub use gpg::GpgBackend;
pub use roles::RoleCoverage;
pub use sign::{sign_approval, sign_approval_with, SignRequest, SigningError};
pub use ssh::SshBackend;
pub use store::{ApprovalStore, StoredApprovals};
pub use verify::{
    verify_approval, verify_approvals, ApprovalReport, VerificationError, VerificationKind,
    VerifyFailure, VerifyPolicy,
};
