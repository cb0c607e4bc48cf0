//! Approval verification.
//!
//! An approval is checked against the digest recomputed from the bundle's
//! current content, never against the digest it claims. Any change to the
//! bundle therefore invalidates every earlier approval.

use super::backend::Backends;
use super::canonical::{canonical_message, check_identity_field};
use crate::types::{Approval, ApprovalIdentity};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

/// Why a backend could not give a yes/no answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyFailure {
    #[error("malformed signature: {message}")]
    Malformed { message: String },
    /// The signature checks out but its key or validity period does not.
    #[error("{message}")]
    KeyRejected { message: String },
    #[error("{message}")]
    Backend { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationKind {
    #[error("no backend for signature type '{signature_type}'")]
    UnsupportedSignatureType { signature_type: String },

    #[error("signature does not verify for the current bundle digest")]
    InvalidSignature,

    #[error("approval was signed for {claimed}, bundle is now {current}")]
    DigestMismatch { claimed: String, current: String },

    #[error("{message}")]
    MalformedSignature { message: String },

    /// Role or user cannot appear in a canonical message unambiguously.
    #[error("malformed approval: {message}")]
    MalformedApproval { message: String },

    #[error("verification backend failed: {message}")]
    Backend { message: String },

    #[error("signing key rejected: {message}")]
    KeyRejected { message: String },

    #[error("key {fingerprint} is not trusted")]
    UntrustedKey { fingerprint: String },

    #[error("signed at {signed_at}, older than the allowed {max_age}")]
    Expired {
        signed_at: DateTime<Utc>,
        max_age: String,
    },
}

impl VerificationKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedSignatureType { .. } => "UNSUPPORTED_SIGNATURE_TYPE",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::DigestMismatch { .. } => "APPROVAL_DIGEST_MISMATCH",
            Self::MalformedSignature { .. } => "MALFORMED_SIGNATURE",
            Self::MalformedApproval { .. } => "MALFORMED_APPROVAL",
            Self::Backend { .. } => "VERIFICATION_BACKEND_ERROR",
            Self::KeyRejected { .. } => "SIGNING_KEY_REJECTED",
            Self::UntrustedKey { .. } => "UNTRUSTED_KEY",
            Self::Expired { .. } => "APPROVAL_EXPIRED",
        }
    }
}

/// A failed approval, attributed to its role and user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("approval {role}/{user} rejected: {kind}")]
pub struct VerificationError {
    pub role: String,
    pub user: String,
    pub kind: VerificationKind,
}

impl VerificationError {
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn identity(&self) -> ApprovalIdentity {
        ApprovalIdentity {
            role: self.role.clone(),
            user: self.user.clone(),
        }
    }
}

/// Checks applied after the signature itself verifies.
#[derive(Debug, Clone, Default)]
pub struct VerifyPolicy {
    /// When set, only these key fingerprints are accepted.
    pub trusted_fingerprints: Option<BTreeSet<String>>,
    /// Reject approvals older than this.
    pub max_age: Option<Duration>,
    /// Clock override for age checks; `Utc::now()` when unset.
    pub now: Option<DateTime<Utc>>,
}

impl VerifyPolicy {
    pub fn trusting(fingerprints: impl IntoIterator<Item = String>) -> Self {
        Self {
            trusted_fingerprints: Some(fingerprints.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }
}

/// Verify one approval against `current_digest`.
pub fn verify_approval(
    approval: &Approval,
    current_digest: &str,
    backends: &Backends,
    policy: &VerifyPolicy,
) -> Result<(), VerificationError> {
    let fail = |kind| VerificationError {
        role: approval.role.clone(),
        user: approval.user.clone(),
        kind,
    };

    check_identity_field("role", &approval.role)
        .and_then(|()| check_identity_field("user", &approval.user))
        .map_err(|message| fail(VerificationKind::MalformedApproval { message }))?;

    let backend = backends.get(&approval.signature_type).ok_or_else(|| {
        fail(VerificationKind::UnsupportedSignatureType {
            signature_type: approval.signature_type.to_string(),
        })
    })?;

    let message = canonical_message(
        current_digest,
        &approval.role,
        &approval.user,
        approval.signed_at,
        &approval.comment,
    );
    let verified = backend
        .verify_with(
            &approval.public_key_fingerprint,
            message.as_bytes(),
            &approval.signature,
        )
        .map_err(|e| {
            fail(match e {
                VerifyFailure::Malformed { message } => {
                    VerificationKind::MalformedSignature { message }
                }
                VerifyFailure::KeyRejected { message } => VerificationKind::KeyRejected { message },
                VerifyFailure::Backend { message } => VerificationKind::Backend { message },
            })
        })?;
    if !verified {
        return Err(fail(if approval.bundle_digest != current_digest {
            VerificationKind::DigestMismatch {
                claimed: approval.bundle_digest.clone(),
                current: current_digest.to_string(),
            }
        } else {
            VerificationKind::InvalidSignature
        }));
    }

    if let Some(trusted) = &policy.trusted_fingerprints {
        if !trusted.contains(&approval.public_key_fingerprint) {
            return Err(fail(VerificationKind::UntrustedKey {
                fingerprint: approval.public_key_fingerprint.clone(),
            }));
        }
    }

    if let Some(max_age) = policy.max_age {
        let now = policy.now.unwrap_or_else(Utc::now);
        let age = now.signed_duration_since(approval.signed_at);
        let too_old = match age.to_std() {
            Ok(age) => age > max_age,
            // signed in the future
            Err(_) => false,
        };
        if too_old {
            return Err(fail(VerificationKind::Expired {
                signed_at: approval.signed_at,
                max_age: humantime::format_duration(max_age).to_string(),
            }));
        }
    }

    Ok(())
}

/// Outcome of checking every approval attached to a bundle.
#[derive(Debug, Clone, Default)]
pub struct ApprovalReport {
    pub valid: Vec<ApprovalIdentity>,
    pub failures: Vec<VerificationError>,
}

pub fn verify_approvals<'a>(
    approvals: impl IntoIterator<Item = &'a Approval>,
    current_digest: &str,
    backends: &Backends,
    policy: &VerifyPolicy,
) -> ApprovalReport {
    let mut report = ApprovalReport::default();
    for approval in approvals {
        match verify_approval(approval, current_digest, backends, policy) {
            Ok(()) => report.valid.push(approval.identity()),
            Err(err) => {
                tracing::warn!(code = err.code(), "{err}");
                report.failures.push(err);
            }
        }
    }
    report
}
