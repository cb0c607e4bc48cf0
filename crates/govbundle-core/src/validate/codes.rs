//! Stable issue codes reported by the validator.
//!
//! Automation branches on these strings; never rename one. Codes produced by
//! a policy evaluator are relayed as-is and may fall outside this list.

// Checksum
pub const CHECKSUM_MISMATCH: &str = "CHECKSUM_MISMATCH";
pub const SIZE_MISMATCH: &str = "SIZE_MISMATCH";
pub const FILE_MISSING: &str = "FILE_MISSING";
pub const DIGEST_MISMATCH: &str = "DIGEST_MISMATCH";
pub const UNLISTED_ENTRY: &str = "UNLISTED_ENTRY";
pub const MALFORMED_DOCUMENT: &str = "MALFORMED_DOCUMENT";
pub const BUNDLE_UNREADABLE: &str = "BUNDLE_UNREADABLE";

// Approvals
pub const MISSING_APPROVAL: &str = "MISSING_APPROVAL";
pub const APPROVAL_FAILED: &str = "APPROVAL_FAILED";
pub const STALE_APPROVAL: &str = "STALE_APPROVAL";

// Attestation
pub const ATTESTATION_MISSING: &str = "ATTESTATION_MISSING";
pub const ATTESTATION_FAILED: &str = "ATTESTATION_FAILED";
pub const ATTESTATION_HASH_MISMATCH: &str = "ATTESTATION_HASH_MISMATCH";

// Policy
pub const POLICY_VIOLATION: &str = "POLICY_VIOLATION";
pub const POLICY_COMPLIANCE_FAILED: &str = "POLICY_COMPLIANCE_FAILED";
pub const POLICY_EVALUATION_ERROR: &str = "POLICY_EVALUATION_ERROR";

// Relayed from policy evaluators, classified by the gate
pub const DRIFT_DETECTED: &str = "DRIFT_DETECTED";
pub const FORBIDDEN_PROVIDER: &str = "FORBIDDEN_PROVIDER";
pub const PROVIDER_NOT_ALLOWED: &str = "PROVIDER_NOT_ALLOWED";

pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
