//! Bundle validation.
//!
//! Four checks, each run regardless of how the others went:
//!
//! 1. **checksum**: every listed file against its recorded size and checksum,
//!    then the integrity digest recomputed from the actual bytes
//! 2. **approvals**: every approval against the recomputed digest, plus
//!    required-role coverage
//! 3. **attestation**: hash binding to this archive and the signature
//! 4. **policy**: an external evaluator's verdict, relayed as-is
//!
//! Only an unreadable archive stops validation early, and even then the
//! caller gets a [`ValidationResult`], never a bare error. A panic inside an
//! injected backend, verifier or evaluator is caught and recorded as
//! `INTERNAL_ERROR` under the check that called it.

pub mod codes;
pub mod gate;

use crate::approval::{verify_approvals, Backends, RoleCoverage, VerifyPolicy};
use crate::attestation::AttestationVerifier;
use crate::bundle::{Bundle, ReadLimits, ATTESTATION_ENTRY};
use crate::digest::{compute_digest, file_checksum, DigestMetadata};
use crate::policy::{PolicyEvaluator, PolicyInput};
use crate::types::{Approval, ApprovalIdentity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use gate::{classify, Gate, GateCategory, GateOutcome};

/// Which checks to run and how strictly.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Promote every warning to an error.
    pub strict: bool,
    pub require_approvals: bool,
    /// Roles that need at least one valid approval. Non-empty implies
    /// `require_approvals`.
    pub required_roles: Vec<String>,
    pub require_attestation: bool,
    /// Policy handed to the configured evaluator.
    pub policy_path: Option<PathBuf>,
    /// Accepted approval key fingerprints. `None` accepts any key whose
    /// signature verifies.
    pub trust_public_keys: Option<BTreeSet<String>>,
    pub max_approval_age: Option<Duration>,
    /// Accept attestations that cannot be checked against online services.
    pub allow_offline: bool,
    pub limits: ReadLimits,
    /// Clock override for approval age checks.
    pub now: Option<DateTime<Utc>>,
}

impl ValidateOptions {
    fn approvals_requested(&self) -> bool {
        self.require_approvals || !self.required_roles.is_empty()
    }

    fn verify_policy(&self) -> VerifyPolicy {
        VerifyPolicy {
            trusted_fingerprints: self.trust_public_keys.clone(),
            max_age: self.max_approval_age,
            now: self.now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Check {
    Checksum,
    Approvals,
    Attestation,
    Policy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub check: Check,
    pub code: String,
    pub message: String,
    /// Archive path or approval identity the issue is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ValidationIssue {
    pub fn new(check: Check, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check,
            code: code.into(),
            message: message.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// AND of every requested check, and no errors.
    pub valid: bool,
    pub checksum_valid: bool,
    /// `true` when approvals were not requested.
    pub approvals_valid: bool,
    /// `true` when an attestation was not required.
    pub attestation_valid: bool,
    /// `true` when no policy was given.
    pub policy_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Required roles without a valid approval.
    pub missing_roles: Vec<String>,
    pub valid_approvals: Vec<ApprovalIdentity>,
    /// Digest recomputed from the archive; absent when it could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_digest: Option<String>,
}

impl ValidationResult {
    fn unreadable(message: String) -> Self {
        Self {
            valid: false,
            checksum_valid: false,
            approvals_valid: false,
            attestation_valid: false,
            policy_valid: false,
            errors: vec![ValidationIssue::new(
                Check::Checksum,
                codes::BUNDLE_UNREADABLE,
                message,
            )],
            warnings: Vec::new(),
            missing_roles: Vec::new(),
            valid_approvals: Vec::new(),
            computed_digest: None,
        }
    }

    /// Validation itself broke down.
    pub(crate) fn internal(message: String) -> Self {
        let mut result = Self::unreadable(message);
        result.errors[0].code = codes::INTERNAL_ERROR.to_string();
        result
    }

    pub fn error_codes(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.code.as_str())
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.error_codes().any(|c| c == code)
    }

    pub fn exit_code(&self) -> i32 {
        classify(self).exit_code()
    }
}

/// Collects issues for one validation run.
#[derive(Default)]
struct Findings {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Findings {
    fn error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    fn warn(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }

    /// Error when `required`, warning otherwise.
    fn report(&mut self, required: bool, issue: ValidationIssue) {
        if required {
            self.error(issue)
        } else {
            self.warn(issue)
        }
    }

    fn failed(&self, check: Check) -> bool {
        self.errors.iter().any(|e| e.check == check)
    }

    /// Run a call into an injected collaborator. A panic becomes an
    /// `INTERNAL_ERROR` under `check` and `None` is returned.
    fn guarded<T>(&mut self, check: Check, what: &str, f: impl FnOnce() -> T) -> Option<T> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(payload) => {
                let message = format!("{what} panicked: {}", panic_message(payload.as_ref()));
                tracing::error!(check = ?check, "{message}");
                self.error(ValidationIssue::new(check, codes::INTERNAL_ERROR, message));
                None
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Validates bundles with a fixed set of backends and evaluators.
pub struct Validator {
    backends: Backends,
    policy_evaluator: Option<Box<dyn PolicyEvaluator>>,
    attestation_verifier: Option<Box<dyn AttestationVerifier>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Backends::with_defaults())
    }
}

impl Validator {
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            policy_evaluator: None,
            attestation_verifier: None,
        }
    }

    pub fn with_policy_evaluator(mut self, evaluator: Box<dyn PolicyEvaluator>) -> Self {
        self.policy_evaluator = Some(evaluator);
        self
    }

    pub fn with_attestation_verifier(mut self, verifier: Box<dyn AttestationVerifier>) -> Self {
        self.attestation_verifier = Some(verifier);
        self
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Load and validate an archive on disk.
    pub fn validate_file(&self, path: &Path, options: &ValidateOptions) -> ValidationResult {
        match Bundle::open_with_limits(path, &options.limits) {
            Ok(bundle) => self.validate(&bundle, options),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    class = %err.class(),
                    error = %err,
                    "bundle unreadable"
                );
                ValidationResult::unreadable(err.to_string())
            }
        }
    }

    /// Validate with the approvals embedded in the archive.
    pub fn validate(&self, bundle: &Bundle, options: &ValidateOptions) -> ValidationResult {
        self.validate_with_approvals(bundle, &[], options)
    }

    /// Validate with the embedded approvals plus `external` ones (for
    /// example loaded from an [`ApprovalStore`](crate::approval::ApprovalStore)).
    /// Exact duplicates are counted once.
    pub fn validate_with_approvals(
        &self,
        bundle: &Bundle,
        external: &[Approval],
        options: &ValidateOptions,
    ) -> ValidationResult {
        let mut approvals: Vec<Approval> = bundle.approvals().to_vec();
        for approval in external {
            if !approvals.contains(approval) {
                approvals.push(approval.clone());
            }
        }

        let mut findings = Findings::default();
        let computed_digest = check_checksums(bundle, &mut findings);
        let (missing_roles, valid_approvals) =
            self.check_approvals(&approvals, &computed_digest, options, &mut findings);
        self.check_attestation(bundle, &computed_digest, options, &mut findings);
        self.check_policy(bundle, &approvals, &computed_digest, options, &mut findings);

        if options.strict && !findings.warnings.is_empty() {
            let promoted = std::mem::take(&mut findings.warnings);
            tracing::debug!(count = promoted.len(), "strict mode: promoting warnings");
            findings.errors.extend(promoted);
        }

        let checksum_valid = !findings.failed(Check::Checksum);
        let approvals_valid = !findings.failed(Check::Approvals);
        let attestation_valid = !findings.failed(Check::Attestation);
        let policy_valid = !findings.failed(Check::Policy);
        let valid = checksum_valid
            && approvals_valid
            && attestation_valid
            && policy_valid
            && findings.errors.is_empty();

        tracing::info!(
            digest = %computed_digest,
            valid,
            errors = findings.errors.len(),
            warnings = findings.warnings.len(),
            "bundle validated"
        );

        ValidationResult {
            valid,
            checksum_valid,
            approvals_valid,
            attestation_valid,
            policy_valid,
            errors: findings.errors,
            warnings: findings.warnings,
            missing_roles,
            valid_approvals,
            computed_digest: Some(computed_digest),
        }
    }

    fn check_approvals(
        &self,
        approvals: &[Approval],
        computed_digest: &str,
        options: &ValidateOptions,
        findings: &mut Findings,
    ) -> (Vec<String>, Vec<ApprovalIdentity>) {
        let required = options.approvals_requested();

        for approval in approvals {
            if approval.bundle_digest != computed_digest {
                findings.warn(
                    ValidationIssue::new(
                        Check::Approvals,
                        codes::STALE_APPROVAL,
                        format!(
                            "approval by {} claims {}, bundle digest is {computed_digest}",
                            approval.identity(),
                            approval.bundle_digest
                        ),
                    )
                    .with_subject(approval.identity().to_string()),
                );
            }
        }

        let Some(report) = findings.guarded(Check::Approvals, "signature backend", || {
            verify_approvals(
                approvals,
                computed_digest,
                &self.backends,
                &options.verify_policy(),
            )
        }) else {
            let missing = if required {
                options.required_roles.clone()
            } else {
                Vec::new()
            };
            return (missing, Vec::new());
        };
        for failure in &report.failures {
            findings.report(
                required,
                ValidationIssue::new(
                    Check::Approvals,
                    codes::APPROVAL_FAILED,
                    format!("{failure} [{}]", failure.code()),
                )
                .with_subject(failure.identity().to_string()),
            );
        }

        if !required {
            return (Vec::new(), report.valid);
        }

        let coverage = RoleCoverage::compute(
            options.required_roles.iter().map(String::as_str),
            &report.valid,
        );
        for role in &coverage.missing {
            findings.error(
                ValidationIssue::new(
                    Check::Approvals,
                    codes::MISSING_APPROVAL,
                    format!("no valid approval for required role '{role}'"),
                )
                .with_subject(role.clone()),
            );
        }
        if options.required_roles.is_empty() && report.valid.is_empty() {
            findings.error(ValidationIssue::new(
                Check::Approvals,
                codes::MISSING_APPROVAL,
                "approvals are required but none verify",
            ));
        }
        (coverage.missing.into_iter().collect(), report.valid)
    }

    fn check_attestation(
        &self,
        bundle: &Bundle,
        computed_digest: &str,
        options: &ValidateOptions,
        findings: &mut Findings,
    ) {
        let required = options.require_attestation;
        let Some(attestation) = bundle.attestation() else {
            if required {
                findings.error(ValidationIssue::new(
                    Check::Attestation,
                    codes::ATTESTATION_MISSING,
                    "attestation is required but the bundle has none",
                ));
            }
            return;
        };

        if attestation.plan_hash != computed_digest {
            findings.report(
                required,
                ValidationIssue::new(
                    Check::Attestation,
                    codes::ATTESTATION_HASH_MISMATCH,
                    format!(
                        "attestation plan_hash {} does not match bundle digest {computed_digest}",
                        attestation.plan_hash
                    ),
                ),
            );
        }
        let content_hash = bundle.content_hash();
        if attestation.output_hash != content_hash {
            findings.report(
                required,
                ValidationIssue::new(
                    Check::Attestation,
                    codes::ATTESTATION_HASH_MISMATCH,
                    format!(
                        "attestation output_hash {} does not match archive content {content_hash}",
                        attestation.output_hash
                    ),
                ),
            );
        }

        match &self.attestation_verifier {
            Some(verifier) => {
                let verified = findings.guarded(Check::Attestation, "attestation verifier", || {
                    verifier.verify(attestation, options.allow_offline)
                });
                if let Some(Err(err)) = verified {
                    findings.report(
                        required,
                        ValidationIssue::new(
                            Check::Attestation,
                            codes::ATTESTATION_FAILED,
                            err.to_string(),
                        )
                        .with_subject(attestation.signed_by.clone()),
                    );
                }
            }
            None if required => findings.error(ValidationIssue::new(
                Check::Attestation,
                codes::ATTESTATION_FAILED,
                "attestation is required but no verifier is configured",
            )),
            None => {}
        }
    }

    fn check_policy(
        &self,
        bundle: &Bundle,
        approvals: &[Approval],
        computed_digest: &str,
        options: &ValidateOptions,
        findings: &mut Findings,
    ) {
        let Some(policy_path) = &options.policy_path else {
            return;
        };
        let Some(evaluator) = &self.policy_evaluator else {
            findings.error(
                ValidationIssue::new(
                    Check::Policy,
                    codes::POLICY_EVALUATION_ERROR,
                    "a policy was given but no policy evaluator is configured",
                )
                .with_subject(policy_path.display().to_string()),
            );
            return;
        };

        let input = PolicyInput {
            manifest: bundle.manifest(),
            approvals,
            computed_digest,
        };
        let evaluated = findings.guarded(Check::Policy, "policy evaluator", || {
            evaluator.evaluate(policy_path, &input)
        });
        let verdict = match evaluated {
            None => return,
            Some(Ok(verdict)) => verdict,
            Some(Err(err)) => {
                findings.error(
                    ValidationIssue::new(
                        Check::Policy,
                        codes::POLICY_EVALUATION_ERROR,
                        err.to_string(),
                    )
                    .with_subject(policy_path.display().to_string()),
                );
                return;
            }
        };

        for violation in &verdict.violations {
            let code = if violation.code.is_empty() {
                codes::POLICY_VIOLATION
            } else {
                violation.code.as_str()
            };
            let mut issue = ValidationIssue::new(Check::Policy, code, violation.message.clone());
            if let Some(rule) = &violation.rule {
                issue = issue.with_subject(rule.clone());
            }
            findings.error(issue);
        }
        if !verdict.allowed && verdict.violations.is_empty() {
            findings.error(ValidationIssue::new(
                Check::Policy,
                codes::POLICY_VIOLATION,
                "policy denied the bundle",
            ));
        }
        for warning in &verdict.warnings {
            let mut issue =
                ValidationIssue::new(Check::Policy, warning.code.clone(), warning.message.clone());
            if let Some(rule) = &warning.rule {
                issue = issue.with_subject(rule.clone());
            }
            findings.warn(issue);
        }
    }
}

/// Verify listed files and recompute the digest from the bytes actually
/// present. Returns the recomputed digest.
fn check_checksums(bundle: &Bundle, findings: &mut Findings) -> String {
    let mut actual: Vec<(&str, String)> = Vec::with_capacity(bundle.manifest().files.len());

    for (entry, bytes) in bundle.files() {
        let Some(bytes) = bytes else {
            findings.error(
                ValidationIssue::new(
                    Check::Checksum,
                    codes::FILE_MISSING,
                    format!("'{}' is listed in the manifest but absent", entry.path),
                )
                .with_subject(entry.path.clone()),
            );
            continue;
        };
        if bytes.len() as u64 != entry.size {
            findings.error(
                ValidationIssue::new(
                    Check::Checksum,
                    codes::SIZE_MISMATCH,
                    format!(
                        "'{}' is {} bytes, manifest records {}",
                        entry.path,
                        bytes.len(),
                        entry.size
                    ),
                )
                .with_subject(entry.path.clone()),
            );
        }
        let checksum = file_checksum(bytes);
        if checksum != entry.checksum {
            findings.error(
                ValidationIssue::new(
                    Check::Checksum,
                    codes::CHECKSUM_MISMATCH,
                    format!(
                        "'{}' hashes to {checksum}, manifest records {}",
                        entry.path, entry.checksum
                    ),
                )
                .with_subject(entry.path.clone()),
            );
        }
        actual.push((entry.path.as_str(), checksum));
    }

    let computed = compute_digest(
        actual.iter().map(|(p, c)| (*p, c.as_str())),
        &DigestMetadata::from_manifest(bundle.manifest()),
    );
    if computed != bundle.digest() {
        findings.error(ValidationIssue::new(
            Check::Checksum,
            codes::DIGEST_MISMATCH,
            format!(
                "recomputed digest {computed} differs from recorded {}",
                bundle.digest()
            ),
        ));
    }

    for path in bundle.unlisted_entries() {
        findings.warn(
            ValidationIssue::new(
                Check::Checksum,
                codes::UNLISTED_ENTRY,
                format!("'{path}' is in the archive but not in the manifest"),
            )
            .with_subject(path),
        );
    }
    for defect in bundle.defects() {
        let check = if defect.entry == ATTESTATION_ENTRY {
            Check::Attestation
        } else {
            Check::Approvals
        };
        findings.warn(
            ValidationIssue::new(check, codes::MALFORMED_DOCUMENT, defect.message.clone())
                .with_subject(defect.entry.clone()),
        );
    }

    computed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{sign_approval_with, BackendSignature, SignRequest, SignatureBackend};
    use crate::approval::{SigningError, VerifyFailure};
    use crate::digest::sha256_prefixed;
    use crate::policy::{PolicyError, PolicyFinding, PolicyVerdict};
    use crate::types::{BundleManifest, FileEntry, Integrity, SignatureType, MANIFEST_SCHEMA};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    /// Signature is the hash of the payload; any fingerprint is accepted.
    struct Echo;

    impl SignatureBackend for Echo {
        fn signature_type(&self) -> SignatureType {
            SignatureType::Ssh
        }
        fn sign(&self, payload: &[u8]) -> Result<BackendSignature, SigningError> {
            Ok(BackendSignature {
                signature: sha256_prefixed(payload),
                fingerprint: "SHA256:echo".into(),
            })
        }
        fn verify_with(&self, _: &str, payload: &[u8], sig: &str) -> Result<bool, VerifyFailure> {
            Ok(sha256_prefixed(payload) == sig)
        }
    }

    fn validator() -> Validator {
        let mut backends = Backends::new();
        backends.register(Box::new(Echo));
        Validator::new(backends)
    }

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    /// `listed` go into the manifest; `stored` overrides what the archive
    /// actually holds (use it to tamper or add unlisted entries).
    fn bundle(listed: &[(&str, &str)], stored: &[(&str, &str)]) -> Bundle {
        let mut entries: BTreeMap<String, Vec<u8>> = listed
            .iter()
            .map(|(p, b)| (p.to_string(), b.as_bytes().to_vec()))
            .collect();
        for (path, body) in stored {
            entries.insert(path.to_string(), body.as_bytes().to_vec());
        }
        bundle_with_entries(listed, entries)
    }

    fn bundle_with_entries(listed: &[(&str, &str)], entries: BTreeMap<String, Vec<u8>>) -> Bundle {
        let files: Vec<FileEntry> = listed
            .iter()
            .map(|(path, body)| FileEntry {
                path: path.to_string(),
                size: body.len() as u64,
                checksum: file_checksum(body.as_bytes()),
            })
            .collect();
        let metadata = BTreeMap::new();
        let digest = compute_digest(
            files.iter().map(|f| (f.path.as_str(), f.checksum.as_str())),
            &DigestMetadata {
                version: "1.0.0",
                governance_level: "standard",
                created: created(),
                metadata: &metadata,
            },
        );
        let manifest = BundleManifest {
            id: "test".into(),
            version: "1.0.0".into(),
            schema: MANIFEST_SCHEMA.into(),
            created: created(),
            governance_level: "standard".into(),
            integrity: Integrity { digest },
            files,
            metadata,
        };
        let bytes = serde_json::to_vec_pretty(&manifest).unwrap();
        Bundle::from_parts(manifest, bytes, entries).unwrap()
    }

    fn approve(bundle: &mut Bundle, role: &str, user: &str) {
        let request = SignRequest::new(bundle.digest(), role, user);
        let approval = sign_approval_with(&request, &Echo, created()).unwrap();
        bundle.add_approval(approval).unwrap();
    }

    #[test]
    fn clean_bundle_passes() {
        let b = bundle(&[("spec.yaml", "a: 1\n")], &[]);
        let result = validator().validate(&b, &ValidateOptions::default());
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.computed_digest.as_deref(), Some(b.digest()));
        assert_eq!(result.exit_code(), 0);
    }

    #[test]
    fn tampered_file_fails_checksum_and_digest() {
        let b = bundle(&[("spec.yaml", "a: 1\n")], &[("spec.yaml", "a: 2\n")]);
        let result = validator().validate(&b, &ValidateOptions::default());
        assert!(!result.valid);
        assert!(!result.checksum_valid);
        assert!(result.has_error(codes::CHECKSUM_MISMATCH));
        assert!(result.has_error(codes::DIGEST_MISMATCH));
        assert!(!result.has_error(codes::SIZE_MISMATCH));
        assert_eq!(result.errors[0].subject.as_deref(), Some("spec.yaml"));
        assert_eq!(result.exit_code(), 60);
    }

    #[test]
    fn approval_on_tampered_bundle_does_not_verify() {
        let mut b = bundle(&[("spec.yaml", "a: 1\n")], &[("spec.yaml", "a: 2\n")]);
        approve(&mut b, "pm", "alice");
        let options = ValidateOptions {
            required_roles: vec!["pm".into()],
            ..ValidateOptions::default()
        };
        let result = validator().validate(&b, &options);
        assert!(!result.approvals_valid);
        assert!(result.has_error(codes::APPROVAL_FAILED));
        assert!(result.has_error(codes::MISSING_APPROVAL));
        assert_eq!(result.missing_roles, vec!["pm"]);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.code == codes::STALE_APPROVAL));
    }

    #[test]
    fn missing_file_is_reported() {
        let entries = BTreeMap::from([("spec.yaml".to_string(), b"a".to_vec())]);
        let b = bundle_with_entries(&[("spec.yaml", "a"), ("lock.yaml", "b")], entries);
        let result = validator().validate(&b, &ValidateOptions::default());
        assert!(result.has_error(codes::FILE_MISSING));
        assert!(result.has_error(codes::DIGEST_MISMATCH));
    }

    #[test]
    fn required_roles_coverage() {
        let mut b = bundle(&[("spec.yaml", "a")], &[]);
        approve(&mut b, "pm", "alice");
        let options = ValidateOptions {
            required_roles: vec!["pm".into(), "security".into()],
            ..ValidateOptions::default()
        };
        let result = validator().validate(&b, &options);
        assert!(!result.valid);
        assert!(result.checksum_valid);
        assert!(!result.approvals_valid);
        assert_eq!(result.missing_roles, vec!["security"]);
        assert_eq!(result.valid_approvals.len(), 1);
        assert_eq!(result.exit_code(), 40);

        approve(&mut b, "security", "bob");
        let result = validator().validate(&b, &options);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.missing_roles.is_empty());
    }

    #[test]
    fn require_approvals_without_roles_needs_one() {
        let b = bundle(&[("spec.yaml", "a")], &[]);
        let options = ValidateOptions {
            require_approvals: true,
            ..ValidateOptions::default()
        };
        let result = validator().validate(&b, &options);
        assert!(result.has_error(codes::MISSING_APPROVAL));
        assert!(result.missing_roles.is_empty());
    }

    #[test]
    fn optional_approval_failures_are_warnings() {
        let mut b = bundle(&[("spec.yaml", "a")], &[]);
        let mut approval = sign_approval_with(
            &SignRequest::new(b.digest(), "pm", "alice"),
            &Echo,
            created(),
        )
        .unwrap();
        approval.signature = "sha256:forged".into();
        b.add_approval(approval).unwrap();

        let result = validator().validate(&b, &ValidateOptions::default());
        assert!(result.valid);
        assert_eq!(result.warnings[0].code, codes::APPROVAL_FAILED);
        assert!(result.warnings[0].message.contains("INVALID_SIGNATURE"));

        let strict = ValidateOptions {
            strict: true,
            ..ValidateOptions::default()
        };
        let result = validator().validate(&b, &strict);
        assert!(!result.valid);
        assert!(!result.approvals_valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn unlisted_entry_warns_and_strict_promotes() {
        let b = bundle(&[("spec.yaml", "a")], &[("extra.txt", "x")]);
        let result = validator().validate(&b, &ValidateOptions::default());
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].code, codes::UNLISTED_ENTRY);

        let strict = ValidateOptions {
            strict: true,
            ..ValidateOptions::default()
        };
        let result = validator().validate(&b, &strict);
        assert!(!result.valid);
        assert!(!result.checksum_valid);
        assert!(result.has_error(codes::UNLISTED_ENTRY));
    }

    #[test]
    fn required_attestation_missing() {
        let b = bundle(&[("spec.yaml", "a")], &[]);
        let options = ValidateOptions {
            require_attestation: true,
            ..ValidateOptions::default()
        };
        let result = validator().validate(&b, &options);
        assert!(!result.attestation_valid);
        assert!(result.has_error(codes::ATTESTATION_MISSING));
        assert_eq!(result.exit_code(), 60);
    }

    #[test]
    fn policy_without_evaluator_is_an_error() {
        let b = bundle(&[("spec.yaml", "a")], &[]);
        let options = ValidateOptions {
            policy_path: Some(PathBuf::from("gate.rego")),
            ..ValidateOptions::default()
        };
        let result = validator().validate(&b, &options);
        assert!(!result.policy_valid);
        assert!(result.has_error(codes::POLICY_EVALUATION_ERROR));
        assert_eq!(result.exit_code(), 60);
    }

    #[test]
    fn policy_codes_are_relayed() {
        let b = bundle(&[("spec.yaml", "a")], &[]);
        let evaluator = |_: &Path, input: &PolicyInput<'_>| {
            assert_eq!(input.manifest.files.len(), 1);
            let mut verdict =
                PolicyVerdict::deny(codes::FORBIDDEN_PROVIDER, "openai not allowed");
            verdict.warnings.push(PolicyFinding {
                code: "PROVIDER_DEPRECATED".into(),
                message: "model is deprecated".into(),
                rule: Some("providers".into()),
            });
            Ok::<_, PolicyError>(verdict)
        };
        let validator = validator().with_policy_evaluator(Box::new(evaluator));
        let options = ValidateOptions {
            policy_path: Some(PathBuf::from("gate.rego")),
            ..ValidateOptions::default()
        };
        let result = validator.validate(&b, &options);
        assert!(!result.policy_valid);
        assert!(result.checksum_valid);
        assert!(result.has_error(codes::FORBIDDEN_PROVIDER));
        assert_eq!(result.warnings[0].subject.as_deref(), Some("providers"));
        assert_eq!(result.exit_code(), 50);
    }

    #[test]
    fn denied_without_violations() {
        let b = bundle(&[("spec.yaml", "a")], &[]);
        let evaluator = |_: &Path, _: &PolicyInput<'_>| -> Result<PolicyVerdict, PolicyError> {
            Ok(PolicyVerdict {
                allowed: false,
                violations: Vec::new(),
                warnings: Vec::new(),
            })
        };
        let result = validator()
            .with_policy_evaluator(Box::new(evaluator))
            .validate(
                &b,
                &ValidateOptions {
                    policy_path: Some(PathBuf::from("p")),
                    ..ValidateOptions::default()
                },
            );
        assert!(result.has_error(codes::POLICY_VIOLATION));
        assert_eq!(result.exit_code(), 20);
    }

    #[test]
    fn panicking_evaluator_is_an_internal_error() {
        let b = bundle(&[("spec.yaml", "a")], &[]);
        let evaluator = |_: &Path, _: &PolicyInput<'_>| -> Result<PolicyVerdict, PolicyError> {
            panic!("evaluator bug")
        };
        let validator = validator().with_policy_evaluator(Box::new(evaluator));
        let result = validator.validate(
            &b,
            &ValidateOptions {
                policy_path: Some(PathBuf::from("gate.rego")),
                ..ValidateOptions::default()
            },
        );
        assert!(!result.valid);
        assert!(result.checksum_valid);
        assert!(!result.policy_valid);
        assert!(result.has_error(codes::INTERNAL_ERROR));
        assert!(result.errors[0].message.contains("evaluator bug"));
        assert_eq!(result.exit_code(), 60);
    }

    struct Exploding;

    impl SignatureBackend for Exploding {
        fn signature_type(&self) -> SignatureType {
            SignatureType::Ssh
        }
        fn sign(&self, _: &[u8]) -> Result<BackendSignature, SigningError> {
            unreachable!("only used for verification")
        }
        fn verify_with(&self, _: &str, _: &[u8], _: &str) -> Result<bool, VerifyFailure> {
            panic!("backend bug")
        }
    }

    #[test]
    fn panicking_backend_is_an_internal_error() {
        let mut b = bundle(&[("spec.yaml", "a")], &[]);
        approve(&mut b, "pm", "alice");
        let mut backends = Backends::new();
        backends.register(Box::new(Exploding));
        let options = ValidateOptions {
            required_roles: vec!["pm".into()],
            ..ValidateOptions::default()
        };
        let result = Validator::new(backends).validate(&b, &options);
        assert!(!result.approvals_valid);
        assert!(result.has_error(codes::INTERNAL_ERROR));
        assert_eq!(result.missing_roles, vec!["pm"]);
        assert_eq!(result.exit_code(), 60);
    }

    #[test]
    fn external_approvals_are_merged_once() {
        let mut b = bundle(&[("spec.yaml", "a")], &[]);
        approve(&mut b, "pm", "alice");
        let embedded = b.approvals().to_vec();
        let result = validator().validate_with_approvals(
            &b,
            &embedded,
            &ValidateOptions {
                require_approvals: true,
                ..ValidateOptions::default()
            },
        );
        assert!(result.valid);
        assert_eq!(result.valid_approvals.len(), 1);
    }
}
