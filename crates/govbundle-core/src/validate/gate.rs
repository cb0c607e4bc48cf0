//! Gate: reduce a validation result to a process exit code.
//!
//! Error codes are scanned in a fixed priority order and the first category
//! that matches wins. These exit codes are part of the public contract.
//!
//! | exit | category | codes |
//! |------|----------|-------|
//! | 0  | pass     | fully valid |
//! | 20 | policy   | `POLICY_VIOLATION`, `POLICY_COMPLIANCE_FAILED` |
//! | 30 | drift    | `DRIFT_DETECTED` |
//! | 40 | approval | `MISSING_APPROVAL`, `APPROVAL_FAILED` |
//! | 50 | provider | `FORBIDDEN_PROVIDER`, `PROVIDER_NOT_ALLOWED` |
//! | 60 | other    | anything else, including internal errors |

use super::codes;
use super::{panic_message, ValidateOptions, ValidationResult, Validator};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

pub const EXIT_PASS: i32 = 0;
pub const EXIT_POLICY: i32 = 20;
pub const EXIT_DRIFT: i32 = 30;
pub const EXIT_APPROVAL: i32 = 40;
pub const EXIT_PROVIDER: i32 = 50;
pub const EXIT_OTHER: i32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCategory {
    Pass,
    Policy,
    Drift,
    Approval,
    Provider,
    Other,
}

impl GateCategory {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Pass => EXIT_PASS,
            Self::Policy => EXIT_POLICY,
            Self::Drift => EXIT_DRIFT,
            Self::Approval => EXIT_APPROVAL,
            Self::Provider => EXIT_PROVIDER,
            Self::Other => EXIT_OTHER,
        }
    }
}

/// Priority order; first match wins.
const PRIORITY: &[(GateCategory, &[&str])] = &[
    (
        GateCategory::Policy,
        &[codes::POLICY_VIOLATION, codes::POLICY_COMPLIANCE_FAILED],
    ),
    (GateCategory::Drift, &[codes::DRIFT_DETECTED]),
    (
        GateCategory::Approval,
        &[codes::MISSING_APPROVAL, codes::APPROVAL_FAILED],
    ),
    (
        GateCategory::Provider,
        &[codes::FORBIDDEN_PROVIDER, codes::PROVIDER_NOT_ALLOWED],
    ),
];

/// Category for a set of error codes. Empty means pass.
pub fn classify_codes<'a>(codes: impl IntoIterator<Item = &'a str>) -> GateCategory {
    let codes: Vec<&str> = codes.into_iter().collect();
    if codes.is_empty() {
        return GateCategory::Pass;
    }
    PRIORITY
        .iter()
        .find(|(_, members)| codes.iter().any(|c| members.contains(c)))
        .map(|(category, _)| *category)
        .unwrap_or(GateCategory::Other)
}

pub fn classify(result: &ValidationResult) -> GateCategory {
    match classify_codes(result.error_codes()) {
        // invalid without a recorded error still fails the gate
        GateCategory::Pass if !result.valid => GateCategory::Other,
        category => category,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    pub category: GateCategory,
    pub exit_code: i32,
    pub result: ValidationResult,
}

impl GateOutcome {
    pub fn from_result(result: ValidationResult) -> Self {
        let category = classify(&result);
        Self {
            category,
            exit_code: category.exit_code(),
            result,
        }
    }
}

/// Validate and classify in one step.
pub struct Gate<'a> {
    validator: &'a Validator,
    options: ValidateOptions,
}

impl<'a> Gate<'a> {
    pub fn new(validator: &'a Validator, options: ValidateOptions) -> Self {
        Self { validator, options }
    }

    /// Always yields an outcome; a panic during validation maps to exit 60.
    pub fn run(&self, bundle_path: &Path) -> GateOutcome {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.validator.validate_file(bundle_path, &self.options)
        }))
        .unwrap_or_else(|payload| {
            ValidationResult::internal(format!(
                "validation panicked: {}",
                panic_message(payload.as_ref())
            ))
        });
        let outcome = GateOutcome::from_result(result);
        tracing::info!(
            bundle = %bundle_path.display(),
            category = ?outcome.category,
            exit_code = outcome.exit_code,
            "gate decided"
        );
        outcome
    }
}
