//! Policy evaluation hook.
//!
//! The validator hands the manifest, the attached approvals and the
//! recomputed digest to a [`PolicyEvaluator`] and relays whatever it returns.
//! Violation codes pass through unchanged, so an evaluator can report
//! `DRIFT_DETECTED` or `FORBIDDEN_PROVIDER` and the gate classifies them.
//!
//! [`CommandEvaluator`] runs an external program: the input document is
//! written to its stdin as JSON and a [`PolicyVerdict`] is read from stdout.

use crate::types::{Approval, BundleManifest};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Document handed to the evaluator.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyInput<'a> {
    pub manifest: &'a BundleManifest,
    pub approvals: &'a [Approval],
    /// Digest recomputed from the archive content.
    pub computed_digest: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFinding {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    #[serde(default)]
    pub violations: Vec<PolicyFinding>,
    #[serde(default)]
    pub warnings: Vec<PolicyFinding>,
}

impl PolicyVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            violations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn deny(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            violations: vec![PolicyFinding {
                code: code.into(),
                message: message.into(),
                rule: None,
            }],
            warnings: Vec::new(),
        }
    }

    /// Passes only when allowed and free of violations.
    pub fn passed(&self) -> bool {
        self.allowed && self.violations.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("policy evaluation failed: {message}")]
    Evaluation { message: String },

    #[error("policy evaluator returned an invalid verdict: {message}")]
    InvalidVerdict { message: String },
}

pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(
        &self,
        policy_path: &Path,
        input: &PolicyInput<'_>,
    ) -> Result<PolicyVerdict, PolicyError>;
}

impl<F> PolicyEvaluator for F
where
    F: Fn(&Path, &PolicyInput<'_>) -> Result<PolicyVerdict, PolicyError> + Send + Sync,
{
    fn evaluate(
        &self,
        policy_path: &Path,
        input: &PolicyInput<'_>,
    ) -> Result<PolicyVerdict, PolicyError> {
        self(policy_path, input)
    }
}

/// Evaluate by running `program [args...] <policy path>`.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEvaluator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the policy path.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl PolicyEvaluator for CommandEvaluator {
    fn evaluate(
        &self,
        policy_path: &Path,
        input: &PolicyInput<'_>,
    ) -> Result<PolicyVerdict, PolicyError> {
        if !policy_path.exists() {
            return Err(PolicyError::NotFound {
                path: policy_path.to_path_buf(),
            });
        }
        let payload = serde_json::to_vec(input).map_err(|e| PolicyError::Evaluation {
            message: format!("encoding input: {e}"),
        })?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(policy_path);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| PolicyError::Evaluation {
            message: format!("spawning {}: {e}", self.program.display()),
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload) {
                // evaluator did not read its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    return Err(PolicyError::Evaluation {
                        message: format!("writing input: {e}"),
                    })
                }
                Ok(()) => {}
            }
        }
        let output = child.wait_with_output().map_err(|e| PolicyError::Evaluation {
            message: format!("waiting for {}: {e}", self.program.display()),
        })?;

        // A non-zero exit with a parsable verdict is still a verdict.
        match serde_json::from_slice::<PolicyVerdict>(&output.stdout) {
            Ok(verdict) => {
                tracing::debug!(
                    policy = %policy_path.display(),
                    allowed = verdict.allowed,
                    violations = verdict.violations.len(),
                    "policy evaluated"
                );
                Ok(verdict)
            }
            Err(e) if output.status.success() => Err(PolicyError::InvalidVerdict {
                message: e.to_string(),
            }),
            Err(_) => Err(PolicyError::Evaluation {
                message: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
        }
    }
}
