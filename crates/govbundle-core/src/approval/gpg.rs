//! GPG detached signatures through the local `gpg` binary.
//!
//! Signing and verification run `gpg` in batch mode with a machine-readable
//! status stream (`--status-fd`). Outcomes are read from the status lines,
//! never from human-readable output. Verification needs the signer's public
//! key in the local keyring.

use super::backend::{BackendSignature, SignatureBackend};
use super::sign::SigningError;
use super::verify::VerifyFailure;
use crate::types::SignatureType;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

const STATUS_PREFIX: &str = "[GNUPG:] ";

/// Status keywords that mean gpg wanted a passphrase it could not get.
const PASSPHRASE_STATUSES: &[&str] = &[
    "NEED_PASSPHRASE",
    "BAD_PASSPHRASE",
    "MISSING_PASSPHRASE",
    "PINENTRY_LAUNCHED",
];

#[derive(Debug, Clone)]
pub struct GpgBackend {
    program: PathBuf,
    key_id: Option<String>,
    homedir: Option<PathBuf>,
}

impl Default for GpgBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpgBackend {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("gpg"),
            key_id: None,
            homedir: None,
        }
    }

    /// Sign with this key id or fingerprint instead of the default key.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Use a separate keyring directory (`--homedir`).
    pub fn with_homedir(mut self, homedir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--batch");
        if let Some(home) = &self.homedir {
            cmd.arg("--homedir").arg(home);
        }
        cmd
    }

    fn key_label(&self) -> String {
        self.key_id.clone().unwrap_or_else(|| "default gpg key".to_string())
    }
}

fn run_with_stdin(mut cmd: Command, input: &[u8]) -> std::io::Result<Output> {
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }
    child.wait_with_output()
}

impl SignatureBackend for GpgBackend {
    fn signature_type(&self) -> SignatureType {
        SignatureType::Gpg
    }

    fn sign(&self, payload: &[u8]) -> Result<BackendSignature, SigningError> {
        let mut cmd = self.command();
        cmd.args(["--yes", "--armor", "--detach-sign", "--pinentry-mode", "error"]);
        cmd.args(["--status-fd", "2"]);
        if let Some(key) = &self.key_id {
            cmd.arg("--local-user").arg(key);
        }

        let output = run_with_stdin(cmd, payload).map_err(|e| SigningError::Backend {
            backend: "gpg",
            message: format!("running {}: {e}", self.program.display()),
        })?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let statuses = parse_status(&stderr);

        if !output.status.success() {
            return Err(classify_sign_failure(&statuses, &stderr, self.key_label()));
        }
        let fingerprint = signing_fingerprint(&statuses).ok_or_else(|| SigningError::Backend {
            backend: "gpg",
            message: "gpg did not report SIG_CREATED".to_string(),
        })?;
        let signature = String::from_utf8(output.stdout).map_err(|_| SigningError::Backend {
            backend: "gpg",
            message: "armored signature is not UTF-8".to_string(),
        })?;

        Ok(BackendSignature {
            signature,
            fingerprint,
        })
    }

    fn verify_with(
        &self,
        fingerprint: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<bool, VerifyFailure> {
        if !signature.contains("BEGIN PGP SIGNATURE") {
            return Err(VerifyFailure::Malformed {
                message: "not an armored PGP signature".to_string(),
            });
        }
        let mut sig_file = tempfile::NamedTempFile::new().map_err(backend_failure)?;
        sig_file
            .write_all(signature.as_bytes())
            .and_then(|_| sig_file.flush())
            .map_err(backend_failure)?;

        let mut cmd = self.command();
        cmd.args(["--status-fd", "1", "--verify"]);
        cmd.arg(sig_file.path()).arg("-");
        let output = run_with_stdin(cmd, payload).map_err(backend_failure)?;
        let statuses = parse_status(&String::from_utf8_lossy(&output.stdout));
        verdict(&statuses, fingerprint)
    }
}

fn backend_failure(err: std::io::Error) -> VerifyFailure {
    VerifyFailure::Backend {
        message: format!("gpg: {err}"),
    }
}

/// One `[GNUPG:] KEYWORD arg...` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusLine {
    pub keyword: String,
    pub args: Vec<String>,
}

pub(crate) fn parse_status(text: &str) -> Vec<StatusLine> {
    text.lines()
        .filter_map(|line| line.strip_prefix(STATUS_PREFIX))
        .filter_map(|rest| {
            let mut parts = rest.split_whitespace();
            let keyword = parts.next()?.to_string();
            Some(StatusLine {
                keyword,
                args: parts.map(str::to_string).collect(),
            })
        })
        .collect()
}

/// `SIG_CREATED <type> <pk algo> <hash algo> <class> <timestamp> <fingerprint>`
fn signing_fingerprint(statuses: &[StatusLine]) -> Option<String> {
    statuses
        .iter()
        .find(|s| s.keyword == "SIG_CREATED")
        .and_then(|s| s.args.get(5))
        .cloned()
}

fn classify_sign_failure(statuses: &[StatusLine], stderr: &str, key: String) -> SigningError {
    let has = |kw: &str| statuses.iter().any(|s| s.keyword == kw);
    if PASSPHRASE_STATUSES.iter().any(|kw| has(kw)) {
        return SigningError::PassphraseRequired { key };
    }
    if has("INV_SGNR") || has("NO_SGNR") || stderr.contains("no default secret key") {
        return SigningError::NoUsableKey {
            searched: vec![key],
        };
    }
    let message = stderr
        .lines()
        .filter(|l| !l.starts_with(STATUS_PREFIX))
        .collect::<Vec<_>>()
        .join("; ");
    SigningError::Backend {
        backend: "gpg",
        message: if message.is_empty() {
            "gpg exited with failure".to_string()
        } else {
            message
        },
    }
}

/// gpg status keywords for a cryptographically sound signature whose key or
/// signature is no longer acceptable. gpg still emits `VALIDSIG` for these.
const REJECTED: &[(&str, &str)] = &[
    ("REVKEYSIG", "signing key is revoked"),
    ("EXPKEYSIG", "signing key has expired"),
    ("EXPSIG", "signature has expired"),
];

/// Accepts only `GOODSIG` plus `VALIDSIG`. `VALIDSIG` carries the signing
/// key fingerprint first and the primary key fingerprint tenth; either may be
/// the one recorded at signing time.
fn verdict(statuses: &[StatusLine], fingerprint: &str) -> Result<bool, VerifyFailure> {
    let has = |keyword: &str| statuses.iter().any(|s| s.keyword == keyword);

    if let Some((_, reason)) = REJECTED.iter().find(|(keyword, _)| has(keyword)) {
        return Err(VerifyFailure::KeyRejected {
            message: format!("{reason} ({fingerprint})"),
        });
    }
    if has("BADSIG") {
        return Ok(false);
    }
    if let Some(valid) = statuses.iter().find(|s| s.keyword == "VALIDSIG") {
        if !has("GOODSIG") {
            return Ok(false);
        }
        let matches = [valid.args.first(), valid.args.get(9)]
            .into_iter()
            .flatten()
            .any(|fp| fp.eq_ignore_ascii_case(fingerprint));
        return Ok(matches);
    }
    if has("NO_PUBKEY") {
        return Err(VerifyFailure::Backend {
            message: format!("public key {fingerprint} is not in the gpg keyring"),
        });
    }
    if has("NODATA") {
        return Err(VerifyFailure::Malformed {
            message: "gpg found no signature data".to_string(),
        });
    }
    Err(VerifyFailure::Backend {
        message: "gpg did not report a verification result".to_string(),
    })
}
