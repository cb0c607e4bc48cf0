//! Governance configuration file.
//!
//! ```yaml
//! version: 1
//! required_roles: [pm, security]
//! trusted_keys: ["SHA256:..."]
//! trusted_key_files: [keys/alice.pub]
//! max_approval_age: 30d
//! strict: true
//! require_approvals: true
//! require_attestation: false
//! allow_offline: true
//! policy: policies/gate.rego
//! limits:
//!   max_bundle_bytes: 67108864
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use crate::approval::ssh::public_key_file_fingerprint;
use crate::bundle::{ReadLimits, ReadLimitsOverrides};
use crate::validate::ValidateOptions;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

/// Environment variables consulted for the default approver, in order.
pub const APPROVER_ENV_VARS: &[&str] = &["GOVBUNDLE_USER", "USER", "USERNAME"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unsupported config version {found} (supported: {SUPPORTED_CONFIG_VERSION})")]
    UnsupportedVersion { found: u32 },

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernanceConfig {
    pub version: u32,
    #[serde(default)]
    pub required_roles: Vec<String>,
    /// Key fingerprints accepted for approvals.
    #[serde(default)]
    pub trusted_keys: Vec<String>,
    /// OpenSSH public key files whose fingerprints are accepted.
    #[serde(default)]
    pub trusted_key_files: Vec<PathBuf>,
    /// Human readable duration, e.g. `30d` or `12h`.
    #[serde(default)]
    pub max_approval_age: Option<String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub require_approvals: bool,
    #[serde(default)]
    pub require_attestation: bool,
    #[serde(default)]
    pub allow_offline: bool,
    #[serde(default)]
    pub policy: Option<PathBuf>,
    #[serde(default)]
    pub limits: ReadLimitsOverrides,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

pub fn load_config(path: &Path) -> Result<GovernanceConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg = parse_config(&raw)?;
    cfg.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    tracing::debug!(path = %path.display(), roles = cfg.required_roles.len(), "config loaded");
    Ok(cfg)
}

pub fn parse_config(raw: &str) -> Result<GovernanceConfig, ConfigError> {
    let cfg: GovernanceConfig = serde_yaml::from_str(raw)?;
    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion { found: cfg.version });
    }
    if let Some(role) = cfg.required_roles.iter().find(|r| r.trim().is_empty()) {
        return Err(ConfigError::Invalid {
            field: "required_roles",
            message: format!("empty role name {role:?}"),
        });
    }
    Ok(cfg)
}

impl GovernanceConfig {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || self.base_dir.as_os_str().is_empty() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Fingerprints from `trusted_keys` and `trusted_key_files`; `None`
    /// when neither is set.
    pub fn trusted_fingerprints(&self) -> Result<Option<BTreeSet<String>>, ConfigError> {
        if self.trusted_keys.is_empty() && self.trusted_key_files.is_empty() {
            return Ok(None);
        }
        let mut set: BTreeSet<String> = self.trusted_keys.iter().cloned().collect();
        for file in &self.trusted_key_files {
            let path = self.resolve(file);
            let fingerprint =
                public_key_file_fingerprint(&path).map_err(|e| ConfigError::Invalid {
                    field: "trusted_key_files",
                    message: format!("{}: {e}", path.display()),
                })?;
            set.insert(fingerprint);
        }
        Ok(Some(set))
    }

    pub fn max_age(&self) -> Result<Option<std::time::Duration>, ConfigError> {
        self.max_approval_age
            .as_deref()
            .map(|raw| {
                humantime::parse_duration(raw).map_err(|e| ConfigError::Invalid {
                    field: "max_approval_age",
                    message: format!("{raw:?}: {e}"),
                })
            })
            .transpose()
    }

    /// Validation options described by this config.
    pub fn validate_options(&self) -> Result<ValidateOptions, ConfigError> {
        Ok(ValidateOptions {
            strict: self.strict,
            require_approvals: self.require_approvals,
            required_roles: self.required_roles.clone(),
            require_attestation: self.require_attestation,
            policy_path: self.policy.as_deref().map(|p| self.resolve(p)),
            trust_public_keys: self.trusted_fingerprints()?,
            max_approval_age: self.max_age()?,
            allow_offline: self.allow_offline,
            limits: ReadLimits::default().apply(&self.limits),
            now: None,
        })
    }
}

/// Default approver identity from the environment, if any.
pub fn approver_from_env() -> Option<String> {
    approver_from(|name| std::env::var(name).ok())
}

fn approver_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    APPROVER_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
