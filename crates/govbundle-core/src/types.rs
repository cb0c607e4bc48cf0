//! Documents stored inside a bundle archive.
//!
//! These are the wire shapes: `manifest.json`, `approvals/*.json` and
//! `attestation.json`. Field names are part of the archive contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Schema identifier written into every manifest.
pub const MANIFEST_SCHEMA: &str = "govbundle/v1";

/// Default governance level when the caller does not pick one.
pub const DEFAULT_GOVERNANCE_LEVEL: &str = "standard";

/// Bundle manifest (first entry in the archive).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleManifest {
    pub id: String,
    pub version: String,
    pub schema: String,
    /// Build time, whole seconds.
    pub created: DateTime<Utc>,
    pub governance_level: String,
    pub integrity: Integrity,
    /// Sorted by path (byte order).
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BundleManifest {
    pub fn digest(&self) -> &str {
        &self.integrity.digest
    }

    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Integrity {
    /// `sha256:<hex>` over the canonical digest input.
    pub digest: String,
}

/// One content file recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Relative path inside the archive, `/` separated.
    pub path: String,
    pub size: u64,
    /// `sha256:<hex>` of the raw bytes.
    pub checksum: String,
}

/// Signature scheme used for an approval.
///
/// Unknown values survive a round trip so that verification can report them
/// instead of failing to parse the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignatureType {
    Ssh,
    Gpg,
    Other(String),
}

impl SignatureType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ssh => "ssh",
            Self::Gpg => "gpg",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for SignatureType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ssh" => Self::Ssh,
            "gpg" => Self::Gpg,
            _ => Self::Other(value),
        }
    }
}

impl From<SignatureType> for String {
    fn from(value: SignatureType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-scoped signed approval of one bundle digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Approval {
    /// Digest the signer claims to have approved. Informational only:
    /// verification always binds to the digest recomputed from content.
    pub bundle_digest: String,
    pub role: String,
    pub user: String,
    #[serde(default)]
    pub comment: String,
    pub signature_type: SignatureType,
    pub signature: String,
    pub public_key_fingerprint: String,
    pub signed_at: DateTime<Utc>,
}

impl Approval {
    /// Identity used for diffing and role accounting.
    pub fn identity(&self) -> ApprovalIdentity {
        ApprovalIdentity {
            role: self.role.clone(),
            user: self.user.clone(),
        }
    }

    /// Archive / store file name: `<role>-<user>-<unix ts>-<id>.json`.
    ///
    /// Sanitizing is lossy and `-` may appear inside role or user, so `<id>`
    /// (8 hex chars of SHA-256 over `role \0 user`) keeps distinct identities
    /// apart.
    pub fn file_name(&self) -> String {
        let id = Sha256::new()
            .chain_update(self.role.as_bytes())
            .chain_update([0u8])
            .chain_update(self.user.as_bytes())
            .finalize();
        format!(
            "{}-{}-{}-{}.json",
            sanitize_component(&self.role),
            sanitize_component(&self.user),
            self.signed_at.timestamp(),
            hex::encode(&id[..4])
        )
    }
}

/// `(role, user)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalIdentity {
    pub role: String,
    pub user: String,
}

impl fmt::Display for ApprovalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.role, self.user)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationFormat {
    Sigstore,
    #[serde(rename = "in-toto")]
    InToto,
    Slsa,
}

impl fmt::Display for AttestationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sigstore => "sigstore",
            Self::InToto => "in-toto",
            Self::Slsa => "slsa",
        })
    }
}

/// Provenance statement about how the archive was produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attestation {
    pub format: AttestationFormat,
    pub signed_by: String,
    pub signed_at: DateTime<Utc>,
    /// Integrity digest of the bundle at generation time.
    pub plan_hash: String,
    /// Content hash of the archive's content section.
    pub output_hash: String,
    #[serde(default)]
    pub provenance: serde_json::Value,
    pub signature: String,
}

/// Replace anything outside `[A-Za-z0-9._-]` so the value is a safe file name part.
pub(crate) fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
