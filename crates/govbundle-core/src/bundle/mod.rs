//! Governance bundle archive.
//!
//! A bundle is a deterministic tar.gz archive containing:
//! - `manifest.json`: identity, metadata, file list and integrity digest
//! - every listed file at its relative path
//! - `approvals/*.json`: zero or more signed approvals
//! - `attestation.json`: at most one provenance attestation
//!
//! The manifest and the listed files form the content section and never
//! change after build. Approvals and the attestation are side-cars that can be
//! appended later without touching the digest.
//!
//! # Modules
//!
//! - [`builder`]: assemble a bundle from inputs on disk
//! - [`reader`]: load an archive into a [`Bundle`]

pub mod archive;
pub mod builder;
pub mod limits;
pub mod reader;

use crate::digest::sha256_prefixed;
use crate::error::{BundleError, BundleResult};
use crate::types::{Approval, ApprovalIdentity, Attestation, BundleManifest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

pub use builder::{build, BuildOptions, BuildOutcome};
pub use limits::{ReadLimits, ReadLimitsOverrides};

/// Archive entry holding the manifest.
pub const MANIFEST_ENTRY: &str = "manifest.json";
/// Archive directory holding approval documents.
pub const APPROVALS_DIR: &str = "approvals";
/// Archive entry holding the attestation.
pub const ATTESTATION_ENTRY: &str = "attestation.json";

/// Whether `path` is reserved for bundle metadata and cannot carry content.
pub fn is_reserved_path(path: &str) -> bool {
    path == MANIFEST_ENTRY
        || path == ATTESTATION_ENTRY
        || path == APPROVALS_DIR
        || path.starts_with("approvals/")
}

/// A side-car document that could not be parsed while loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadDefect {
    pub entry: String,
    pub message: String,
}

/// A loaded bundle: manifest, content, side-cars and the archive bytes.
#[derive(Debug, Clone)]
pub struct Bundle {
    manifest: BundleManifest,
    /// Manifest exactly as stored, so the content hash survives rewrites.
    manifest_bytes: Vec<u8>,
    /// Every non-reserved entry, listed in the manifest or not.
    entries: BTreeMap<String, Vec<u8>>,
    approvals: Vec<Approval>,
    attestation: Option<Attestation>,
    defects: Vec<LoadDefect>,
    archive: Vec<u8>,
}

impl Bundle {
    /// Assemble a bundle from parts and encode its archive.
    pub(crate) fn from_parts(
        manifest: BundleManifest,
        manifest_bytes: Vec<u8>,
        entries: BTreeMap<String, Vec<u8>>,
    ) -> BundleResult<Self> {
        let mut bundle = Self {
            manifest,
            manifest_bytes,
            entries,
            approvals: Vec::new(),
            attestation: None,
            defects: Vec::new(),
            archive: Vec::new(),
        };
        bundle.encode()?;
        Ok(bundle)
    }

    /// Open and load an archive from disk with default limits.
    pub fn open(path: impl AsRef<Path>) -> BundleResult<Self> {
        reader::open_with_limits(path.as_ref(), &ReadLimits::default())
    }

    /// Open an archive from disk with explicit limits.
    pub fn open_with_limits(path: impl AsRef<Path>, limits: &ReadLimits) -> BundleResult<Self> {
        reader::open_with_limits(path.as_ref(), limits)
    }

    /// Load an archive already in memory.
    pub fn from_bytes(bytes: Vec<u8>, limits: &ReadLimits) -> BundleResult<Self> {
        reader::from_bytes(bytes, limits)
    }

    pub fn manifest(&self) -> &BundleManifest {
        &self.manifest
    }

    /// Digest recorded in the manifest (not recomputed).
    pub fn digest(&self) -> &str {
        self.manifest.digest()
    }

    pub fn approvals(&self) -> &[Approval] {
        &self.approvals
    }

    pub fn attestation(&self) -> Option<&Attestation> {
        self.attestation.as_ref()
    }

    pub fn defects(&self) -> &[LoadDefect] {
        &self.defects
    }

    pub fn archive_bytes(&self) -> &[u8] {
        &self.archive
    }

    /// Raw bytes of a content entry.
    pub fn file_bytes(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    /// Content entries present in the archive but absent from the manifest.
    pub fn unlisted_entries(&self) -> Vec<&str> {
        self.entries
            .keys()
            .filter(|p| self.manifest.file(p).is_none())
            .map(String::as_str)
            .collect()
    }

    /// Listed files paired with their bytes, in manifest order.
    pub fn files(&self) -> impl Iterator<Item = (&crate::types::FileEntry, Option<&[u8]>)> {
        self.manifest
            .files
            .iter()
            .map(move |f| (f, self.file_bytes(&f.path)))
    }

    /// Hash of the content section: stored manifest bytes followed by each
    /// listed file's bytes in manifest order.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.manifest_bytes);
        for bytes in self.files().filter_map(|(_, bytes)| bytes) {
            hasher.update(bytes);
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Hash of the full archive as currently encoded.
    pub fn archive_hash(&self) -> String {
        sha256_prefixed(&self.archive)
    }

    /// Append an approval. The manifest and digest are untouched.
    pub fn add_approval(&mut self, approval: Approval) -> BundleResult<()> {
        self.approvals.push(approval);
        self.encode()
    }

    /// Attach (or replace) the attestation.
    pub fn set_attestation(&mut self, attestation: Attestation) -> BundleResult<()> {
        self.attestation = Some(attestation);
        self.encode()
    }

    /// Write the archive to `path`, replacing it atomically.
    pub fn write_to(&self, path: impl AsRef<Path>) -> BundleResult<()> {
        write_atomic(path.as_ref(), &self.archive)
    }

    /// Summary for inspection; performs no verification.
    pub fn info(&self) -> BundleInfo {
        BundleInfo {
            id: self.manifest.id.clone(),
            version: self.manifest.version.clone(),
            schema: self.manifest.schema.clone(),
            created: self.manifest.created,
            governance_level: self.manifest.governance_level.clone(),
            digest: self.manifest.integrity.digest.clone(),
            file_count: self.manifest.files.len(),
            total_size: self.manifest.total_size(),
            approvals: self.approvals.iter().map(Approval::identity).collect(),
            has_attestation: self.attestation.is_some(),
        }
    }

    fn encode(&mut self) -> BundleResult<()> {
        let mut docs: Vec<(String, Vec<u8>)> = Vec::with_capacity(self.approvals.len() + 1);
        for (index, approval) in self.approvals.iter().enumerate() {
            let name = format!("{}/{:04}-{}", APPROVALS_DIR, index, approval.file_name());
            let bytes = serde_json::to_vec_pretty(approval)
                .map_err(|e| BundleError::malformed(format!("encoding approval: {e}")))?;
            docs.push((name, bytes));
        }
        if let Some(attestation) = &self.attestation {
            let bytes = serde_json::to_vec_pretty(attestation)
                .map_err(|e| BundleError::malformed(format!("encoding attestation: {e}")))?;
            docs.push((ATTESTATION_ENTRY.to_string(), bytes));
        }

        let mut entries: Vec<(&str, &[u8])> =
            Vec::with_capacity(self.entries.len() + docs.len() + 1);
        entries.push((MANIFEST_ENTRY, self.manifest_bytes.as_slice()));
        for file in &self.manifest.files {
            if let Some(bytes) = self.entries.get(&file.path) {
                entries.push((file.path.as_str(), bytes.as_slice()));
            }
        }
        for (path, bytes) in &self.entries {
            if self.manifest.file(path).is_none() {
                entries.push((path.as_str(), bytes.as_slice()));
            }
        }
        for (name, bytes) in &docs {
            entries.push((name.as_str(), bytes.as_slice()));
        }

        self.archive = archive::write_archive(Vec::new(), &entries)
            .map_err(|e| BundleError::io("encode archive", MANIFEST_ENTRY, e))?;
        Ok(())
    }
}

/// Inspection summary of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleInfo {
    pub id: String,
    pub version: String,
    pub schema: String,
    pub created: DateTime<Utc>,
    pub governance_level: String,
    pub digest: String,
    pub file_count: usize,
    pub total_size: u64,
    pub approvals: Vec<ApprovalIdentity>,
    pub has_attestation: bool,
}

/// Write bytes next to `path` and rename into place so readers never see a
/// partial archive.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> BundleResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| BundleError::io("create temporary archive", parent, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| BundleError::io("write archive", tmp.path().to_path_buf(), e))?;
    tmp.persist(path)
        .map_err(|e| BundleError::io("persist archive", path, e.error))?;
    Ok(())
}
