//! Bundle assembly.
//!
//! # Process
//!
//! 1. Resolve every input to a relative archive path (conflicts are errors)
//! 2. Read each input and record `{path, size, checksum}`
//! 3. Sort the file list by path and compute the integrity digest
//! 4. Encode manifest + files as a deterministic archive
//! 5. Write the archive atomically to the output path
//! 6. Optionally attest the written archive (best effort)

use crate::attestation::{AttestationGenerator, AttestationSubject};
use crate::digest::{compute_digest, file_checksum, truncate_to_seconds, DigestMetadata};
use crate::error::{BundleError, BundleResult};
use crate::types::{
    Attestation, BundleManifest, FileEntry, Integrity, DEFAULT_GOVERNANCE_LEVEL, MANIFEST_SCHEMA,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::archive::normalize_entry_path;
use super::{is_reserved_path, write_atomic, Bundle, ReadLimits};

/// Directory inside the archive that holds policy files.
pub const POLICIES_DIR: &str = "policies";

/// Inputs and settings for one build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Specification file (required).
    pub spec: PathBuf,
    pub lock: Option<PathBuf>,
    pub routing: Option<PathBuf>,
    pub policies: Vec<PathBuf>,
    /// Extra files or directories, stored relative to `base_dir`.
    pub includes: Vec<PathBuf>,
    /// Root for include paths; defaults to the spec file's directory.
    pub base_dir: Option<PathBuf>,
    pub metadata: BTreeMap<String, String>,
    pub version: String,
    pub governance_level: String,
    /// Bundle id; a fresh UUIDv7 when unset.
    pub id: Option<String>,
    /// Build time; falls back to `SOURCE_DATE_EPOCH`, then the clock.
    pub created: Option<DateTime<Utc>>,
    pub output: PathBuf,
}

impl BuildOptions {
    pub fn new(spec: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            spec: spec.into(),
            lock: None,
            routing: None,
            policies: Vec::new(),
            includes: Vec::new(),
            base_dir: None,
            metadata: BTreeMap::new(),
            version: "1.0.0".into(),
            governance_level: DEFAULT_GOVERNANCE_LEVEL.into(),
            id: None,
            created: None,
            output: output.into(),
        }
    }

    pub fn with_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock = Some(path.into());
        self
    }

    pub fn with_routing(mut self, path: impl Into<PathBuf>) -> Self {
        self.routing = Some(path.into());
        self
    }

    pub fn with_policy(mut self, path: impl Into<PathBuf>) -> Self {
        self.policies.push(path.into());
        self
    }

    pub fn with_include(mut self, path: impl Into<PathBuf>) -> Self {
        self.includes.push(path.into());
        self
    }

    pub fn with_base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_governance_level(mut self, level: impl Into<String>) -> Self {
        self.governance_level = level.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub output: PathBuf,
    pub bundle: Bundle,
    pub attestation: Option<Attestation>,
    /// Set when attestation was requested but failed; the bundle is still valid.
    pub attestation_error: Option<String>,
}

impl BuildOutcome {
    pub fn manifest(&self) -> &BundleManifest {
        self.bundle.manifest()
    }

    pub fn digest(&self) -> &str {
        self.bundle.digest()
    }
}

/// Build a bundle and write it to `options.output`.
///
/// Either the archive is fully written or nothing is left at the output
/// path. Attestation failures are logged and reported in the outcome but do
/// not fail the build.
pub fn build(
    options: &BuildOptions,
    attestor: Option<&dyn AttestationGenerator>,
) -> BundleResult<BuildOutcome> {
    validate_options(options)?;

    let inputs = collect_inputs(options)?;
    let mut files = Vec::with_capacity(inputs.len());
    let mut entries = BTreeMap::new();
    for (rel, source) in inputs {
        let data = std::fs::read(&source).map_err(|e| {
            tracing::debug!(path = %source.display(), error = %e, "input unreadable");
            BundleError::MissingInput {
                path: source.clone(),
            }
        })?;
        tracing::debug!(path = %rel, bytes = data.len(), "adding file");
        files.push(FileEntry {
            path: rel.clone(),
            size: data.len() as u64,
            checksum: file_checksum(&data),
        });
        entries.insert(rel, data);
    }
    files.sort_by(|a, b| a.path.as_bytes().cmp(b.path.as_bytes()));

    let created = truncate_to_seconds(resolve_created(options));
    let digest = compute_digest(
        files.iter().map(|f| (f.path.as_str(), f.checksum.as_str())),
        &DigestMetadata {
            version: &options.version,
            governance_level: &options.governance_level,
            created,
            metadata: &options.metadata,
        },
    );

    let manifest = BundleManifest {
        id: options
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
        version: options.version.clone(),
        schema: MANIFEST_SCHEMA.into(),
        created,
        governance_level: options.governance_level.clone(),
        integrity: Integrity {
            digest: digest.clone(),
        },
        files,
        metadata: options.metadata.clone(),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| BundleError::malformed(format!("encoding manifest: {e}")))?;

    let bundle = Bundle::from_parts(manifest, manifest_bytes, entries)?;
    write_atomic(&options.output, bundle.archive_bytes())?;
    tracing::info!(
        output = %options.output.display(),
        digest = %digest,
        files = bundle.manifest().files.len(),
        "bundle written"
    );

    let mut outcome = BuildOutcome {
        output: options.output.clone(),
        bundle,
        attestation: None,
        attestation_error: None,
    };

    if let Some(attestor) = attestor {
        match attest_written(&options.output, attestor) {
            Ok(attested) => {
                outcome.attestation = attested.attestation().cloned();
                outcome.bundle = attested;
            }
            Err(message) => {
                tracing::warn!(
                    output = %options.output.display(),
                    error = %message,
                    "attestation failed; bundle left unattested"
                );
                outcome.attestation_error = Some(message);
            }
        }
    }

    Ok(outcome)
}

/// Attest the archive exactly as written, then rewrite it with the
/// attestation attached.
fn attest_written(output: &Path, attestor: &dyn AttestationGenerator) -> Result<Bundle, String> {
    let mut bundle = Bundle::open_with_limits(output, &ReadLimits::default())
        .map_err(|e| format!("reloading written bundle: {e}"))?;
    let content_hash = bundle.content_hash();
    let attestation = {
        let subject = AttestationSubject {
            manifest: bundle.manifest(),
            digest: bundle.digest(),
            content_hash: &content_hash,
            archive: bundle.archive_bytes(),
        };
        attestor.generate(&subject).map_err(|e| e.to_string())?
    };
    bundle
        .set_attestation(attestation)
        .map_err(|e| e.to_string())?;
    bundle.write_to(output).map_err(|e| e.to_string())?;
    Ok(bundle)
}

fn validate_options(options: &BuildOptions) -> BundleResult<()> {
    let invalid = |message: String| Err(BundleError::InvalidInput { message });
    if options.version.trim().is_empty() {
        return invalid("version must not be empty".into());
    }
    if options.version.contains('\n') || options.governance_level.contains('\n') {
        return invalid("version and governance level must be single-line".into());
    }
    if options.governance_level.trim().is_empty() {
        return invalid("governance level must not be empty".into());
    }
    for (key, value) in &options.metadata {
        if key.is_empty() || key.contains('=') || key.contains('\n') {
            return invalid(format!("invalid metadata key '{key}'"));
        }
        if value.contains('\n') {
            return invalid(format!("metadata value for '{key}' must be single-line"));
        }
    }
    if options.output.as_os_str().is_empty() {
        return invalid("output path must not be empty".into());
    }
    Ok(())
}

/// Archive path -> source path, rejecting collisions.
fn collect_inputs(options: &BuildOptions) -> BundleResult<BTreeMap<String, PathBuf>> {
    let mut inputs: BTreeMap<String, PathBuf> = BTreeMap::new();

    let mut canonical: Vec<(String, &Path)> =
        vec![(file_name(&options.spec)?, options.spec.as_path())];
    if let Some(lock) = &options.lock {
        canonical.push((file_name(lock)?, lock.as_path()));
    }
    if let Some(routing) = &options.routing {
        canonical.push((file_name(routing)?, routing.as_path()));
    }
    for policy in &options.policies {
        canonical.push((
            format!("{}/{}", POLICIES_DIR, file_name(policy)?),
            policy.as_path(),
        ));
    }
    for (rel, source) in canonical {
        if !source.is_file() {
            return Err(BundleError::MissingInput {
                path: source.to_path_buf(),
            });
        }
        insert_input(&mut inputs, rel, source.to_path_buf())?;
    }

    let base = match &options.base_dir {
        Some(dir) => dir.clone(),
        None => options
            .spec
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    for include in &options.includes {
        let source = if include.is_absolute() || base.as_os_str().is_empty() {
            include.clone()
        } else {
            base.join(include)
        };
        let meta = std::fs::symlink_metadata(&source).map_err(|_| BundleError::MissingInput {
            path: source.clone(),
        })?;
        if meta.is_dir() {
            let mut found = Vec::new();
            walk_dir(&source, &mut found)?;
            for file in found {
                let rel = relative_to(&base, &file)?;
                insert_input(&mut inputs, rel, file)?;
            }
        } else if meta.is_file() {
            let rel = relative_to(&base, &source)?;
            insert_input(&mut inputs, rel, source)?;
        } else {
            return Err(BundleError::InvalidInput {
                message: format!(
                    "include {} is not a regular file or directory",
                    source.display()
                ),
            });
        }
    }

    Ok(inputs)
}

fn insert_input(
    inputs: &mut BTreeMap<String, PathBuf>,
    rel: String,
    source: PathBuf,
) -> BundleResult<()> {
    if is_reserved_path(&rel) || inputs.contains_key(&rel) {
        return Err(BundleError::PathConflict { path: rel });
    }
    inputs.insert(rel, source);
    Ok(())
}

fn file_name(path: &Path) -> BundleResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| BundleError::InvalidInput {
            message: format!("{} has no usable file name", path.display()),
        })
}

fn relative_to(base: &Path, path: &Path) -> BundleResult<String> {
    let stripped = if base.as_os_str().is_empty() {
        path
    } else {
        path.strip_prefix(base).map_err(|_| BundleError::InvalidInput {
            message: format!(
                "include {} is outside the base directory {}",
                path.display(),
                base.display()
            ),
        })?
    };
    normalize_entry_path(stripped).ok_or_else(|| BundleError::InvalidInput {
        message: format!("include {} does not resolve to a relative path", path.display()),
    })
}

/// Regular files under `dir`, sorted; symlinks are skipped.
fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) -> BundleResult<()> {
    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| BundleError::io("read directory", dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(|e| BundleError::io("read directory", dir, e))?;
    children.sort();

    for child in children {
        let meta = std::fs::symlink_metadata(&child)
            .map_err(|e| BundleError::io("stat", child.clone(), e))?;
        if meta.is_dir() {
            walk_dir(&child, out)?;
        } else if meta.is_file() {
            out.push(child);
        }
    }
    Ok(())
}

fn resolve_created(options: &BuildOptions) -> DateTime<Utc> {
    if let Some(created) = options.created {
        return created;
    }
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}
