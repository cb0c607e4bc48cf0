//! Structural diff between two bundles.
//!
//! Files are compared by path and checksum, approvals by `(role, user)`
//! identity. A re-signed approval for an unchanged identity is neither added
//! nor removed. Version, governance level and metadata entries are compared
//! key by key.

use crate::bundle::Bundle;
use crate::types::ApprovalIdentity;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: String,
    pub old_checksum: String,
    pub new_checksum: String,
}

/// `key` is `version`, `governance_level` or `metadata.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataChange {
    pub key: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub old_digest: String,
    pub new_digest: String,
    pub files_added: Vec<String>,
    pub files_removed: Vec<String>,
    pub files_modified: Vec<FileChange>,
    pub approvals_added: Vec<ApprovalIdentity>,
    pub approvals_removed: Vec<ApprovalIdentity>,
    pub attestation_changed: bool,
    pub metadata_changed: bool,
    pub metadata_changes: Vec<MetadataChange>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !self.files_added.is_empty()
            || !self.files_removed.is_empty()
            || !self.files_modified.is_empty()
            || !self.approvals_added.is_empty()
            || !self.approvals_removed.is_empty()
            || self.attestation_changed
            || self.metadata_changed
    }

    /// One line, e.g. `files +1 -0 ~2, approvals +1 -0, metadata 1 changed`.
    pub fn summary(&self) -> String {
        if !self.has_changes() {
            return "no changes".to_string();
        }
        let mut parts = vec![format!(
            "files +{} -{} ~{}",
            self.files_added.len(),
            self.files_removed.len(),
            self.files_modified.len()
        )];
        parts.push(format!(
            "approvals +{} -{}",
            self.approvals_added.len(),
            self.approvals_removed.len()
        ));
        if self.attestation_changed {
            parts.push("attestation changed".to_string());
        }
        if self.metadata_changed {
            parts.push(format!("metadata {} changed", self.metadata_changes.len()));
        }
        parts.join(", ")
    }
}

/// Changes needed to go from `old` to `new`.
pub fn diff_bundles(old: &Bundle, new: &Bundle) -> DiffResult {
    let old_files: BTreeMap<&str, &str> = checksums(old);
    let new_files: BTreeMap<&str, &str> = checksums(new);

    let files_added = new_files
        .keys()
        .filter(|p| !old_files.contains_key(*p))
        .map(|p| p.to_string())
        .collect();
    let files_removed = old_files
        .keys()
        .filter(|p| !new_files.contains_key(*p))
        .map(|p| p.to_string())
        .collect();
    let files_modified = old_files
        .iter()
        .filter_map(|(path, old_sum)| {
            let new_sum = new_files.get(path)?;
            (old_sum != new_sum).then(|| FileChange {
                path: path.to_string(),
                old_checksum: old_sum.to_string(),
                new_checksum: new_sum.to_string(),
            })
        })
        .collect();

    let old_ids = identities(old);
    let new_ids = identities(new);

    let attestation_changed = old.attestation().map(|a| &a.signature)
        != new.attestation().map(|a| &a.signature);

    let metadata_changes = metadata_changes(old, new);

    let result = DiffResult {
        old_digest: old.digest().to_string(),
        new_digest: new.digest().to_string(),
        files_added,
        files_removed,
        files_modified,
        approvals_added: new_ids.difference(&old_ids).cloned().collect(),
        approvals_removed: old_ids.difference(&new_ids).cloned().collect(),
        attestation_changed,
        metadata_changed: !metadata_changes.is_empty(),
        metadata_changes,
    };
    tracing::debug!(summary = %result.summary(), "bundles diffed");
    result
}

fn identities(bundle: &Bundle) -> BTreeSet<ApprovalIdentity> {
    bundle.approvals().iter().map(|a| a.identity()).collect()
}

fn checksums(bundle: &Bundle) -> BTreeMap<&str, &str> {
    bundle
        .manifest()
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.checksum.as_str()))
        .collect()
}

fn metadata_changes(old: &Bundle, new: &Bundle) -> Vec<MetadataChange> {
    let (om, nm) = (old.manifest(), new.manifest());
    let mut changes = Vec::new();

    for (key, a, b) in [
        ("version", &om.version, &nm.version),
        ("governance_level", &om.governance_level, &nm.governance_level),
    ] {
        if a != b {
            changes.push(MetadataChange {
                key: key.to_string(),
                old: Some(a.clone()),
                new: Some(b.clone()),
            });
        }
    }

    let keys: BTreeSet<&String> = om.metadata.keys().chain(nm.metadata.keys()).collect();
    for key in keys {
        let (a, b) = (om.metadata.get(key), nm.metadata.get(key));
        if a != b {
            changes.push(MetadataChange {
                key: format!("metadata.{key}"),
                old: a.cloned(),
                new: b.cloned(),
            });
        }
    }
    changes
}
