//! Load a bundle archive into memory.
//!
//! Loading only fails when the archive itself is unusable: unreadable stream,
//! hostile paths, limits, or a missing/unparsable manifest. Content mismatches
//! are left for the validator to report. A side-car document that does not
//! parse is recorded as a [`LoadDefect`] and otherwise ignored.

use crate::error::{BundleError, BundleResult};
use crate::types::{Approval, Attestation, BundleManifest};
use std::collections::BTreeMap;
use std::path::Path;

use super::archive::read_archive;
use super::limits::ReadLimits;
use super::{Bundle, LoadDefect, ATTESTATION_ENTRY, MANIFEST_ENTRY};

pub(crate) fn open_with_limits(path: &Path, limits: &ReadLimits) -> BundleResult<Bundle> {
    let metadata = std::fs::metadata(path).map_err(|e| BundleError::io("stat bundle", path, e))?;
    if metadata.len() > limits.max_bundle_bytes {
        return Err(BundleError::Limit {
            what: format!("size of {}", path.display()),
            limit: limits.max_bundle_bytes,
        });
    }
    let bytes = std::fs::read(path).map_err(|e| BundleError::io("read bundle", path, e))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "loading bundle");
    from_bytes(bytes, limits)
}

pub(crate) fn from_bytes(bytes: Vec<u8>, limits: &ReadLimits) -> BundleResult<Bundle> {
    let decoded = read_archive(bytes.as_slice(), limits)?;

    let mut manifest_bytes: Option<Vec<u8>> = None;
    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut approvals = Vec::new();
    let mut attestation = None;
    let mut defects = Vec::new();

    for (path, data) in decoded {
        if path == MANIFEST_ENTRY {
            if manifest_bytes.replace(data).is_some() {
                return Err(BundleError::malformed("duplicate manifest.json entry"));
            }
        } else if path.starts_with("approvals/") {
            match serde_json::from_slice::<Approval>(&data) {
                Ok(approval) => approvals.push(approval),
                Err(e) => defects.push(defect(&path, e)),
            }
        } else if path == ATTESTATION_ENTRY {
            match serde_json::from_slice::<Attestation>(&data) {
                Ok(doc) => attestation = Some(doc),
                Err(e) => defects.push(defect(&path, e)),
            }
        } else if entries.insert(path.clone(), data).is_some() {
            return Err(BundleError::malformed(format!("duplicate entry '{path}'")));
        }
    }

    let manifest_bytes =
        manifest_bytes.ok_or_else(|| BundleError::malformed("manifest.json is missing"))?;
    let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| BundleError::malformed(format!("manifest.json: {e}")))?;

    for defect in &defects {
        tracing::warn!(
            entry = %defect.entry,
            error = %defect.message,
            "ignoring unreadable side-car document"
        );
    }

    Ok(Bundle {
        manifest,
        manifest_bytes,
        entries,
        approvals,
        attestation,
        defects,
        archive: bytes,
    })
}

fn defect(entry: &str, err: serde_json::Error) -> LoadDefect {
    LoadDefect {
        entry: entry.to_string(),
        message: err.to_string(),
    }
}
