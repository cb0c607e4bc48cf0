//! Canonical integrity digest.
//!
//! The digest anchors approvals, so its input must not depend on how the file
//! set was discovered. The canonical byte stream is:
//!
//! ```text
//! for each file, sorted by path (byte order):
//!     <path> NUL <checksum> LF
//! version=<version> LF
//! governance_level=<level> LF
//! created=<RFC 3339, whole seconds, Z> LF
//! for each metadata entry, sorted by key:
//!     <key>=<value> LF
//! ```
//!
//! hashed with SHA-256 and rendered as `sha256:<lowercase hex>`.

use crate::types::BundleManifest;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Prefix used for every hash string in a bundle.
pub const SHA256_PREFIX: &str = "sha256:";

/// Hash bytes and render as `sha256:<hex>`.
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    format!("{}{}", SHA256_PREFIX, hex::encode(Sha256::digest(bytes)))
}

/// Per-file checksum as recorded in the manifest.
pub fn file_checksum(bytes: &[u8]) -> String {
    sha256_prefixed(bytes)
}

/// Drop sub-second precision.
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// RFC 3339 rendering used wherever a timestamp enters a hash or signature.
pub fn canonical_timestamp(ts: DateTime<Utc>) -> String {
    truncate_to_seconds(ts).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Manifest fields that take part in the digest besides the file list.
#[derive(Debug, Clone, Copy)]
pub struct DigestMetadata<'a> {
    pub version: &'a str,
    pub governance_level: &'a str,
    pub created: DateTime<Utc>,
    pub metadata: &'a BTreeMap<String, String>,
}

impl<'a> DigestMetadata<'a> {
    pub fn from_manifest(manifest: &'a BundleManifest) -> Self {
        Self {
            version: &manifest.version,
            governance_level: &manifest.governance_level,
            created: manifest.created,
            metadata: &manifest.metadata,
        }
    }
}

/// Build the canonical digest input.
///
/// `entries` are `(path, checksum)` pairs in any order.
pub fn canonical_input<'e, I>(entries: I, meta: &DigestMetadata<'_>) -> Vec<u8>
where
    I: IntoIterator<Item = (&'e str, &'e str)>,
{
    let mut sorted: Vec<(&str, &str)> = entries.into_iter().collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let mut out = Vec::new();
    for (path, checksum) in sorted {
        out.extend_from_slice(path.as_bytes());
        out.push(0);
        out.extend_from_slice(checksum.as_bytes());
        out.push(b'\n');
    }

    push_line(&mut out, "version", meta.version);
    push_line(&mut out, "governance_level", meta.governance_level);
    push_line(&mut out, "created", &canonical_timestamp(meta.created));
    // BTreeMap iterates in key order.
    for (key, value) in meta.metadata {
        push_line(&mut out, key, value);
    }
    out
}

fn push_line(out: &mut Vec<u8>, key: &str, value: &str) {
    out.extend_from_slice(key.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value.as_bytes());
    out.push(b'\n');
}

/// Compute the integrity digest for a file set plus manifest metadata.
pub fn compute_digest<'e, I>(entries: I, meta: &DigestMetadata<'_>) -> String
where
    I: IntoIterator<Item = (&'e str, &'e str)>,
{
    sha256_prefixed(&canonical_input(entries, meta))
}

/// Recompute the digest from the checksums a manifest records.
pub fn manifest_digest(manifest: &BundleManifest) -> String {
    compute_digest(
        manifest
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.checksum.as_str())),
        &DigestMetadata::from_manifest(manifest),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn canonical_input_layout() {
        let mut metadata = BTreeMap::new();
        metadata.insert("team".to_string(), "platform".to_string());
        metadata.insert("env".to_string(), "prod".to_string());
        let meta = DigestMetadata {
            version: "1.2.0",
            governance_level: "strict",
            created: created() + chrono::Duration::milliseconds(750),
            metadata: &metadata,
        };
        let input = canonical_input(
            [("spec.yaml", "sha256:bb"), ("policies/a.yaml", "sha256:aa")],
            &meta,
        );
        let expected = "policies/a.yaml\0sha256:aa\n\
                        spec.yaml\0sha256:bb\n\
                        version=1.2.0\n\
                        governance_level=strict\n\
                        created=2026-03-01T12:00:00Z\n\
                        env=prod\n\
                        team=platform\n";
        assert_eq!(String::from_utf8(input.clone()).unwrap(), expected);
        let entries = [("spec.yaml", "sha256:bb"), ("policies/a.yaml", "sha256:aa")];
        assert_eq!(compute_digest(entries, &meta), sha256_prefixed(&input));
    }

    #[test]
    fn sub_second_noise_does_not_change_digest() {
        let metadata = BTreeMap::new();
        let a = DigestMetadata {
            version: "1",
            governance_level: "standard",
            created: created(),
            metadata: &metadata,
        };
        let b = DigestMetadata {
            created: created() + chrono::Duration::nanoseconds(999_999_999),
            ..a
        };
        assert_eq!(
            compute_digest([("a", "sha256:1")], &a),
            compute_digest([("a", "sha256:1")], &b)
        );
    }

    #[test]
    fn metadata_change_changes_digest() {
        let empty = BTreeMap::new();
        let mut tagged = BTreeMap::new();
        tagged.insert("ticket".to_string(), "GOV-1".to_string());
        let base = DigestMetadata {
            version: "1",
            governance_level: "standard",
            created: created(),
            metadata: &empty,
        };
        let with_tag = DigestMetadata {
            metadata: &tagged,
            ..base
        };
        assert_ne!(
            compute_digest([("a", "sha256:1")], &base),
            compute_digest([("a", "sha256:1")], &with_tag)
        );
    }

    #[test]
    fn checksum_format() {
        let sum = file_checksum(b"a");
        assert!(sum.starts_with("sha256:"));
        assert_eq!(sum.len(), "sha256:".len() + 64);
    }

    proptest! {
        #[test]
        fn digest_ignores_entry_order(
            files in proptest::collection::btree_map("[a-z]{1,8}(/[a-z]{1,8})?", "[0-9a-f]{8}", 1..12),
            seed in any::<u64>(),
        ) {
            let metadata = BTreeMap::new();
            let meta = DigestMetadata {
                version: "1",
                governance_level: "standard",
                created: created(),
                metadata: &metadata,
            };
            let forward: Vec<(&str, &str)> = files.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let mut shuffled = forward.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();
            prop_assert_eq!(compute_digest(forward, &meta), compute_digest(shuffled, &meta));
        }
    }
}
