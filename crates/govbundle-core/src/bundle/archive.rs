//! Deterministic tar.gz encoding and bounded decoding.

use crate::error::{BundleError, BundleResult};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::io::{Read, Write};
use std::path::Component;
use tar::{Builder, EntryType, Header};

use super::limits::{LimitReader, ReadLimits, LIMIT_TAG_BUNDLE, LIMIT_TAG_DECODE};

/// Write `entries` in the given order as a reproducible tar.gz stream.
///
/// Timestamps, ownership and modes are fixed so identical entries always
/// produce identical archive bytes.
pub(crate) fn write_archive<W: Write>(writer: W, entries: &[(&str, &[u8])]) -> std::io::Result<W> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(writer, Compression::best());

    let mut tar = Builder::new(encoder);
    tar.mode(tar::HeaderMode::Deterministic);

    for (path, data) in entries {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_username("govbundle")?;
        header.set_groupname("govbundle")?;
        // append_data handles GNU long names and the checksum.
        tar.append_data(&mut header, path, *data)?;
    }

    let encoder = tar.into_inner()?;
    encoder.finish()
}

/// Decode an archive into `(path, bytes)` pairs in archive order.
///
/// Rejects anything that is not a regular file at a relative, normalised path.
pub(crate) fn read_archive<R: Read>(
    reader: R,
    limits: &ReadLimits,
) -> BundleResult<Vec<(String, Vec<u8>)>> {
    let reader = LimitReader::new(reader, limits.max_bundle_bytes, LIMIT_TAG_BUNDLE);
    let decoder = GzDecoder::new(reader);
    let decoder = LimitReader::new(decoder, limits.max_decode_bytes, LIMIT_TAG_DECODE);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|e| map_stream_error(e, limits, "opening archive"))?;

    let mut out = Vec::new();
    for (index, entry) in entries.enumerate() {
        let mut entry = entry.map_err(|e| map_stream_error(e, limits, "reading entry header"))?;

        if out.len() >= limits.max_entries {
            return Err(BundleError::Limit {
                what: "entry count".into(),
                limit: limits.max_entries as u64,
            });
        }

        let entry_type = entry.header().entry_type();
        let raw_path = entry
            .path()
            .map_err(|e| BundleError::malformed(format!("entry #{index}: bad path: {e}")))?
            .into_owned();
        let path_str = raw_path.to_string_lossy().to_string();

        if entry_type.is_dir() {
            continue;
        }
        if !matches!(entry_type, EntryType::Regular | EntryType::Continuous) {
            return Err(BundleError::Security {
                path: path_str,
                message: format!("unsupported entry type {:?}", entry_type),
            });
        }

        if path_str.len() > limits.max_path_len {
            return Err(BundleError::Limit {
                what: format!("path length of '{}'", path_str),
                limit: limits.max_path_len as u64,
            });
        }
        let path = normalize_entry_path(&raw_path).ok_or_else(|| BundleError::Security {
            path: path_str.clone(),
            message: "path must be relative without '..' components".into(),
        })?;

        let declared = entry
            .header()
            .size()
            .map_err(|e| BundleError::malformed(format!("entry '{path}': bad size: {e}")))?;
        if declared > limits.max_entry_bytes {
            return Err(BundleError::Limit {
                what: format!("size of entry '{}'", path),
                limit: limits.max_entry_bytes,
            });
        }

        let mut data = Vec::with_capacity(declared as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| map_stream_error(e, limits, "reading entry data"))?;
        out.push((path, data));
    }

    Ok(out)
}

/// Join normal components with `/`; `None` if the path escapes or is absolute.
pub(crate) fn normalize_entry_path(path: &std::path::Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn map_stream_error(err: std::io::Error, limits: &ReadLimits, context: &str) -> BundleError {
    let message = err.to_string();
    if message.contains(LIMIT_TAG_BUNDLE) {
        BundleError::Limit {
            what: "compressed bundle size".into(),
            limit: limits.max_bundle_bytes,
        }
    } else if message.contains(LIMIT_TAG_DECODE) {
        BundleError::Limit {
            what: "decompressed bundle size".into(),
            limit: limits.max_decode_bytes,
        }
    } else {
        BundleError::malformed(format!("{context}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn write_is_reproducible() {
        let entries: Vec<(&str, &[u8])> = vec![("manifest.json", b"{}"), ("spec.yaml", b"a")];
        let first = write_archive(Vec::new(), &entries).unwrap();
        let second = write_archive(Vec::new(), &entries).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn read_returns_entries_in_order() {
        let long = format!("{}/file.yaml", "deep".repeat(40));
        let entries: Vec<(&str, &[u8])> = vec![
            ("manifest.json", b"{}"),
            ("policies/a.yaml", b"allow"),
            (long.as_str(), b"x"),
        ];
        let bytes = write_archive(Vec::new(), &entries).unwrap();
        let read = read_archive(bytes.as_slice(), &ReadLimits::default()).unwrap();
        let paths: Vec<&str> = read.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["manifest.json", "policies/a.yaml", long.as_str()]);
        assert_eq!(read[1].1, b"allow");
    }

    #[test]
    fn entry_limit_is_enforced() {
        let entries: Vec<(&str, &[u8])> = vec![("a", b"1"), ("b", b"2"), ("c", b"3")];
        let bytes = write_archive(Vec::new(), &entries).unwrap();
        let limits = ReadLimits {
            max_entries: 2,
            ..ReadLimits::default()
        };
        let err = read_archive(bytes.as_slice(), &limits).unwrap_err();
        assert!(matches!(err, BundleError::Limit { .. }));
    }

    #[test]
    fn compressed_size_limit_is_enforced() {
        let big = vec![1u8; 4096];
        let entries: Vec<(&str, &[u8])> = vec![("a", big.as_slice())];
        let bytes = write_archive(Vec::new(), &entries).unwrap();
        let limits = ReadLimits {
            max_bundle_bytes: 16,
            ..ReadLimits::default()
        };
        let err = read_archive(bytes.as_slice(), &limits).unwrap_err();
        assert!(matches!(err, BundleError::Limit { .. }), "{err}");
    }

    #[test]
    fn garbage_is_malformed() {
        let err = read_archive(&b"not a gzip stream"[..], &ReadLimits::default()).unwrap_err();
        assert!(matches!(err, BundleError::Malformed { .. }));
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert_eq!(normalize_entry_path(Path::new("./a/b")), Some("a/b".into()));
        assert_eq!(normalize_entry_path(Path::new("../a")), None);
        assert_eq!(normalize_entry_path(Path::new("/etc/passwd")), None);
    }
}
