use serde::Deserialize;
use std::io::Read;

/// Resource limits applied when reading an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    /// Compressed archive size.
    pub max_bundle_bytes: u64,
    /// Total decompressed size.
    pub max_decode_bytes: u64,
    /// Any single entry.
    pub max_entry_bytes: u64,
    pub max_entries: usize,
    pub max_path_len: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            max_bundle_bytes: 256_u64 * 1024 * 1024,
            max_decode_bytes: 1024_u64 * 1024 * 1024,
            max_entry_bytes: 128_u64 * 1024 * 1024,
            max_entries: 10_000,
            max_path_len: 512,
        }
    }
}

/// Partial overrides for `ReadLimits`, as found in config files.
/// Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadLimitsOverrides {
    pub max_bundle_bytes: Option<u64>,
    pub max_decode_bytes: Option<u64>,
    pub max_entry_bytes: Option<u64>,
    pub max_entries: Option<usize>,
    pub max_path_len: Option<usize>,
}

impl ReadLimits {
    /// Apply overrides onto these limits. Only `Some` values override.
    pub fn apply(self, overrides: &ReadLimitsOverrides) -> Self {
        Self {
            max_bundle_bytes: overrides.max_bundle_bytes.unwrap_or(self.max_bundle_bytes),
            max_decode_bytes: overrides.max_decode_bytes.unwrap_or(self.max_decode_bytes),
            max_entry_bytes: overrides.max_entry_bytes.unwrap_or(self.max_entry_bytes),
            max_entries: overrides.max_entries.unwrap_or(self.max_entries),
            max_path_len: overrides.max_path_len.unwrap_or(self.max_path_len),
        }
    }
}

/// Tag carried in the io error message when a `LimitReader` trips.
pub(crate) const LIMIT_TAG_BUNDLE: &str = "LimitBundleBytes";
pub(crate) const LIMIT_TAG_DECODE: &str = "LimitDecodeBytes";

/// A reader that fails explicitly once `limit` bytes have been consumed.
pub(crate) struct LimitReader<R> {
    inner: R,
    limit: u64,
    read: u64,
    error_tag: &'static str,
}

impl<R: Read> LimitReader<R> {
    pub(crate) fn new(inner: R, limit: u64, error_tag: &'static str) -> Self {
        Self {
            inner,
            limit,
            read: 0,
            error_tag,
        }
    }
}

impl<R: Read> Read for LimitReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.read >= self.limit {
            // Only an error if the stream actually has more data.
            let mut probe = [0u8; 1];
            return match self.inner.read(&mut probe)? {
                0 => Ok(0),
                _ => Err(std::io::Error::other(format!(
                    "{}: exceeded limit of {} bytes",
                    self.error_tag, self.limit
                ))),
            };
        }

        let max_to_read = (self.limit - self.read).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..max_to_read])?;
        self.read += n as u64;
        Ok(n)
    }
}
