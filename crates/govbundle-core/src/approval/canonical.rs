//! The exact byte string an approval signature covers.
//!
//! ```text
//! <bundle digest>|<role>|<user>|<signed_at, RFC 3339 seconds, Z>|<comment>
//! ```
//!
//! Field order and separators are fixed. Role and user may not contain `|`,
//! and the digest and timestamp have fixed shapes, so the comment is the only
//! free-form field and the encoding stays unambiguous. [`check_identity_field`]
//! enforces this both when signing and when verifying.

use crate::digest::canonical_timestamp;
use chrono::{DateTime, Utc};

pub const FIELD_SEPARATOR: char = '|';

pub fn canonical_message(
    bundle_digest: &str,
    role: &str,
    user: &str,
    signed_at: DateTime<Utc>,
    comment: &str,
) -> String {
    format!(
        "{bundle_digest}|{role}|{user}|{}|{comment}",
        canonical_timestamp(signed_at)
    )
}

/// Role or user: non-blank, no `|`, no control characters.
pub(crate) fn check_identity_field(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    if value.contains(FIELD_SEPARATOR) || value.chars().any(char::is_control) {
        return Err(format!("{field} '{value}' contains '|' or control characters"));
    }
    Ok(())
}

/// `sha256:` followed by 64 lowercase hex characters.
pub(crate) fn is_digest(value: &str) -> bool {
    value
        .strip_prefix("sha256:")
        .map(|hex| hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')))
        .unwrap_or(false)
}
