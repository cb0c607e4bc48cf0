//! Error types for bundle build, load and write.
//!
//! Approval, policy, attestation, extraction and config failures have their own
//! types next to the code that raises them; this module holds the errors that
//! touch the archive itself.

use std::path::PathBuf;

/// Coarse classification of a [`BundleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or missing caller input (paths, options).
    Input,
    /// Content does not match what was recorded.
    Integrity,
    /// Archive layout or document shape is wrong.
    Contract,
    /// Path traversal, absolute paths and similar hostile content.
    Security,
    /// Resource limit exceeded while reading.
    Limits,
    /// Filesystem or stream failure.
    Io,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Errors raised while building, loading or rewriting a bundle.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// A required input could not be read.
    #[error("missing input: {}", path.display())]
    MissingInput { path: PathBuf },

    /// Two inputs map to the same relative path inside the bundle.
    #[error("path conflict: '{path}' is already part of the bundle")]
    PathConflict { path: String },

    /// Malformed options (empty role, bad metadata key, ...).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Recorded content does not match the bytes.
    #[error("integrity violation at '{path}': {message}")]
    Integrity { path: String, message: String },

    /// Archive or document cannot be parsed.
    #[error("malformed bundle: {message}")]
    Malformed { message: String },

    /// Hostile archive content.
    #[error("unsafe entry '{path}': {message}")]
    Security { path: String, message: String },

    /// A read limit was hit.
    #[error("limit exceeded: {what} (limit {limit})")]
    Limit { what: String, limit: u64 },

    /// Filesystem or stream failure, tagged with the operation that failed.
    #[error("{operation} failed for {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BundleError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingInput { .. } | Self::PathConflict { .. } | Self::InvalidInput { .. } => {
                ErrorClass::Input
            }
            Self::Integrity { .. } => ErrorClass::Integrity,
            Self::Malformed { .. } => ErrorClass::Contract,
            Self::Security { .. } => ErrorClass::Security,
            Self::Limit { .. } => ErrorClass::Limits,
            Self::Io { .. } => ErrorClass::Io,
        }
    }

    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// Result alias for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_variants() {
        assert_eq!(
            BundleError::MissingInput {
                path: "spec.yaml".into()
            }
            .class(),
            ErrorClass::Input
        );
        assert_eq!(
            BundleError::Security {
                path: "../x".into(),
                message: "traversal".into()
            }
            .class(),
            ErrorClass::Security
        );
        let io = BundleError::io(
            "read",
            "spec.yaml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(io.class(), ErrorClass::Io);
        assert!(io.to_string().contains("read failed for spec.yaml"));
    }
}
