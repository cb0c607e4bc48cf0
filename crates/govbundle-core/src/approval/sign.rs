//! Produce a signed approval for a bundle digest.

use super::backend::SignatureBackend;
use super::canonical::{canonical_message, check_identity_field, is_digest};
use super::gpg::GpgBackend;
use super::ssh::SshBackend;
use crate::digest::truncate_to_seconds;
use crate::types::{Approval, SignatureType};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid approval request: {message}")]
    InvalidRequest { message: String },

    #[error("no usable signing key (searched: {})", searched.join(", "))]
    NoUsableKey { searched: Vec<String> },

    #[error("signing key {key} is protected by a passphrase")]
    PassphraseRequired { key: String },

    #[error("unsupported key type '{key_type}'")]
    UnsupportedKeyType { key_type: String },

    #[error("unsupported signature type '{signature_type}'")]
    UnsupportedSignatureType { signature_type: String },

    #[error("{backend} signing failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
}

/// What to approve and how to sign it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub bundle_digest: String,
    pub role: String,
    pub user: String,
    pub comment: String,
    pub signature_type: SignatureType,
    /// SSH private key. Falls back to the default key list when unset.
    pub key_path: Option<PathBuf>,
    /// GPG key id or fingerprint. Uses gpg's default key when unset.
    pub key_id: Option<String>,
}

impl SignRequest {
    pub fn new(
        bundle_digest: impl Into<String>,
        role: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            bundle_digest: bundle_digest.into(),
            role: role.into(),
            user: user.into(),
            comment: String::new(),
            signature_type: SignatureType::Ssh,
            key_path: None,
            key_id: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_signature_type(mut self, signature_type: SignatureType) -> Self {
        self.signature_type = signature_type;
        self
    }

    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    fn validate(&self) -> Result<(), SigningError> {
        if !is_digest(&self.bundle_digest) {
            return Err(invalid(format!(
                "bundle digest '{}' is not sha256:<64 hex>",
                self.bundle_digest
            )));
        }
        check_identity_field("role", &self.role).map_err(invalid)?;
        check_identity_field("user", &self.user).map_err(invalid)
    }
}

/// Sign with the backend selected by `request.signature_type`, stamped now.
pub fn sign_approval(request: &SignRequest) -> Result<Approval, SigningError> {
    let backend: Box<dyn SignatureBackend> = match &request.signature_type {
        SignatureType::Ssh => {
            if request.key_id.is_some() {
                return Err(invalid("key ids apply to gpg signing; use a key path for ssh"));
            }
            Box::new(match &request.key_path {
                Some(path) => SshBackend::with_key(path),
                None => SshBackend::new(),
            })
        }
        SignatureType::Gpg => {
            if request.key_path.is_some() {
                return Err(invalid("key paths apply to ssh signing; use a key id for gpg"));
            }
            let backend = GpgBackend::new();
            Box::new(match &request.key_id {
                Some(id) => backend.with_key_id(id.clone()),
                None => backend,
            })
        }
        SignatureType::Other(other) => {
            return Err(SigningError::UnsupportedSignatureType {
                signature_type: other.clone(),
            })
        }
    };
    sign_approval_with(request, backend.as_ref(), Utc::now())
}

/// Sign with an explicit backend and timestamp.
///
/// `signed_at` is truncated to whole seconds before it is signed, so the
/// stored value reproduces the signed message exactly.
pub fn sign_approval_with(
    request: &SignRequest,
    backend: &dyn SignatureBackend,
    signed_at: DateTime<Utc>,
) -> Result<Approval, SigningError> {
    request.validate()?;
    if backend.signature_type() != request.signature_type {
        return Err(invalid(format!(
            "request asks for {} but the backend signs {}",
            request.signature_type,
            backend.signature_type()
        )));
    }

    let signed_at = truncate_to_seconds(signed_at);
    let message = canonical_message(
        &request.bundle_digest,
        &request.role,
        &request.user,
        signed_at,
        &request.comment,
    );
    let signed = backend.sign(message.as_bytes())?;

    tracing::info!(
        role = %request.role,
        user = %request.user,
        digest = %request.bundle_digest,
        signature_type = %request.signature_type,
        fingerprint = %signed.fingerprint,
        "approval signed"
    );

    Ok(Approval {
        bundle_digest: request.bundle_digest.clone(),
        role: request.role.clone(),
        user: request.user.clone(),
        comment: request.comment.clone(),
        signature_type: request.signature_type.clone(),
        signature: signed.signature,
        public_key_fingerprint: signed.fingerprint,
        signed_at,
    })
}

fn invalid(message: impl Into<String>) -> SigningError {
    SigningError::InvalidRequest {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::backend::BackendSignature;
    use crate::approval::verify::VerifyFailure;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl SignatureBackend for Recording {
        fn signature_type(&self) -> SignatureType {
            SignatureType::Ssh
        }
        fn sign(&self, payload: &[u8]) -> Result<BackendSignature, SigningError> {
            self.seen
                .lock()
                .unwrap()
                .push(String::from_utf8(payload.to_vec()).unwrap());
            Ok(BackendSignature {
                signature: "SIG".into(),
                fingerprint: "SHA256:test".into(),
            })
        }
        fn verify_with(&self, _: &str, _: &[u8], _: &str) -> Result<bool, VerifyFailure> {
            Ok(true)
        }
    }

    fn digest() -> String {
        format!("sha256:{}", "ab".repeat(32))
    }

    #[test]
    fn signs_canonical_message_with_truncated_time() {
        let backend = Recording::default();
        let at = Utc.with_ymd_and_hms(2026, 4, 1, 9, 30, 0).unwrap()
            + chrono::Duration::milliseconds(999);
        let request = SignRequest::new(digest(), "pm", "alice").with_comment("lgtm");
        let approval = sign_approval_with(&request, &backend, at).unwrap();

        assert_eq!(approval.signed_at.timestamp_subsec_nanos(), 0);
        assert_eq!(approval.signature, "SIG");
        assert_eq!(approval.public_key_fingerprint, "SHA256:test");
        assert_eq!(
            backend.seen.lock().unwrap().as_slice(),
            [format!("{}|pm|alice|2026-04-01T09:30:00Z|lgtm", digest())]
        );
    }

    #[test]
    fn rejects_separator_in_role() {
        let request = SignRequest::new(digest(), "pm|x", "alice");
        let err = sign_approval_with(&request, &Recording::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, SigningError::InvalidRequest { .. }));
    }

    #[test]
    fn rejects_bad_digest_and_empty_user() {
        let backend = Recording::default();
        for request in [
            SignRequest::new("sha256:abc", "pm", "alice"),
            SignRequest::new(digest(), "pm", " "),
        ] {
            assert!(matches!(
                sign_approval_with(&request, &backend, Utc::now()),
                Err(SigningError::InvalidRequest { .. })
            ));
        }
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn backend_type_must_match_request() {
        let request =
            SignRequest::new(digest(), "pm", "alice").with_signature_type(SignatureType::Gpg);
        assert!(matches!(
            sign_approval_with(&request, &Recording::default(), Utc::now()),
            Err(SigningError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn unknown_signature_type_is_rejected() {
        let request = SignRequest::new(digest(), "pm", "alice")
            .with_signature_type(SignatureType::Other("x509".into()));
        assert!(matches!(
            sign_approval(&request),
            Err(SigningError::UnsupportedSignatureType { .. })
        ));
    }
}
