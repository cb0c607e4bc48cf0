//! SSH signatures (`SSHSIG`, the format behind `ssh-keygen -Y sign`).
//!
//! Signatures are created under the `govbundle` namespace with SHA-512 and
//! stored as armored PEM. Each signature embeds its public key, so
//! verification needs no keyring: the embedded key must match the claimed
//! fingerprint and the signature must verify under it. Whether that key is
//! trusted is a policy decision made by the caller.

use super::backend::{BackendSignature, SignatureBackend};
use super::sign::SigningError;
use super::verify::VerifyFailure;
use crate::types::SignatureType;
use ssh_key::{Algorithm, HashAlg, LineEnding, PrivateKey, PublicKey, SshSig};
use std::path::{Path, PathBuf};

/// `SSHSIG` namespace for approval signatures.
pub const SSH_NAMESPACE: &str = "govbundle";

/// Keys tried in order under `$HOME` when no key path is given.
pub const DEFAULT_KEY_FILES: &[&str] = &[".ssh/id_ed25519", ".ssh/id_ecdsa", ".ssh/id_rsa"];

#[derive(Debug, Clone)]
pub struct SshBackend {
    candidates: Vec<PathBuf>,
    explicit: bool,
}

impl Default for SshBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SshBackend {
    /// Search the default key files under the home directory.
    pub fn new() -> Self {
        let candidates = dirs::home_dir()
            .map(|home| DEFAULT_KEY_FILES.iter().map(|f| home.join(f)).collect())
            .unwrap_or_default();
        Self {
            candidates,
            explicit: false,
        }
    }

    /// Use exactly this private key.
    pub fn with_key(path: impl Into<PathBuf>) -> Self {
        Self {
            candidates: vec![path.into()],
            explicit: true,
        }
    }

    /// Search these paths in order.
    pub fn with_search_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            candidates: paths.into_iter().collect(),
            explicit: false,
        }
    }

    fn resolve_key(&self) -> Result<(PathBuf, PrivateKey), SigningError> {
        let path = self
            .candidates
            .iter()
            .find(|p| self.explicit || p.is_file())
            .ok_or_else(|| SigningError::NoUsableKey {
                searched: self.candidates.iter().map(|p| p.display().to_string()).collect(),
            })?;

        let key = PrivateKey::read_openssh_file(path).map_err(|e| match e {
            ssh_key::Error::Io(std::io::ErrorKind::NotFound) => {
                SigningError::NoUsableKey {
                    searched: vec![path.display().to_string()],
                }
            }
            other => SigningError::Backend {
                backend: "ssh",
                message: format!("reading {}: {other}", path.display()),
            },
        })?;
        tracing::debug!(key = %path.display(), algorithm = %key.algorithm(), "resolved ssh key");
        Ok((path.clone(), key))
    }
}

impl SignatureBackend for SshBackend {
    fn signature_type(&self) -> SignatureType {
        SignatureType::Ssh
    }

    fn sign(&self, payload: &[u8]) -> Result<BackendSignature, SigningError> {
        let (path, key) = self.resolve_key()?;
        if key.is_encrypted() {
            return Err(SigningError::PassphraseRequired {
                key: path.display().to_string(),
            });
        }
        if key.algorithm() != Algorithm::Ed25519 {
            return Err(SigningError::UnsupportedKeyType {
                key_type: key.algorithm().to_string(),
            });
        }

        let sig = key
            .sign(SSH_NAMESPACE, HashAlg::Sha512, payload)
            .map_err(|e| backend_error(format!("signing: {e}")))?;
        let signature = sig
            .to_pem(LineEnding::LF)
            .map_err(|e| backend_error(format!("encoding signature: {e}")))?;

        Ok(BackendSignature {
            signature,
            fingerprint: key.public_key().fingerprint(HashAlg::Sha256).to_string(),
        })
    }

    fn verify_with(
        &self,
        fingerprint: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<bool, VerifyFailure> {
        let sig = SshSig::from_pem(signature).map_err(|e| VerifyFailure::Malformed {
            message: format!("ssh signature: {e}"),
        })?;
        let public = PublicKey::new(sig.public_key().clone(), "");
        let embedded = public.fingerprint(HashAlg::Sha256).to_string();
        if embedded != fingerprint {
            tracing::debug!(
                claimed = %fingerprint,
                embedded = %embedded,
                "ssh fingerprint mismatch"
            );
            return Ok(false);
        }
        Ok(public.verify(SSH_NAMESPACE, payload, &sig).is_ok())
    }
}

/// Fingerprint (`SHA256:...`) of an OpenSSH public key file.
pub fn public_key_file_fingerprint(path: &Path) -> Result<String, ssh_key::Error> {
    let key = PublicKey::read_openssh_file(path)?;
    Ok(key.fingerprint(HashAlg::Sha256).to_string())
}

fn backend_error(message: String) -> SigningError {
    SigningError::Backend {
        backend: "ssh",
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn write_key(dir: &Path, name: &str) -> (PathBuf, PrivateKey) {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let path = dir.join(name);
        key.write_openssh_file(&path, LineEnding::LF).unwrap();
        (path, key)
    }

    #[test]
    fn sign_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let (path, key) = write_key(dir.path(), "id_ed25519");
        let backend = SshBackend::with_key(&path);

        let signed = backend.sign(b"payload").unwrap();
        assert!(signed.signature.starts_with("-----BEGIN SSH SIGNATURE-----"));
        assert_eq!(
            signed.fingerprint,
            key.public_key().fingerprint(HashAlg::Sha256).to_string()
        );
        assert!(signed.fingerprint.starts_with("SHA256:"));

        let verifier = SshBackend::with_search_paths(Vec::new());
        assert!(verifier
            .verify_with(&signed.fingerprint, b"payload", &signed.signature)
            .unwrap());
        assert!(!verifier
            .verify_with(&signed.fingerprint, b"payloaD", &signed.signature)
            .unwrap());
    }

    #[test]
    fn claimed_fingerprint_must_match_embedded_key() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_key(dir.path(), "a");
        let (_, other) = write_key(dir.path(), "b");
        let signed = SshBackend::with_key(&path).sign(b"m").unwrap();
        let other_fp = other.public_key().fingerprint(HashAlg::Sha256).to_string();
        assert!(!SshBackend::new()
            .verify_with(&other_fp, b"m", &signed.signature)
            .unwrap());
    }

    #[test]
    fn garbage_signature_is_malformed() {
        let err = SshBackend::new()
            .verify_with("SHA256:x", b"m", "not a signature")
            .unwrap_err();
        assert!(matches!(err, VerifyFailure::Malformed { .. }));
    }

    #[test]
    fn search_picks_first_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let (second, key) = write_key(dir.path(), "id_ecdsa");
        let backend =
            SshBackend::with_search_paths(vec![dir.path().join("id_ed25519"), second]);
        let signed = backend.sign(b"m").unwrap();
        assert_eq!(
            signed.fingerprint,
            key.public_key().fingerprint(HashAlg::Sha256).to_string()
        );
    }

    #[test]
    fn no_key_reports_searched_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("id_ed25519");
        let err = SshBackend::with_search_paths(vec![missing.clone()])
            .sign(b"m")
            .unwrap_err();
        match err {
            SigningError::NoUsableKey { searched } => {
                assert_eq!(searched, vec![missing.display().to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = SshBackend::with_key(&missing).sign(b"m").unwrap_err();
        assert!(matches!(err, SigningError::NoUsableKey { .. }));
    }

    #[test]
    fn public_key_file_fingerprint_matches_signature() {
        let dir = tempfile::tempdir().unwrap();
        let (path, key) = write_key(dir.path(), "id_ed25519");
        let pub_path = dir.path().join("id_ed25519.pub");
        key.public_key().write_openssh_file(&pub_path).unwrap();
        let signed = SshBackend::with_key(&path).sign(b"m").unwrap();
        assert_eq!(public_key_file_fingerprint(&pub_path).unwrap(), signed.fingerprint);
    }
}
