//! Signature backends.
//!
//! A backend turns a canonical approval message into a detached signature
//! and checks one later. Approvals name their backend through
//! [`SignatureType`]; [`Backends`] maps the name to an implementation.

use super::sign::SigningError;
use super::verify::VerifyFailure;
use crate::types::SignatureType;
use std::collections::BTreeMap;

/// Detached signature plus the fingerprint of the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSignature {
    pub signature: String,
    pub fingerprint: String,
}

pub trait SignatureBackend: Send + Sync {
    fn signature_type(&self) -> SignatureType;

    /// Sign `payload` with the backend's resolved key.
    fn sign(&self, payload: &[u8]) -> Result<BackendSignature, SigningError>;

    /// Check `signature` over `payload` for the key identified by
    /// `fingerprint`.
    ///
    /// `Ok(false)` means the signature is well formed but does not verify
    /// for that key. `Err` means verification could not be attempted.
    fn verify_with(
        &self,
        fingerprint: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<bool, VerifyFailure>;
}

/// Registry of backends keyed by signature type.
#[derive(Default)]
pub struct Backends {
    backends: BTreeMap<SignatureType, Box<dyn SignatureBackend>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// SSH (default key search) and GPG (default keyring).
    pub fn with_defaults() -> Self {
        let mut backends = Self::new();
        backends.register(Box::new(super::ssh::SshBackend::new()));
        backends.register(Box::new(super::gpg::GpgBackend::new()));
        backends
    }

    /// Register a backend, replacing any previous one for the same type.
    pub fn register(&mut self, backend: Box<dyn SignatureBackend>) {
        self.backends.insert(backend.signature_type(), backend);
    }

    pub fn get(&self, signature_type: &SignatureType) -> Option<&dyn SignatureBackend> {
        self.backends.get(signature_type).map(|b| b.as_ref())
    }

    pub fn types(&self) -> impl Iterator<Item = &SignatureType> {
        self.backends.keys()
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.backends.keys()).finish()
    }
}
