//! Provenance attestations.
//!
//! The concrete backend (Sigstore, in-toto, SLSA) is pluggable through
//! [`AttestationGenerator`] and [`AttestationVerifier`]. [`Ed25519Attestor`] is
//! a self-contained backend that signs a DSSE-style pre-authentication
//! encoding of the canonical statement:
//!
//! ```text
//! statement = JCS({format, signed_by, signed_at, plan_hash, output_hash, provenance})
//! PAE       = "DSSEv1" SP LEN(type) SP type SP LEN(statement) SP statement
//! signature = base64(ed25519_sign(key, PAE))
//! ```

use crate::digest::{canonical_timestamp, sha256_prefixed, truncate_to_seconds};
use crate::types::{Attestation, AttestationFormat, BundleManifest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// DSSE payload type for attestation statements.
pub const ATTESTATION_PAYLOAD_TYPE: &str = "application/vnd.govbundle.attestation+json;v=1";

/// What an attestation is generated over.
#[derive(Debug, Clone, Copy)]
pub struct AttestationSubject<'a> {
    pub manifest: &'a BundleManifest,
    /// Integrity digest; becomes `plan_hash`.
    pub digest: &'a str,
    /// Content-section hash; becomes `output_hash`.
    pub content_hash: &'a str,
    /// Finalized archive bytes at generation time.
    pub archive: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttestationError {
    #[error("attestation generation failed: {message}")]
    Generation { message: String },

    #[error("attestation signature invalid: {reason}")]
    InvalidSignature { reason: String },

    #[error("attestation signer not trusted: {signed_by}")]
    UntrustedSigner { signed_by: String },

    #[error("unsupported attestation format: {format}")]
    UnsupportedFormat { format: AttestationFormat },

    #[error("{format} attestation requires online verification")]
    OnlineRequired { format: AttestationFormat },

    #[error("malformed attestation: {reason}")]
    Malformed { reason: String },
}

/// Produces an attestation for a finalized archive.
pub trait AttestationGenerator {
    fn generate(&self, subject: &AttestationSubject<'_>) -> Result<Attestation, AttestationError>;
}

/// Checks an attestation's signature. Hash binding to the archive is checked
/// by the validator before this is called.
pub trait AttestationVerifier {
    fn verify(
        &self,
        attestation: &Attestation,
        allow_offline: bool,
    ) -> Result<(), AttestationError>;
}

/// Signed fields of an attestation, in canonical form.
#[derive(Serialize)]
struct Statement<'a> {
    format: AttestationFormat,
    signed_by: &'a str,
    signed_at: String,
    plan_hash: &'a str,
    output_hash: &'a str,
    provenance: &'a serde_json::Value,
}

fn statement_bytes(
    format: AttestationFormat,
    signed_by: &str,
    signed_at: DateTime<Utc>,
    plan_hash: &str,
    output_hash: &str,
    provenance: &serde_json::Value,
) -> Result<Vec<u8>, AttestationError> {
    let statement = Statement {
        format,
        signed_by,
        signed_at: canonical_timestamp(signed_at),
        plan_hash,
        output_hash,
        provenance,
    };
    serde_jcs::to_vec(&statement).map_err(|e| AttestationError::Malformed {
        reason: format!("canonicalizing statement: {e}"),
    })
}

/// DSSE pre-authentication encoding.
pub(crate) fn build_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut pae = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    pae.extend_from_slice(b"DSSEv1 ");
    pae.extend_from_slice(payload_type.len().to_string().as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_type.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload.len().to_string().as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload);
    pae
}

/// `sha256:<hex>` of the SPKI DER encoding of an ed25519 public key.
pub fn ed25519_key_id(key: &VerifyingKey) -> Result<String, AttestationError> {
    use ed25519_dalek::pkcs8::EncodePublicKey;
    let doc = key
        .to_public_key_der()
        .map_err(|e| AttestationError::Malformed {
            reason: format!("encoding public key: {e}"),
        })?;
    Ok(format!("sha256:{}", hex::encode(Sha256::digest(doc.as_bytes()))))
}

/// Built-in ed25519 attestation backend.
///
/// Holds a signing key for generation, or only a public key for verification.
pub struct Ed25519Attestor {
    signing_key: Option<SigningKey>,
    verifying_key: VerifyingKey,
    key_id: String,
    format: AttestationFormat,
}

impl std::fmt::Debug for Ed25519Attestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Attestor")
            .field("key_id", &self.key_id)
            .field("format", &self.format)
            .field("can_sign", &self.signing_key.is_some())
            .finish()
    }
}

impl Ed25519Attestor {
    pub fn new(signing_key: SigningKey) -> Result<Self, AttestationError> {
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            key_id: ed25519_key_id(&verifying_key)?,
            signing_key: Some(signing_key),
            verifying_key,
            format: AttestationFormat::InToto,
        })
    }

    /// Verification-only instance.
    pub fn verifier(verifying_key: VerifyingKey) -> Result<Self, AttestationError> {
        Ok(Self {
            key_id: ed25519_key_id(&verifying_key)?,
            signing_key: None,
            verifying_key,
            format: AttestationFormat::InToto,
        })
    }

    /// Load a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, AttestationError> {
        use ed25519_dalek::pkcs8::DecodePrivateKey;
        let key = SigningKey::from_pkcs8_pem(pem).map_err(|e| AttestationError::Malformed {
            reason: format!("private key: {e}"),
        })?;
        Self::new(key)
    }

    /// Load an SPKI PEM public key for verification.
    pub fn from_public_key_pem(pem: &str) -> Result<Self, AttestationError> {
        use ed25519_dalek::pkcs8::DecodePublicKey;
        let key =
            VerifyingKey::from_public_key_pem(pem).map_err(|e| AttestationError::Malformed {
                reason: format!("public key: {e}"),
            })?;
        Self::verifier(key)
    }

    pub fn with_format(mut self, format: AttestationFormat) -> Self {
        self.format = format;
        self
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl AttestationGenerator for Ed25519Attestor {
    fn generate(&self, subject: &AttestationSubject<'_>) -> Result<Attestation, AttestationError> {
        let signing_key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| AttestationError::Generation {
                message: "attestor holds no signing key".into(),
            })?;

        let signed_at = truncate_to_seconds(Utc::now());
        let provenance = serde_json::json!({
            "builder": concat!("govbundle-core/", env!("CARGO_PKG_VERSION")),
            "bundle_id": subject.manifest.id,
            "bundle_version": subject.manifest.version,
            "archive_sha256": sha256_prefixed(subject.archive),
            "archive_bytes": subject.archive.len(),
        });

        let statement = statement_bytes(
            self.format,
            &self.key_id,
            signed_at,
            subject.digest,
            subject.content_hash,
            &provenance,
        )?;
        let signature = signing_key.sign(&build_pae(ATTESTATION_PAYLOAD_TYPE, &statement));

        Ok(Attestation {
            format: self.format,
            signed_by: self.key_id.clone(),
            signed_at,
            plan_hash: subject.digest.to_string(),
            output_hash: subject.content_hash.to_string(),
            provenance,
            signature: BASE64.encode(signature.to_bytes()),
        })
    }
}

impl AttestationVerifier for Ed25519Attestor {
    fn verify(
        &self,
        attestation: &Attestation,
        allow_offline: bool,
    ) -> Result<(), AttestationError> {
        // A sigstore attestation checked against a local key alone has no
        // transparency log proof.
        if attestation.format == AttestationFormat::Sigstore && !allow_offline {
            return Err(AttestationError::OnlineRequired {
                format: attestation.format,
            });
        }
        if attestation.signed_by != self.key_id {
            return Err(AttestationError::UntrustedSigner {
                signed_by: attestation.signed_by.clone(),
            });
        }

        let statement = statement_bytes(
            attestation.format,
            &attestation.signed_by,
            attestation.signed_at,
            &attestation.plan_hash,
            &attestation.output_hash,
            &attestation.provenance,
        )?;

        let raw = BASE64
            .decode(&attestation.signature)
            .map_err(|e| AttestationError::Malformed {
                reason: format!("invalid base64 signature: {e}"),
            })?;
        let signature = ed25519_dalek::Signature::from_slice(&raw).map_err(|e| {
            AttestationError::Malformed {
                reason: format!("invalid signature bytes: {e}"),
            }
        })?;

        self.verifying_key
            .verify(&build_pae(ATTESTATION_PAYLOAD_TYPE, &statement), &signature)
            .map_err(|_| AttestationError::InvalidSignature {
                reason: "ed25519 verification failed".into(),
            })
    }
}
