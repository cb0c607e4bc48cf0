//! Content-addressed governance bundles.
//!
//! A bundle packages a spec file plus optional lock, routing, policy and
//! included files behind a single integrity digest. Approvals are signed
//! over that digest per role, and a validator reduces the combined checks to
//! a CI exit code.
//!
//! ```no_run
//! use govbundle_core::{build, BuildOptions, Gate, ValidateOptions, Validator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let outcome = build(&BuildOptions::new("spec.yaml", "bundle.tar.gz"), None)?;
//! println!("{}", outcome.bundle.digest());
//!
//! let validator = Validator::default();
//! let options = ValidateOptions {
//!     required_roles: vec!["pm".into()],
//!     ..ValidateOptions::default()
//! };
//! let gate = Gate::new(&validator, options).run(&outcome.output);
//! std::process::exit(gate.exit_code);
//! # }
//! ```

pub mod approval;
pub mod attestation;
pub mod bundle;
pub mod config;
pub mod diff;
pub mod digest;
pub mod error;
pub mod extract;
pub mod policy;
pub mod repository;
pub mod types;
pub mod validate;

// Convenience re-exports
pub use approval::{
    sign_approval, verify_approval, ApprovalStore, Backends, SignRequest, SigningError,
    VerificationError, VerifyPolicy,
};
pub use attestation::{AttestationGenerator, AttestationVerifier, Ed25519Attestor};
pub use bundle::{build, BuildOptions, BuildOutcome, Bundle, BundleInfo, ReadLimits};
pub use config::{load_config, GovernanceConfig};
pub use diff::{diff_bundles, DiffResult};
pub use digest::{compute_digest, manifest_digest};
pub use error::{BundleError, BundleResult, ErrorClass};
pub use extract::{ApplyOptions, ApplyReport, Extractor};
pub use policy::{CommandEvaluator, PolicyEvaluator, PolicyVerdict};
pub use repository::{FsRepository, MemoryRepository, Repository};
pub use types::{Approval, Attestation, BundleManifest, FileEntry, SignatureType};
pub use validate::{Gate, GateOutcome, ValidateOptions, ValidationResult, Validator};
