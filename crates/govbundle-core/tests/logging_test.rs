//! Structured log contract: outcomes are logged with their fields, signature
//! material never is.

use govbundle_core::approval::{sign_approval_with, BackendSignature, SignatureBackend};
use govbundle_core::approval::{SigningError, VerifyFailure};
use govbundle_core::{
    build, Backends, BuildOptions, Gate, SignRequest, SignatureType, ValidateOptions, Validator,
};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const SECRET_SIGNATURE: &str = "-----BEGIN TEST SIGNATURE----- s3cr3t";

#[derive(Clone)]
struct MockWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MockWriter {
    type Writer = MockWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn setup_capture() -> (MockWriter, tracing::subscriber::DefaultGuard) {
    let writer = MockWriter {
        buf: Arc::new(Mutex::new(Vec::new())),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer.clone())
        .with_ansi(false)
        .with_env_filter(EnvFilter::new("govbundle_core=debug"))
        .finish();
    (writer, tracing::subscriber::set_default(subscriber))
}

struct Fixed;

impl SignatureBackend for Fixed {
    fn signature_type(&self) -> SignatureType {
        SignatureType::Ssh
    }
    fn sign(&self, _: &[u8]) -> Result<BackendSignature, SigningError> {
        Ok(BackendSignature {
            signature: SECRET_SIGNATURE.into(),
            fingerprint: "SHA256:fixed".into(),
        })
    }
    fn verify_with(&self, _: &str, _: &[u8], sig: &str) -> Result<bool, VerifyFailure> {
        Ok(sig == SECRET_SIGNATURE)
    }
}

#[test]
fn test_outcomes_logged_without_signatures() {
    let (writer, _guard) = setup_capture();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("spec.yaml"), "a").unwrap();
    let output = dir.path().join("bundle.tar.gz");
    let mut bundle = build(
        &BuildOptions::new(dir.path().join("spec.yaml"), &output),
        None,
    )
    .unwrap()
    .bundle;

    let request = SignRequest::new(bundle.digest(), "pm", "alice");
    let approval = sign_approval_with(&request, &Fixed, chrono::Utc::now()).unwrap();
    bundle.add_approval(approval).unwrap();
    bundle.write_to(&output).unwrap();

    let mut backends = Backends::new();
    backends.register(Box::new(Fixed));
    let validator = Validator::new(backends);
    let options = ValidateOptions {
        required_roles: vec!["pm".into()],
        ..ValidateOptions::default()
    };
    let outcome = Gate::new(&validator, options).run(&output);
    assert_eq!(outcome.exit_code, 0, "{:?}", outcome.result.errors);

    let logs = String::from_utf8(writer.buf.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("bundle written"), "{logs}");
    assert!(logs.contains("gate decided"), "{logs}");
    assert!(logs.contains("exit_code=0"), "{logs}");
    assert!(logs.contains(bundle.digest()), "{logs}");
    assert!(
        !logs.contains("s3cr3t"),
        "signature material MUST NOT be logged"
    );
}
