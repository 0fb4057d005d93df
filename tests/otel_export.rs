use std::process::Command;

/// The `--otel` flag only best-effort exports spans; a run must still
/// succeed even when the configured collector endpoint is unreachable; the
/// exporter's failure is not allowed to fail the whole analysis (§6).
#[test]
fn run_succeeds_with_unreachable_otel_endpoint() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("classes.json");
    std::fs::write(&input, r#"{"classes": []}"#).expect("write class dump");

    let output = Command::new(env!("CARGO_BIN_EXE_dexsimplify"))
        .arg(&input)
        .arg("--otel")
        .arg("http://127.0.0.1:1/")
        .arg("--quiet")
        .output()
        .expect("run dexsimplify");

    assert!(
        output.status.success(),
        "dexsimplify failed with --otel set: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
