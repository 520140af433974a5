use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("strand_cli_{label}_{}_{}", std::process::id(), nanos));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn assert_schema_version(value: &serde_json::Value) {
    assert_eq!(
        value.get("schema_version").and_then(|v| v.as_u64()),
        Some(1),
        "missing schema_version=1 field"
    );
}

#[test]
fn help_lists_subcommands() {
    let output = Command::new(env!("CARGO_BIN_EXE_strand"))
        .arg("help")
        .output()
        .expect("run strand help");

    assert!(
        output.status.success(),
        "strand help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("synth"), "missing synth in help output");
    assert!(stdout.contains("probe"), "missing probe in help output");
}

#[test]
fn synth_help_lists_codec_and_json() {
    let output = Command::new(env!("CARGO_BIN_EXE_strand"))
        .args(["synth", "--help"])
        .output()
        .expect("run strand synth --help");

    assert!(
        output.status.success(),
        "synth --help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--codec"), "missing --codec in synth help");
    assert!(stdout.contains("--frames"), "missing --frames in synth help");
    assert!(stdout.contains("--buffers"), "missing --buffers in synth help");
    assert!(stdout.contains("--json"), "missing --json in synth help");
}

#[test]
fn probe_json_emits_schema_and_capability_fields() {
    let output = Command::new(env!("CARGO_BIN_EXE_strand"))
        .args(["probe", "--json"])
        .output()
        .expect("run strand probe --json");

    assert!(
        output.status.success(),
        "probe --json failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !stderr.contains("\u{1b}["),
        "stderr should not include ANSI escapes when not a TTY: {stderr}"
    );

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("probe --json stdout is not JSON: {e}"));
    assert_schema_version(&value);
    assert_eq!(value.get("command").and_then(|v| v.as_str()), Some("probe"));
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(true));
    let caps = value.get("capabilities").expect("missing capabilities object");
    assert!(
        caps.get("supports_h264").and_then(|v| v.as_bool()).is_some(),
        "missing capabilities.supports_h264"
    );
}

#[test]
fn synth_json_writes_bitstream_and_emits_stats() {
    let dir = unique_temp_dir("synth_json");
    let output_path = dir.join("capture.264");

    let output = Command::new(env!("CARGO_BIN_EXE_strand"))
        .args([
            "synth",
            "--output",
            output_path.to_str().expect("utf8 output"),
            "--frames",
            "25",
            "--width",
            "320",
            "--height",
            "180",
            "--json",
        ])
        .output()
        .expect("run strand synth --json");

    assert!(
        output.status.success(),
        "synth failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("synth --json stdout is not JSON: {e}"));
    assert_schema_version(&value);
    assert_eq!(value.get("command").and_then(|v| v.as_str()), Some("synth"));
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(true));

    let pipeline = value.get("pipeline").expect("missing pipeline stats");
    assert_eq!(
        pipeline.get("submitted_frames").and_then(|v| v.as_u64()),
        Some(25)
    );
    assert_eq!(
        pipeline.get("completed_frames").and_then(|v| v.as_u64()),
        Some(25)
    );
    assert_eq!(
        pipeline.get("pending_frames").and_then(|v| v.as_u64()),
        Some(0)
    );

    let writer = value.get("writer").expect("missing writer stats");
    let bytes = writer
        .get("bytes_written")
        .and_then(|v| v.as_u64())
        .expect("missing writer.bytes_written");
    let persisted = fs::read(&output_path).expect("synth output file should exist");
    assert_eq!(
        persisted.len() as u64,
        bytes,
        "bytes on disk must match reported bytes_written"
    );
    assert!(
        persisted.starts_with(&[0x00, 0x00, 0x00, 0x01]),
        "bitstream should start with an Annex-B start code"
    );
}

#[test]
fn synth_rejects_unsupported_codec_with_structured_error() {
    let dir = unique_temp_dir("synth_av1");
    let output_path = dir.join("capture.av1");

    let output = Command::new(env!("CARGO_BIN_EXE_strand"))
        .args([
            "synth",
            "--output",
            output_path.to_str().expect("utf8 output"),
            "--codec",
            "av1",
            "--json",
        ])
        .output()
        .expect("run strand synth --codec av1");

    assert!(
        !output.status.success(),
        "synth should fail for a codec the backend rejects"
    );
    // Unsupported-configuration error code.
    assert_eq!(output.status.code(), Some(101));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("synth error stdout is not JSON: {e}"));
    assert_schema_version(&value);
    assert_eq!(value.get("command").and_then(|v| v.as_str()), Some("synth"));
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert!(
        value.get("error").and_then(|v| v.as_str()).is_some(),
        "missing error field in synth json error payload"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !stderr.contains("Command failed"),
        "json mode should not emit default error line on stderr: {stderr}"
    );
}

#[test]
fn synth_without_json_is_human_readable() {
    let dir = unique_temp_dir("synth_human");
    let output_path = dir.join("capture.264");

    let output = Command::new(env!("CARGO_BIN_EXE_strand"))
        .args([
            "synth",
            "--output",
            output_path.to_str().expect("utf8 output"),
            "--frames",
            "5",
        ])
        .output()
        .expect("run strand synth");

    assert!(
        output.status.success(),
        "synth failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.starts_with("synth: command=synth"),
        "expected human-readable synth summary, got: {stdout}"
    );
}
