//! End-to-end CLI tests against the simulator backend.

use assert_cmd::Command;
use predicates::prelude::*;
use rstest::rstest;
use std::io::Write;

fn sample_config() -> &'static str {
    r#"
[[channel]]
pin = 0
sensor = "voltage_ac"
multiplier = 0.25
offset = 2048.0

[[channel]]
pin = 1
sensor = "current_grid"
multiplier = 0.01
offset = 2048.0

[acquisition]
sample_rate_hz = 20000
burst_ms = 10
queue_depth = 8

[dimmer]
pins = [25]
zc_pin = 27
curve = "rms"
min_edge_interval_us = 4000

[control]
gain = 200.0
balance_threshold_w = 10.0
startup_mode = "auto"
"#
}

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f
}

fn router() -> Command {
    Command::cargo_bin("router").unwrap()
}

#[test]
fn validate_config_accepts_a_good_file() {
    let cfg = write_config(sample_config());
    router()
        .args(["--config"])
        .arg(cfg.path())
        .arg("validate-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("config ok"));
}

#[rstest]
#[case("gain = 200.0", "gain = 5.0", "control.gain")]
#[case("gain = 200.0", "gain = 1001.0", "control.gain")]
#[case("pins = [25]", "pins = []", "dimmer.pins")]
#[case("multiplier = 0.25", "multiplier = 0.0", "multiplier")]
fn validate_config_rejects_bad_fields(
    #[case] from: &str,
    #[case] to: &str,
    #[case] expect_in_stderr: &str,
) {
    let cfg = write_config(&sample_config().replace(from, to));
    router()
        .args(["--config"])
        .arg(cfg.path())
        .arg("validate-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains(expect_in_stderr));
}

#[test]
fn missing_config_file_fails_cleanly() {
    router()
        .args(["--config", "/nonexistent/router.toml", "validate-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config"));
}

#[test]
fn self_check_passes_in_sim() {
    let cfg = write_config(sample_config());
    router()
        .args(["--config"])
        .arg(cfg.path())
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("self-check: ok"));
}

#[test]
fn run_smoke_exits_cleanly() {
    let cfg = write_config(sample_config());
    router()
        .args(["--config"])
        .arg(cfg.path())
        .args(["run", "--duration-s", "0"])
        .assert()
        .success();
}

#[test]
fn run_prints_json_stats() {
    let cfg = write_config(sample_config());
    let assert = router()
        .args(["--json", "--config"])
        .arg(cfg.path())
        .args(["run", "--duration-s", "1", "--stats"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let line = stdout
        .lines()
        .find(|l| l.contains("windows_completed"))
        .expect("stats JSON line");
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert!(v["bursts_produced"].as_u64().unwrap() > 0);
}

#[test]
fn run_rejects_unknown_mode() {
    let cfg = write_config(sample_config());
    router()
        .args(["--config"])
        .arg(cfg.path())
        .args(["run", "--duration-s", "0", "--mode", "turbo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown mode"));
}

#[test]
fn mode_needing_missing_sensor_exits_with_code_two() {
    // Drop the grid channel so auto has nothing to balance against.
    let cfg_text = sample_config()
        .replace("startup_mode = \"auto\"", "startup_mode = \"off\"")
        .replace(
            "[[channel]]\npin = 1\nsensor = \"current_grid\"\nmultiplier = 0.01\noffset = 2048.0\n",
            "",
        );
    let cfg = write_config(&cfg_text);
    router()
        .args(["--config"])
        .arg(cfg.path())
        .args(["run", "--duration-s", "0", "--mode", "auto"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("grid current sensor"));
}

#[test]
fn bad_calibration_headers_are_reported() {
    let cfg = write_config(sample_config());
    let mut cal = tempfile::NamedTempFile::new().unwrap();
    cal.write_all(b"foo,bar\n1,2\n").unwrap();
    router()
        .args(["--config"])
        .arg(cfg.path())
        .args(["--calibration"])
        .arg(cal.path())
        .args(["run", "--duration-s", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("raw,value"));
}

#[test]
fn json_flag_produces_structured_errors() {
    let cfg = write_config(&sample_config().replace("gain = 200.0", "gain = 5.0"));
    let assert = router()
        .args(["--json", "--config"])
        .arg(cfg.path())
        .arg("validate-config")
        .assert()
        .failure();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    let line = stderr.lines().find(|l| l.starts_with('{')).expect("JSON error line");
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert!(v["message"].as_str().is_some());
}
