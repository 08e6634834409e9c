use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Minimal config for the simulated bench; noise off so runs are repeatable
fn write_config(dir: &tempfile::TempDir, cell: &str) -> PathBuf {
    let toml = format!(
        r#"
[timers]
tick_ms = 10
report_ms = 5000
pulse_ms = 1000
sample_ms = 100

[filter]
kernel = "savitzky_golay"
capacity = 11

[sim]
cell = "{cell}"
initial_soc = 0.5
noise_counts = 0
"#
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[rstest]
#[case(&["--help"], "nimh", 0, "Usage:", "stdout")]
#[case(&["self-check"], "nimh", 0, "self-check ok", "stdout")]
#[case(&["identify", "--fast"], "nimh", 0, "Accepting", "stdout")]
#[case(&["identify", "--fast"], "alkaline", 0, "Alkaline", "stdout")]
#[case(&["identify", "--fast"], "reversed", 0, "ReversedBattery", "stdout")]
#[case(&["identify", "--fast"], "absent", 0, "NoBattery", "stdout")]
#[case(&["charge", "--fast"], "alkaline", 19, "Alkaline", "stdout")]
#[case(&["discharge", "--fast"], "lithium", 20, "Lithium", "stdout")]
#[case(&["discharge", "--max-ticks", "5"], "nimh", 2, "--fast", "stderr")]
#[case(&["refurbish"], "nimh", 2, "unrecognized subcommand", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] cell: &str,
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, cell);

    let mut cmd = Command::cargo_bin("batdev").unwrap();

    // Always include a config to avoid relying on the default path
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn cli_reports_bad_calibration_header() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "nimh");

    let bad_csv = dir.path().join("calib.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "raw,value").unwrap();
    writeln!(f, "100,0.4").unwrap();
    writeln!(f, "200,0.8").unwrap();

    let mut cmd = Command::cargo_bin("batdev").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("--calibration")
        .arg(&bad_csv)
        .arg("self-check");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
fn cli_applies_calibration_csv() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "nimh");

    let csv = dir.path().join("calib.csv");
    fs::write(
        &csv,
        "channel,raw,value\nbus,0,0.0\nbus,250,1.0\nbus,500,2.0\nshunt,0,0.0\nshunt,1000,100.0\n",
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("batdev").unwrap();
    cmd.arg("--json")
        .arg("--config")
        .arg(&cfg)
        .arg("--calibration")
        .arg(&csv)
        .arg("self-check");
    let out = cmd.assert().success().get_output().stdout.clone();
    let v: serde_json::Value = serde_json::from_slice(&out).expect("one JSON object");
    assert_eq!(v["self_check"], "ok");
    let bus = v["bus_v"].as_f64().unwrap();
    assert!(bus > 1.0 && bus < 1.5, "bus_v = {bus}");
}

#[rstest]
fn cli_missing_config_is_explained() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("batdev").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("self-check");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("Could not read the config file"));
}

#[rstest]
#[case::zero_reload("[timers]\nreport_ms = 0\n")]
#[case::bad_window("[filter]\nkernel = \"savitzky_golay\"\ncapacity = 7\n")]
#[case::not_toml("[timers\n")]
fn cli_rejects_invalid_config(#[case] body: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, body).unwrap();

    let mut cmd = Command::cargo_bin("batdev").unwrap();
    cmd.arg("--config").arg(&path).arg("charge").arg("--fast");
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration is invalid"));
}
