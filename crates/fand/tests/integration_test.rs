use std::path::Path;
use std::process::{Command, Output};

fn fand_bin() -> String {
    // Prefer the test-built binary when available to avoid extra cargo builds.
    std::env::var("CARGO_BIN_EXE_fand").unwrap_or_else(|_| {
        let candidates = [
            "../../target/release/fand",
            "target/release/fand",
            "../../target/debug/fand",
            "target/debug/fand",
        ];
        for candidate in candidates {
            if Path::new(candidate).exists() {
                return candidate.to_string();
            }
        }
        panic!("Failed to locate fand binary. Expected CARGO_BIN_EXE_fand or a build in target/{{release,debug}}/fand.");
    })
}

fn fand(args: &[&str]) -> Output {
    Command::new(fand_bin())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to run fand")
}

fn events(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .expect("record file written")
        .lines()
        .map(|l| serde_json::from_str(l).expect("valid JSONL"))
        .collect()
}

#[test]
fn test_simulated_run_records_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("run.jsonl");

    let out = fand(&[
        "--simulate",
        "--sim-speed",
        "30",
        "--run-seconds",
        "2",
        "--tick-ms",
        "100",
        "--record",
        record.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let events = events(&record);
    assert_eq!(events.first().unwrap()["event_type"], "system_start");
    assert_eq!(events.first().unwrap()["details"]["fan"], "sim/fan");
    assert_eq!(events.last().unwrap()["event_type"], "system_shutdown");

    let ticks: Vec<_> = events
        .iter()
        .filter(|e| e["event_type"] == "tick")
        .map(|e| &e["details"])
        .collect();
    assert!(ticks.len() >= 10, "only {} ticks", ticks.len());

    // Slew limiting holds across consecutive ticks.
    for pair in ticks.windows(2) {
        let a = pair[0]["applied_duty"].as_f64().unwrap();
        let b = pair[1]["applied_duty"].as_f64().unwrap();
        assert!((b - a).abs() <= 10.0 + 1e-9, "{a} -> {b}");
    }
    assert!(ticks
        .iter()
        .all(|t| t["contributing"].as_array().unwrap().len() == 2));
}

#[test]
fn test_blind_run_forces_fail_safe() {
    let dir = tempfile::tempdir().unwrap();
    let record = dir.path().join("blind.jsonl");

    // A sensor path that never exists, driving a pwm file in a temp dir.
    let pwm = dir.path().join("pwm1");
    std::fs::write(&pwm, "0").unwrap();
    let missing = dir.path().join("temp1_input");

    let out = fand(&[
        "--sensor",
        &format!("cpu={}", missing.display()),
        "--pwm",
        pwm.to_str().unwrap(),
        "--fail-safe-after",
        "2",
        "--run-seconds",
        "1",
        "--tick-ms",
        "100",
        "--record",
        record.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let events = events(&record);
    assert!(events.iter().any(|e| e["event_type"] == "fail_safe_engaged"));
    assert_eq!(std::fs::read_to_string(&pwm).unwrap(), "255");
}

#[test]
fn test_help_and_bad_arguments() {
    let help = fand(&["--help"]);
    assert!(help.status.success());
    assert!(String::from_utf8_lossy(&help.stdout).contains("--fail-safe-duty"));

    let bad = fand(&["--curve", "80:10,40:20", "--simulate", "--run-seconds", "1"]);
    assert!(!bad.status.success());

    let unknown = fand(&["--turbo"]);
    assert_eq!(unknown.status.code(), Some(2));

    let no_fan = fand(&["--run-seconds", "1"]);
    assert!(!no_fan.status.success());
}
