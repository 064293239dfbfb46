//! CLI Bridge Tests
//!
//! Drive the `openprint-cli` binary the way a host application would.

use std::path::PathBuf;
use std::process::{Command, Output};

use serde_json::{json, Value};
use tempfile::TempDir;

fn write_json(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_openprint-cli"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

fn sample_pdl() -> Value {
    json!({
        "pdl_version": "1.0",
        "firmware": "rrf",
        "gcode": {"start": ["G28", "M104 S{nozzle}"], "end": ["M84"]},
        "machine_control": {
            "sd_logging": {"enable_start": true, "filename": "run.log", "stop_at_end": true}
        }
    })
}

#[test]
fn test_hooks_lists_registry_without_document() {
    let out = run(&["hooks"]);
    assert!(out.status.success());
    let hooks = stdout_json(&out)["hooks"].as_array().unwrap().len();
    assert_eq!(hooks, 36);
}

#[test]
fn test_hooks_for_document() {
    let dir = TempDir::new().unwrap();
    let pdl = write_json(&dir, "printer.json", &sample_pdl());
    let out = run(&["hooks", "--pdl", pdl.to_str().unwrap()]);
    assert!(out.status.success());
    assert_eq!(stdout_json(&out)["hooks"], json!(["end", "start"]));
}

#[test]
fn test_compile_outputs_rendered_hooks() {
    let dir = TempDir::new().unwrap();
    let pdl = write_json(&dir, "printer.json", &sample_pdl());
    let vars = write_json(&dir, "vars.json", &json!({"nozzle": 215}));
    let out = run(&["compile", "--pdl", pdl.to_str().unwrap(), "--vars", vars.to_str().unwrap()]);
    assert!(out.status.success());

    let body = stdout_json(&out);
    assert_eq!(body["success"], json!(true));
    assert!(body["generated_at"].is_string());
    assert_eq!(
        body["compiled"]["rendered"]["start"],
        json!(["G28", "M104 S215", "M929 P\"run.log\" S1"])
    );
    assert_eq!(body["compiled"]["rendered"]["end"], json!(["M84", "M929 S0"]));
}

#[test]
fn test_compile_blocked_by_errors() {
    let dir = TempDir::new().unwrap();
    let pdl = write_json(&dir, "bad.json", &json!({"process_defaults": {"accelerations_mms2": {"infill": -1}}}));
    let out = run(&["compile", "--pdl", pdl.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(stdout_json(&out)["success"], json!(false));

    let out = run(&["compile", "--pdl", pdl.to_str().unwrap(), "--allow-errors"]);
    assert!(out.status.success());
}

#[test]
fn test_validate_exit_codes() {
    let dir = TempDir::new().unwrap();
    let good = write_json(&dir, "good.json", &sample_pdl());
    let out = run(&["validate", "--pdl", good.to_str().unwrap()]);
    assert!(out.status.success());
    let body = stdout_json(&out);
    assert_eq!(body["summary"]["error"], json!(0));

    let bad = write_json(&dir, "bad.json", &json!({"process_defaults": {"accelerations_mms2": {"top": -3}}}));
    let out = run(&["validate", "--pdl", bad.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(stdout_json(&out)["issues"][0]["level"], json!("error"));
}

#[test]
fn test_rules_profiles() {
    let dir = TempDir::new().unwrap();
    let printer = write_json(&dir, "printer.json", &json!({"nozzle_diameter": 0.4, "build_volume": [220, 220, 250]}));
    let process = write_json(&dir, "process.json", &json!({"layer_height": 0.36, "print_speed": 200}));
    let out = run(&[
        "rules",
        "--printer",
        printer.to_str().unwrap(),
        "--process",
        process.to_str().unwrap(),
    ]);
    assert!(out.status.success());
    let body = stdout_json(&out);
    assert_eq!(body["printer"], json!([]));
    assert_eq!(body["summary"]["warn"], json!(2));
}

#[test]
fn test_snippets_firmware_override() {
    let dir = TempDir::new().unwrap();
    let pdl = write_json(&dir, "printer.json", &sample_pdl());
    let out = run(&["snippets", "--pdl", pdl.to_str().unwrap(), "--firmware", "marlin"]);
    assert!(out.status.success());
    let body = stdout_json(&out);
    assert_eq!(body["start"], json!(["G28", "M104 S{nozzle}", "M928 run.log"]));
    assert_eq!(body["end"], json!(["M84", "M29"]));
}

#[test]
fn test_missing_file_fails_with_json() {
    let out = run(&["validate", "--pdl", "/nonexistent/printer.json"]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout_json(&out)["success"], json!(false));
}
