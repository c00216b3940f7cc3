// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Integration tests for the solution CLI commands
//!
//! Everything here runs offline: `inspect`, `config`, `completions` and
//! `deploy --dry-run` never contact a portal.

use arcgis_solution::types::{ItemTemplate, Solution, SolutionMetadata};
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const MAP: &str = "11111111111111111111111111111111";
const APP: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// Command for the solution binary with a config file in `dir`
fn solution(dir: &TempDir) -> Command {
    let config = dir.path().join("config.toml");
    if !config.exists() {
        fs::write(&config, "portal_url = \"https://dest.maps.arcgis.com\"\n").unwrap();
    }
    let mut cmd = Command::cargo_bin("solution").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("SOLUTION_TOKEN")
        .arg("--config")
        .arg(config)
        .arg("--no-color");
    cmd
}

/// Write a two-item solution and return its path
fn write_solution(dir: &TempDir) -> PathBuf {
    let mut map = ItemTemplate::initialize(&json!({"id": MAP, "type": "Web Map", "title": "Trails Map"}));
    map.data = json!({"operationalLayers": []});
    let mut app = ItemTemplate::initialize(&json!({"id": APP, "type": "Web Mapping Application", "title": "Trails"}));
    app.data = json!({"values": {"webmap": format!("{{{{{MAP}.itemId}}}}"), "owner": "{{user.username}}"}});
    app.add_dependency(MAP);

    let solution = Solution {
        metadata: SolutionMetadata {
            title: "Trails".into(),
            ..SolutionMetadata::default()
        },
        templates: vec![app, map],
    };
    let path = dir.path().join("trails.json");
    fs::write(&path, serde_json::to_string_pretty(&solution).unwrap()).unwrap();
    path
}

/// Helper to get stdout as string
fn stdout_str(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_inspect_lists_levels() {
    let dir = TempDir::new().unwrap();
    let file = write_solution(&dir);

    solution(&dir)
        .arg("inspect")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 template(s)"))
        .stdout(predicate::str::contains(format!("0: {MAP}")))
        .stdout(predicate::str::contains(format!("1: {APP}")))
        .stdout(predicate::str::contains(format!("depends on: {MAP}")));
}

#[test]
fn test_inspect_json() {
    let dir = TempDir::new().unwrap();
    let file = write_solution(&dir);

    let output = solution(&dir).args(["--json", "inspect"]).arg(&file).output().unwrap();
    assert!(output.status.success());
    let report: Value = serde_json::from_str(&stdout_str(&output)).unwrap();
    assert_eq!(report["title"], "Trails");
    assert_eq!(report["levels"], json!([[MAP], [APP]]));
    assert_eq!(report["templates"][0]["externalTokens"], json!([]));
}

#[test]
fn test_inspect_dot() {
    let dir = TempDir::new().unwrap();
    let file = write_solution(&dir);

    solution(&dir)
        .arg("inspect")
        .arg(&file)
        .arg("--dot")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph solution {"))
        .stdout(predicate::str::contains(format!("\"{MAP}\" -> \"{APP}\"")));
}

#[test]
fn test_inspect_rejects_non_solution() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("notes.json");
    fs::write(&file, "[1, 2, 3]").unwrap();

    solution(&dir)
        .arg("inspect")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a solution template"));
}

#[test]
fn test_dry_run_deploy() {
    let dir = TempDir::new().unwrap();
    let file = write_solution(&dir);

    let output = solution(&dir)
        .args(["--json", "deploy", "--dry-run"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_str(&stdout_str(&output)).unwrap();
    assert_eq!(report["dryRun"], true);
    let items = report["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["sourceId"], MAP);
    assert!(items.iter().all(|i| i["created"] == true));
    assert_eq!(report["unresolved"], json!({}));
}

#[test]
fn test_dry_run_deploy_with_override() {
    let dir = TempDir::new().unwrap();
    let file = write_solution(&dir);

    solution(&dir)
        .args(["deploy", "--dry-run", "--set"])
        .arg(format!("{MAP}.itemId=cccccccccccccccccccccccccccccccc"))
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("(dry run)"))
        .stdout(predicate::str::contains(format!("{MAP} -> cccccccccccccccccccccccccccccccc")))
        .stdout(predicate::str::contains("reused"));
}

#[test]
fn test_deploy_rejects_bad_override() {
    let dir = TempDir::new().unwrap();
    let file = write_solution(&dir);

    solution(&dir)
        .args(["deploy", "--dry-run", "--set", "novalue"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=value"));
}

#[test]
fn test_config_shows_layers() {
    let dir = TempDir::new().unwrap();

    solution(&dir)
        .env("SOLUTION_TIMEOUT_SECS", "5")
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("portal_url = \"https://dest.maps.arcgis.com\""))
        .stdout(predicate::str::contains("timeout_secs = 5"));
}

#[test]
fn test_portal_flag_wins() {
    let dir = TempDir::new().unwrap();

    solution(&dir)
        .args(["--portal", "https://flag.example.com", "--token", "s3cret", "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://flag.example.com"))
        .stdout(predicate::str::contains("s3cret").not());
}

#[test]
fn test_completions() {
    let dir = TempDir::new().unwrap();

    solution(&dir)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("solution"));
}
