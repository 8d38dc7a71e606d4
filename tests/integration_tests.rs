use std::{path::Path, process::Command};

fn scopeslot(data_dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_scopeslot"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .output()
        .expect("Failed to execute scopeslot binary")
}

/// Basic smoke tests for CLI functionality
#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_scopeslot"))
        .arg("--help")
        .output()
        .expect("Failed to execute scopeslot binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: scopeslot"));
}

#[test]
fn test_cli_list_ports_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = scopeslot(dir.path(), &["ports", "--json"]);

    assert!(output.status.success());
    let ports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(ports.is_array());
}

#[test]
fn test_cli_add_list_remove() {
    let dir = tempfile::tempdir().unwrap();
    let output = scopeslot(
        dir.path(),
        &[
            "add", "2", "--name", "Backyard", "--kind", "remote", "--host", "10.0.0.5",
            "--circle", "0.5",
        ],
    );
    assert!(output.status.success(), "{output:?}");
    assert!(dir.path().join("telescopes.json").exists());

    let output = scopeslot(dir.path(), &["list", "--json"]);
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["slot"], 2);
    assert_eq!(rows[0]["name"], "Backyard");
    assert_eq!(rows[0]["connection"], "remote");
    assert_eq!(rows[0]["endpoint"], "10.0.0.5:10002");

    let output = scopeslot(dir.path(), &["remove", "2"]);
    assert!(output.status.success());
    let output = scopeslot(dir.path(), &["list", "--json"]);
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(rows.as_array().unwrap().is_empty());
}

#[test]
fn test_cli_rejects_bad_slot() {
    let dir = tempfile::tempdir().unwrap();
    let output = scopeslot(dir.path(), &["add", "12", "--name", "Sim", "--kind", "virtual"]);
    assert!(!output.status.success());
    assert!(!dir.path().join("telescopes.json").exists());

    let output = scopeslot(dir.path(), &["remove", "4"]);
    assert!(!output.status.success());
}
