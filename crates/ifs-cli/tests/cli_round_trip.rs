// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::path::Path;
use std::process::{Command, Output};

fn ifs(config: &Path, args: &[&str]) -> Output {
    Command::new(assert_cmd::cargo::cargo_bin("ifs"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ifs")
}

fn stdout_of(output: &Output) -> String {
    assert!(
        output.status.success(),
        "ifs failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = dir.join("ifs.toml");
    let body = format!(
        "default_store = \"main\"\ncatalog = {:?}\n\n[[stores]]\nid = \"main\"\nbase_dir = {:?}\n",
        dir.join("catalog.sqlite"),
        dir.join("content"),
    );
    std::fs::write(&config, body).unwrap();
    config
}

#[test]
fn catalog_persists_between_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let local = dir.path().join("note.txt");
    std::fs::write(&local, "hello").unwrap();

    stdout_of(&ifs(&config, &["put", "ifs:///mir_derivate_7:/docs/note.txt", local.to_str().unwrap()]));
    stdout_of(&ifs(&config, &["cp", "mir_derivate_7:/docs/note.txt", "mir_derivate_7:/copy.txt"]));

    assert_eq!(stdout_of(&ifs(&config, &["cat", "mir_derivate_7:/copy.txt"])), "hello");
    assert_eq!(
        stdout_of(&ifs(&config, &["ls", "mir_derivate_7:/"])),
        "mir_derivate_7:/copy.txt\nmir_derivate_7:/docs\n"
    );
    assert_eq!(stdout_of(&ifs(&config, &["roots"])), "mir_derivate_7\n");

    let stat = stdout_of(&ifs(&config, &["stat", "mir_derivate_7:/copy.txt"]));
    assert!(stat.contains("5d41402abc4b2a76b9719d911017c592"));
}

#[test]
fn failures_exit_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = ifs(&config, &["cat", "nobody:/missing.txt"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cat nobody:/missing.txt"));

    stdout_of(&ifs(&config, &["mkroot", "o"]));
    let output = ifs(&config, &["mkroot", "o"]);
    assert!(!output.status.success());
}
