//! Integration tests for the `dupback` binary.
//!
//! These tests exercise the CLI layer end-to-end: they spawn the actual
//! compiled binary and assert on exit codes, stdout, and stderr.  duplicity is
//! **not** required; these tests cover argument parsing, config loading,
//! `dupback init`, `--print-config`, and configuration errors that stop the
//! run before duplicity would be invoked.  gpg is replaced by a shell script.
//!
//! # Running
//!
//! ```sh
//! cargo test --test integration
//! ```

use std::{fs, os::unix::fs::PermissionsExt, path::Path, process::Command};

/// Absolute path to the compiled binary, resolved at compile time by Cargo.
const BIN: &str = env!("CARGO_BIN_EXE_dupback");

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Run `dupback` with `args` in the system temp directory.
///
/// Returns `(exit_code, stdout, stderr)`.
fn run(args: &[&str]) -> (Option<i32>, String, String) {
    run_in(args, &std::env::temp_dir())
}

/// Run `dupback` with `args` in `dir`, with no `DUPBACK_*` or `RUST_LOG`
/// variables inherited from the test environment.
fn run_in(args: &[&str], dir: &Path) -> (Option<i32>, String, String) {
    let mut cmd = Command::new(BIN);
    cmd.args(args)
        .current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env_remove("RUST_LOG")
        .env_remove("PASSPHRASE");
    for (name, _) in std::env::vars() {
        if name.starts_with("DUPBACK_") {
            cmd.env_remove(name);
        }
    }
    let out = cmd
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn {BIN}: {e}"));

    (
        out.status.code(),
        String::from_utf8_lossy(&out.stdout).into_owned(),
        String::from_utf8_lossy(&out.stderr).into_owned(),
    )
}

/// A gpg stand-in that knows every key it is asked about.
fn fake_gpg(dir: &Path) -> String {
    let path = dir.join("gpg");
    fs::write(&path, "#!/bin/sh\necho 'fpr:::::::::ABCD1234:'\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// A complete config file pointing at `dir`.
fn write_config(dir: &Path) -> String {
    let source = dir.join("source");
    fs::create_dir_all(source.join("Code")).unwrap();
    let path = dir.join("dupback.toml");
    fs::write(
        &path,
        format!(
            r#"
title       = "Integration"
directories = ["Code"]

[gpg]
fingerprint = "ABCD1234"
binary      = "{gpg}"

[source]
base_dir = "{source}"

[dest]
base_dir = "/backups"
proto    = "sftp"
user     = "backup"
host     = "vault.lan"
port     = 2222
"#,
            gpg = fake_gpg(dir),
            source = source.display(),
        ),
    )
    .unwrap();
    path.to_string_lossy().into_owned()
}

// ─── --help / --version ───────────────────────────────────────────────────────

#[test]
fn help_exits_zero() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("dupback"));
    assert!(stdout.contains("--gpg-fingerprint"));
}

#[test]
fn version_exits_zero() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("0.1.0"));
}

#[test]
fn init_help_exits_zero() {
    let (code, stdout, _) = run(&["init", "--help"]);
    assert_eq!(code, Some(0));
    assert!(stdout.to_lowercase().contains("starter config"));
}

// ─── dupback init ─────────────────────────────────────────────────────────────

#[test]
fn init_creates_dupback_toml() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, _) = run_in(&["init"], dir.path());
    assert_eq!(code, Some(0));

    let content = fs::read_to_string(dir.path().join("dupback.toml")).unwrap();
    for section in ["[gpg]", "[source]", "[dest]", "# [email]"] {
        assert!(content.contains(section), "missing {section}");
    }
    toml::from_str::<toml::Value>(&content).expect("generated dupback.toml must be valid TOML");
}

#[test]
fn init_with_custom_config_path() {
    let dir = tempfile::tempdir().unwrap();
    let custom = dir.path().join("custom.toml");
    let (code, _, _) = run_in(&["--config", custom.to_str().unwrap(), "init"], dir.path());
    assert_eq!(code, Some(0));
    assert!(custom.exists());
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dupback.toml");
    fs::write(&path, "# existing").unwrap();

    let (code, _, stderr) = run_in(&["init"], dir.path());
    assert_eq!(code, Some(1));
    assert_eq!(fs::read_to_string(&path).unwrap(), "# existing");
    assert!(stderr.contains("already exists"), "got: {stderr}");
}

// ─── --print-config ───────────────────────────────────────────────────────────

#[test]
fn print_config_shows_values_and_sources() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());

    let (code, stdout, stderr) = run_in(
        &["--config", &cfg, "--print-config", "--title", "From flag"],
        dir.path(),
    );
    assert_eq!(code, Some(0), "stderr: {stderr}");
    assert!(stdout.contains("sftp://backup@vault.lan:2222/"));
    assert!(stdout.contains("From flag"));
    assert!(stdout.contains("command line"));
    assert!(stdout.contains("config file"));
    assert!(stdout.contains("default"));
}

#[test]
fn environment_fills_gaps_but_file_wins() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path());

    let out = Command::new(BIN)
        .args(["--config", &cfg, "--print-config"])
        .current_dir(dir.path())
        .env("DUPBACK_TITLE", "From env")
        .env("DUPBACK_KEEP_N_FULL", "3")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(out.status.success());
    assert!(stdout.contains("Integration"));
    assert!(!stdout.contains("From env"));
    assert!(stdout.contains("keep_n_full: 3"));
}

#[test]
fn default_config_file_is_discovered() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path());
    let (code, stdout, _) = run_in(&["--print-config"], dir.path());
    assert_eq!(code, Some(0));
    assert!(stdout.contains("Integration"));
}

// ─── configuration errors ─────────────────────────────────────────────────────

#[test]
fn missing_fingerprint_exits_two_with_usage() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_in(&["--dest-base-dir", "/b"], dir.path());
    assert_eq!(code, Some(2));
    assert!(stderr.contains("Usage"));
    assert!(stderr.contains("gpg.fingerprint"));
    assert!(stderr.contains("No source directories found"));
}

#[test]
fn explicit_config_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_in(&["--config", "nope.toml", "--print-config"], dir.path());
    assert_eq!(code, Some(1));
    assert!(stderr.contains("not found"));
}

#[test]
fn invalid_toml_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dupback.toml"), "not valid toml ][[[").unwrap();
    let (code, _, _) = run_in(&["--print-config"], dir.path());
    assert_eq!(code, Some(1));
}

#[test]
fn unknown_flag_exits_nonzero() {
    let (code, _, _) = run(&["--this-flag-does-not-exist"]);
    assert_ne!(code, Some(0));
}
