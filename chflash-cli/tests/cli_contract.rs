//! Integration tests for core CLI contract behavior.
//!
//! Everything here runs without a device attached; hardware-dependent
//! paths are covered by the library's session tests instead.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("chflash")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("chflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn completions_bash_writes_script_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("chflash"));
}

#[test]
fn exit_code_two_for_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz").assert().failure().code(2);
}

#[test]
fn exit_code_two_for_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz").assert().failure().code(2);
}

#[test]
fn flash_with_missing_file_exits_two() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("not_exists.bin");

    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .arg(&missing)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn flash_rejects_firmware_below_minimum_size() {
    // 10 bytes is far below the 256-byte minimum; the file is rejected
    // before any device interaction.
    let dir = tempdir().expect("tempdir should be created");
    let tiny = dir.path().join("tiny.bin");
    fs::write(&tiny, [0u8; 10]).expect("write tiny firmware");

    let mut cmd = cli_cmd();
    cmd.arg("flash")
        .arg(&tiny)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("minimum"));
}

#[test]
fn verify_with_missing_file_exits_two() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("not_exists.bin");

    let mut cmd = cli_cmd();
    cmd.arg("verify")
        .arg(&missing)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn erase_requires_confirmation_flag() {
    // Refused before any device access, so this is hardware-independent.
    let mut cmd = cli_cmd();
    cmd.arg("erase")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--all"));
}
