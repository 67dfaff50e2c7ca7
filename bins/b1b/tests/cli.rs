//! CLI argument validation tests.
//!
//! These run the real binary but only with argument sets that fail
//! validation before any socket is opened, so no root is needed.

use assert_cmd::Command;
use predicates::prelude::*;

fn b1b() -> Command {
    Command::new(env!("CARGO_BIN_EXE_b1b"))
}

#[test]
fn help_exits_zero() {
    b1b()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bonding mode-1 bridge helper"));
}

#[test]
fn version_exits_zero() {
    b1b().arg("--version").assert().success();
}

#[test]
fn duplicate_debug_is_fatal() {
    // -d -d exits with status 1 after a fatal log, not clap's usage error.
    b1b()
        .args(["-d", "-d"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("duplicate option"));
}

#[test]
fn duplicate_log_destination_is_fatal() {
    b1b()
        .args(["--syslog", "-l"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("duplicate option"));
}

#[test]
fn conflicting_log_destinations_are_fatal() {
    b1b()
        .args(["-l", "-e"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("conflicting options"));
}

#[test]
fn unknown_option_is_fatal() {
    b1b().arg("--bogus").assert().code(1);
}

#[test]
fn syslog_style_prefixes_severity() {
    b1b()
        .args(["-l", "-d", "-d"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("<3>ERROR: "));
}
