use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("reels-tui")
        .expect("binary built")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("reels-tui")
        .expect("binary built")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reels-TUI"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn rejects_unknown_flags() {
    Command::cargo_bin("reels-tui")
        .expect("binary built")
        .arg("--bogus")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown flag --bogus"));
}

#[test]
fn config_flag_needs_a_path() {
    Command::cargo_bin("reels-tui")
        .expect("binary built")
        .arg("--config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--config needs a path"));
}
