//! Tests for the statash binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The binary with a fresh home so no user config or profile is read
fn statash(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("statash").unwrap();
    cmd.env("HOME", home.path())
        .env_remove("STATASH_CONFIG")
        .env_remove("STATASH_LOG")
        .env_remove("STATASH_DO_POLICY")
        .current_dir(home.path());
    cmd
}

#[test]
fn test_version_flag() {
    let home = TempDir::new().unwrap();
    statash(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_lists_usage() {
    let home = TempDir::new().unwrap();
    statash(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("statash -c <command>"));
}

#[test]
fn test_single_command() {
    let home = TempDir::new().unwrap();
    statash(&home)
        .args(["-c", "display", "2", "+", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5"));
}

#[test]
fn test_unknown_command_sets_exit_code() {
    let home = TempDir::new().unwrap();
    statash(&home)
        .args(["-c", "frobnicate"])
        .assert()
        .code(199)
        .stderr(predicate::str::contains("r(199);"));
}

#[test]
fn test_do_file_runs_to_the_end() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("data.csv"), "id,price\n1,10\n2,\n3,30\n").unwrap();
    std::fs::write(
        home.path().join("analysis.do"),
        "import delimited \"data.csv\", clear\nsummarize price ///\n    if id > 0\ncount\n",
    )
    .unwrap();

    statash(&home)
        .arg("analysis.do")
        .assert()
        .success()
        .stdout(predicate::str::contains(". summarize price if id > 0"))
        .stdout(predicate::str::contains("price |"));
}

#[test]
fn test_do_file_abort_reports_the_line() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("broken.do"), "display 1\nfrobnicate\ndisplay 2\n").unwrap();

    statash(&home)
        .arg("broken.do")
        .assert()
        .code(199)
        .stdout(predicate::str::contains(". display 1"))
        .stdout(predicate::str::contains(". display 2").not())
        .stderr(predicate::str::contains("error at line 2"))
        .stderr(predicate::str::contains("r(199);"));
}

#[test]
fn test_continue_policy_from_environment() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("broken.do"), "display 1\nfrobnicate\ndisplay 2\n").unwrap();

    statash(&home)
        .env("STATASH_DO_POLICY", "continue")
        .arg("broken.do")
        .assert()
        .success()
        .stdout(predicate::str::contains(". display 2"))
        .stdout(predicate::str::contains("r(199);"));
}
