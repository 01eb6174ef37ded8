//! End-to-end runs of the harness binary.

use assert_cmd::Command;

#[test]
fn test_mode_passes_and_exits_zero() {
    Command::cargo_bin("pencilfft")
        .unwrap()
        .args(["-t", "-q", "-m", "4", "-p", "4"])
        .assert()
        .success()
        .stdout(predicates::str::contains("pass"));
}

#[test]
fn test_mode_reports_stages_when_not_quiet() {
    Command::cargo_bin("pencilfft")
        .unwrap()
        .args(["-t", "-x", "4", "-y", "4", "-z", "4", "-p", "2"])
        .assert()
        .success()
        .stdout(predicates::str::contains("input"))
        .stdout(predicates::str::contains("pass"));
}

#[test]
fn shifted_test_mode_passes() {
    Command::cargo_bin("pencilfft")
        .unwrap()
        .args(["-t", "-q", "-m", "4", "-p", "2", "-O", "1"])
        .assert()
        .success();
}

#[test]
fn timing_mode_is_silent_when_quiet() {
    Command::cargo_bin("pencilfft")
        .unwrap()
        .args(["-q", "-m", "4", "-N", "3", "-p", "2"])
        .assert()
        .success()
        .stdout(predicates::str::is_empty());
}

#[test]
fn timing_mode_reports_the_selected_statistic() {
    Command::cargo_bin("pencilfft")
        .unwrap()
        .args(["-m", "4", "-N", "3", "-S", "3", "-p", "1"])
        .assert()
        .success()
        .stdout(predicates::str::contains("median"));
}

#[test]
fn rejects_a_zero_dimension() {
    Command::cargo_bin("pencilfft")
        .unwrap()
        .args(["-t", "-x", "0", "-y", "4", "-z", "4"])
        .assert()
        .failure();
}
