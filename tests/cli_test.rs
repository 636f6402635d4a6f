use assert_cmd::Command;
use predicates::prelude::*;

use fibpool::app::DISCLAIMER;

fn fibpool() -> Command {
    Command::cargo_bin("fibpool").expect("binary not found")
}

fn banner() -> String {
    format!("{DISCLAIMER}\ncpu_count={}\n", num_cpus::get())
}

#[test]
fn test_prints_banner_and_nothing_else() {
    let output = fibpool().args(["20", "-q"]).output().unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap(), banner());
}

#[test]
fn test_sequential_mode() {
    let output = fibpool().args(["20", "--sequential", "-q"]).output().unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).unwrap(), banner());
}

#[test]
fn test_negative_index_is_accepted() {
    fibpool().args(["-5", "-q"]).assert().success();
}

#[test]
fn test_worker_override_spawns_that_many() {
    let output = fibpool().args(["100", "-q", "-j", "2", "-vv"]).output().unwrap();

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("spawned worker").count(), 2);
    assert_eq!(String::from_utf8(output.stdout).unwrap(), banner());
}

#[test]
fn test_missing_argument_fails_before_spawning() {
    fibpool()
        .args(["-vv"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("spawned worker").not());
}

#[test]
fn test_non_numeric_argument_fails_before_spawning() {
    fibpool()
        .args(["ten", "-vv"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("invalid value"))
        .stderr(predicate::str::contains("spawned worker").not());
}

#[test]
fn test_zero_workers_fails() {
    fibpool()
        .args(["10", "-j", "0"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_help_mentions_fibonacci() {
    fibpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Fibonacci"));
}

#[test]
fn test_worker_mode_answers_on_stdout() {
    fibpool()
        .arg("--worker")
        .write_stdin("{\"id\":4,\"n\":10}\n")
        .assert()
        .success()
        .stdout("{\"id\":4,\"status\":\"ok\",\"value\":\"55\"}\n");
}
