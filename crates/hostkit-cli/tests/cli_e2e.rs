use std::path::Path;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

fn hostkit_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("hostkit"))
}

fn with_db(cmd: &mut Command, db_path: &Path) {
    cmd.arg("--db-path").arg(db_path).arg("--json");
}

#[test]
fn help_lists_command_groups() {
    hostkit_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("provision"))
        .stdout(contains("deploy"))
        .stdout(contains("rollback"));
}

#[test]
fn provision_rejects_invalid_project_name() {
    let td = tempdir().expect("tempdir");
    let db_path = td.path().join("hostkit.db");

    let mut cmd = hostkit_cmd();
    with_db(&mut cmd, &db_path);
    let out = cmd
        .arg("provision")
        .arg("BadName!")
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(out).expect("utf8");
    assert!(stdout.contains("INVALID_PROJECT_NAME"));
}

#[test]
fn project_list_on_fresh_database_is_empty() {
    let td = tempdir().expect("tempdir");
    let db_path = td.path().join("hostkit.db");

    let mut cmd = hostkit_cmd();
    with_db(&mut cmd, &db_path);
    let out = cmd
        .arg("project")
        .arg("list")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(out).expect("utf8");
    assert!(stdout.contains("\"data\":[]"));
    assert!(db_path.exists());
}

#[test]
fn project_show_reports_not_found() {
    let td = tempdir().expect("tempdir");
    let db_path = td.path().join("hostkit.db");

    let mut cmd = hostkit_cmd();
    with_db(&mut cmd, &db_path);
    let out = cmd
        .arg("project")
        .arg("show")
        .arg("nope")
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(out).expect("utf8");
    assert!(stdout.contains("PROJECT_NOT_FOUND"));
}

#[test]
fn env_show_reports_not_found_for_unknown_project() {
    let td = tempdir().expect("tempdir");
    let db_path = td.path().join("hostkit.db");

    let mut cmd = hostkit_cmd();
    with_db(&mut cmd, &db_path);
    cmd.arg("env")
        .arg("show")
        .arg("nope")
        .assert()
        .failure()
        .stdout(contains("PROJECT_NOT_FOUND"));
}

#[test]
fn deploy_requires_a_source() {
    let td = tempdir().expect("tempdir");
    let db_path = td.path().join("hostkit.db");

    // Seed the project name check first so the failure we assert on is the
    // source requirement, not a missing-project error.
    let mut provision = hostkit_cmd();
    with_db(&mut provision, &db_path);
    let _ = provision.arg("provision").arg("demoapp").assert();

    let mut cmd = hostkit_cmd();
    with_db(&mut cmd, &db_path);
    let out = cmd
        .arg("deploy")
        .arg("demoapp")
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(out).expect("utf8");
    assert!(stdout.contains("SOURCE_NOT_FOUND") || stdout.contains("PROJECT_NOT_FOUND"));
}

#[test]
fn deploy_without_project_or_source_flags_fails_fast() {
    let td = tempdir().expect("tempdir");
    let db_path = td.path().join("hostkit.db");

    let mut cmd = hostkit_cmd();
    with_db(&mut cmd, &db_path);
    cmd.arg("deploy")
        .arg("nonexistent")
        .assert()
        .failure()
        .stdout(contains("\"success\":false"));
}
