use crate::common::Sandbox;
use assert_cmd::Command;
use harvest_cli::upgrade::BackupStore;
use predicates::prelude::*;

fn harvest(sandbox: &Sandbox) -> Command {
    let mut cmd = Command::cargo_bin("harvest").unwrap();
    cmd.env("HARVEST_CONFIG_PATH", sandbox.write_config())
        .env("HARVEST_NO_PROGRESS", "1")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("harvest")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("rollback"));
}

#[test]
fn test_rollback_status_on_fresh_system() {
    let sandbox = Sandbox::new("1.0.0");
    harvest(&sandbox)
        .arg("rollback")
        .assert()
        .success()
        .stdout(predicate::str::contains("No rollback available"))
        .stdout(predicate::str::contains("no binary backup"));
}

#[test]
fn test_rollback_perform_without_backup_fails() {
    let sandbox = Sandbox::new("1.0.0");
    harvest(&sandbox)
        .args(["rollback", "--perform", "--yes"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("No rollback available"));
}

#[test]
fn test_yes_requires_perform() {
    let sandbox = Sandbox::new("1.0.0");
    harvest(&sandbox).args(["rollback", "--yes"]).assert().failure().code(2);
}

#[tokio::test]
async fn test_rollback_list_and_log() {
    let sandbox = Sandbox::new("1.0.0");
    let snapshot = BackupStore::new(&sandbox.ctx).create_backup().await.unwrap();
    let name = snapshot.file_name().unwrap().to_string_lossy().into_owned();

    harvest(&sandbox)
        .args(["rollback", "--list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(name));

    harvest(&sandbox)
        .args(["rollback", "--log"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup created:"));

    harvest(&sandbox).args(["rollback", "--clear-log"]).assert().success();
    assert!(!sandbox.ctx.paths.activity_log().exists());

    harvest(&sandbox)
        .args(["rollback", "--log"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rollback log is empty"));
}
