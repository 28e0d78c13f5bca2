use crate::common::Sandbox;
use harvest_cli::core::UpgradeError;
use harvest_cli::test_utils::{StaticReleaseSource, init_test_logging, linux_amd64};
use harvest_cli::upgrade::activity_log::ActivityLog;
use harvest_cli::upgrade::{BackupStore, RollbackManager, UpgradeOrchestrator, UpgradeOutcome};

const ARTIFACT: &str = "harvest-1.0.1-linux-amd64.tar.gz";

fn release_with(sandbox: &Sandbox, binary_body: &str) -> StaticReleaseSource {
    StaticReleaseSource::new("1.0.0").with_release(
        "v1.0.1",
        vec![(ARTIFACT.to_string(), sandbox.release_archive(binary_body))],
        true,
    )
}

#[tokio::test]
async fn test_complete_upgrade() {
    let sandbox = Sandbox::new("1.0.0");
    sandbox.write_data("config.json", r#"{"rate": 90}"#);
    sandbox.write_data("tasks.json", "[\"review\"]");
    sandbox.install_binary("echo harvest 1.0.0");
    let source = release_with(&sandbox, "echo harvest 1.0.1");

    let orchestrator = UpgradeOrchestrator::new(&sandbox.ctx, &source).with_platform(linux_amd64());
    let mut prompted = None;
    let outcome = orchestrator
        .perform_upgrade(|info| {
            prompted = Some(info.latest_version.clone());
            true
        })
        .await
        .unwrap();

    assert_eq!(prompted.as_deref(), Some("1.0.1"));
    assert!(matches!(outcome, UpgradeOutcome::Upgraded { rollback_available: true, .. }));
    assert!(sandbox.installed_binary().contains("harvest 1.0.1"));
    assert_eq!(sandbox.read_data("tasks.json"), "[\"review\"]");

    let previous = std::fs::read_to_string(sandbox.ctx.binary_backup_path()).unwrap();
    assert!(previous.contains("harvest 1.0.0"));

    let snapshot = BackupStore::new(&sandbox.ctx).verify_backup().await.unwrap();
    assert_eq!(std::fs::read_to_string(snapshot.join("config.json")).unwrap(), r#"{"rate": 90}"#);

    // Scratch and staging areas are cleaned up.
    assert!(!sandbox.ctx.paths.work_dir.exists());
    assert!(!sandbox.ctx.paths.download_dir.join(ARTIFACT).exists());

    let messages = ActivityLog::new(sandbox.ctx.paths.activity_log()).messages().await.unwrap();
    assert_eq!(messages.first().map(String::as_str), Some("Upgrade from 1.0.0 to 1.0.1 started"));
    assert_eq!(messages.last().map(String::as_str), Some("Upgrade to 1.0.1 completed"));
}

#[tokio::test]
async fn test_upgrade_on_fresh_system() {
    let sandbox = Sandbox::new("1.0.0");
    let source = release_with(&sandbox, "echo harvest 1.0.1");

    let orchestrator = UpgradeOrchestrator::new(&sandbox.ctx, &source).with_platform(linux_amd64());
    let outcome = orchestrator.perform_upgrade(|_| true).await.unwrap();

    // No previous binary, so nothing to roll back to.
    assert!(matches!(outcome, UpgradeOutcome::Upgraded { rollback_available: false, .. }));
    assert!(sandbox.ctx.paths.install_path.exists());
    assert!(!sandbox.ctx.binary_backup_path().exists());

    // Placeholders were snapshotted and restored for the absent data files.
    assert_eq!(sandbox.read_data("config.json"), "{}");
    assert_eq!(sandbox.read_data("tasks.json"), "{}");
}

#[tokio::test]
async fn test_declined_upgrade_changes_nothing() {
    let sandbox = Sandbox::new("1.0.0");
    sandbox.install_binary("echo harvest 1.0.0");
    let source = release_with(&sandbox, "echo harvest 1.0.1");

    let outcome = UpgradeOrchestrator::new(&sandbox.ctx, &source)
        .with_platform(linux_amd64())
        .perform_upgrade(|_| false)
        .await
        .unwrap();

    assert_eq!(outcome, UpgradeOutcome::Cancelled);
    assert!(sandbox.installed_binary().contains("harvest 1.0.0"));
    assert!(!sandbox.ctx.paths.backup_root.exists());
}

#[tokio::test]
async fn test_missing_checksum_aborts_before_install() {
    let sandbox = Sandbox::new("1.0.0");
    sandbox.install_binary("echo harvest 1.0.0");
    let source = StaticReleaseSource::new("1.0.0").with_release(
        "v1.0.1",
        vec![(ARTIFACT.to_string(), sandbox.release_archive("echo harvest 1.0.1"))],
        false,
    );

    let err = UpgradeOrchestrator::new(&sandbox.ctx, &source)
        .with_platform(linux_amd64())
        .perform_upgrade(|_| true)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<UpgradeError>(),
        Some(UpgradeError::ChecksumUnavailable { .. })
    ));
    assert!(sandbox.installed_binary().contains("harvest 1.0.0"));
    // The data snapshot was still taken before the download.
    assert_eq!(BackupStore::new(&sandbox.ctx).list_backups().await.unwrap().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn test_failed_verification_rolls_back() {
    init_test_logging(None);
    let mut sandbox = Sandbox::new("1.0.0");
    sandbox.ctx.config.smoke_test = true;
    sandbox.write_data("tasks.json", "[\"timesheet\"]");
    sandbox.install_binary("echo harvest 1.0.0");
    // The new release crashes on start.
    let source = release_with(&sandbox, "exit 70");

    let err = UpgradeOrchestrator::new(&sandbox.ctx, &source)
        .with_platform(linux_amd64())
        .perform_upgrade(|_| true)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("previous version was restored"));
    assert!(matches!(
        err.downcast_ref::<UpgradeError>(),
        Some(UpgradeError::VerificationFailed { .. })
    ));
    assert!(sandbox.installed_binary().contains("harvest 1.0.0"));
    assert_eq!(sandbox.read_data("tasks.json"), "[\"timesheet\"]");
    assert!(RollbackManager::new(&sandbox.ctx).detect_installation_failure().await.is_none());

    let messages = ActivityLog::new(sandbox.ctx.paths.activity_log()).messages().await.unwrap();
    let failed = messages
        .iter()
        .position(|m| m.starts_with("Install failed during verifying the installation"))
        .unwrap();
    let completed = messages.iter().position(|m| m == "Rollback state: verifying -> completed").unwrap();
    assert!(failed < completed);
}
