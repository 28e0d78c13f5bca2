use crate::common::Sandbox;
use harvest_cli::core::UpgradeError;
use harvest_cli::upgrade::activity_log::ActivityLog;
use harvest_cli::upgrade::{BackupStore, RollbackManager, RollbackState};

#[tokio::test]
async fn test_rollback_after_broken_upgrade() {
    let sandbox = Sandbox::new("1.0.1");
    sandbox.write_data("config.json", r#"{"rate": 90}"#);
    sandbox.write_data("tasks.json", "[\"invoice\"]");
    BackupStore::new(&sandbox.ctx).create_backup().await.unwrap();

    // What the previous install left in the binary slot.
    std::fs::write(sandbox.ctx.binary_backup_path(), "#!/bin/sh\necho harvest 1.0.0\n").unwrap();

    // The upgrade broke both the binary and the data.
    std::fs::create_dir_all(sandbox.ctx.paths.install_path.parent().unwrap()).unwrap();
    std::fs::write(&sandbox.ctx.paths.install_path, "broken").unwrap();
    sandbox.write_data("tasks.json", "{{{");

    let manager = RollbackManager::new(&sandbox.ctx);
    assert!(manager.is_rollback_available().await);
    assert!(manager.get_rollback_info().await.available);

    let attempt = manager.perform_rollback().await.unwrap();
    assert_eq!(attempt.state(), RollbackState::Completed);
    assert_eq!(
        attempt.history(),
        &[
            RollbackState::NotStarted,
            RollbackState::BinaryRestoring,
            RollbackState::DataRestoring,
            RollbackState::Verifying,
            RollbackState::Completed,
        ]
    );

    assert_eq!(sandbox.installed_binary(), "#!/bin/sh\necho harvest 1.0.0\n");
    assert_eq!(sandbox.read_data("tasks.json"), "[\"invoice\"]");
    assert_eq!(sandbox.read_data("config.json"), r#"{"rate": 90}"#);

    let messages = ActivityLog::new(sandbox.ctx.paths.activity_log()).messages().await.unwrap();
    let position = |needle: &str| {
        messages
            .iter()
            .position(|m| m.contains(needle))
            .unwrap_or_else(|| panic!("{needle:?} not logged in {messages:?}"))
    };
    let binary = position("-> binary-restoring");
    let restored_binary = position("Binary restored from");
    let data = position("-> data-restoring");
    let restored_data = position("Data restored from backup");
    let verifying = position("-> verifying");
    let completed = position("-> completed");
    assert!(binary < restored_binary);
    assert!(restored_binary < data);
    assert!(data < restored_data);
    assert!(restored_data < verifying);
    assert!(verifying < completed);
}

#[tokio::test]
async fn test_rollback_on_fresh_system() {
    let sandbox = Sandbox::new("1.0.0");
    let manager = RollbackManager::new(&sandbox.ctx);

    assert!(!manager.is_rollback_available().await);
    let info = manager.get_rollback_info().await;
    assert!(!info.available);
    assert!(info.binary_backup.is_none());
    assert!(info.data_backup.is_none());

    let err = manager.perform_rollback().await.unwrap_err();
    assert_eq!(err.downcast_ref::<UpgradeError>(), Some(&UpgradeError::NoBinaryBackup));

    let log = manager.read_log().await.unwrap();
    assert!(log.contains("Rollback failed while restoring the binary"));
    assert!(log.contains("binary-restoring -> failed"));
}
