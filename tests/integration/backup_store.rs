use crate::common::Sandbox;
use harvest_cli::core::UpgradeError;
use harvest_cli::upgrade::BackupStore;
use harvest_cli::upgrade::backup::{METADATA_FILE, read_metadata};

#[tokio::test]
async fn test_backup_restore_round_trip() {
    let sandbox = Sandbox::new("1.0.0");
    sandbox.write_data("config.json", r#"{"rate": 90}"#);
    sandbox.write_data("tasks.json", r#"[{"name": "standup", "minutes": 15}]"#);
    let store = BackupStore::new(&sandbox.ctx);

    let snapshot = store.create_backup().await.unwrap();
    assert!(snapshot.join(METADATA_FILE).exists());
    assert_eq!(store.verify_backup().await.unwrap(), snapshot);

    sandbox.write_data("config.json", "garbage");
    std::fs::remove_file(sandbox.ctx.paths.data_dir.join("tasks.json")).unwrap();

    let restored = store.restore_backup().await.unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(sandbox.read_data("config.json"), r#"{"rate": 90}"#);
    assert_eq!(sandbox.read_data("tasks.json"), r#"[{"name": "standup", "minutes": 15}]"#);

    let metadata = read_metadata(&snapshot).await.unwrap();
    assert_eq!(metadata.version, "1.0");
    assert_eq!(metadata.files, vec!["config.json", "tasks.json"]);
}

#[tokio::test]
async fn test_missing_files_get_placeholders() {
    let sandbox = Sandbox::new("1.0.0");
    sandbox.write_data("tasks.json", "[]");
    let store = BackupStore::new(&sandbox.ctx);

    let snapshot = store.create_backup().await.unwrap();
    assert_eq!(std::fs::read_to_string(snapshot.join("config.json")).unwrap(), "{}");
    store.verify_backup().await.unwrap();
}

#[tokio::test]
async fn test_latest_pointer_tracks_newest_snapshot() {
    let sandbox = Sandbox::new("1.0.0");
    let store = BackupStore::new(&sandbox.ctx);

    for _ in 0..3 {
        let created = store.create_backup().await.unwrap();
        assert_eq!(store.get_latest_backup_path().await.unwrap(), created);
        assert_eq!(store.get_latest_backup_path().await.unwrap(), created);
    }
}

#[tokio::test]
async fn test_retention_keeps_newest() {
    let sandbox = Sandbox::new("1.0.0");
    let store = BackupStore::new(&sandbox.ctx);

    let mut created = Vec::new();
    for _ in 0..4 {
        created.push(store.create_backup().await.unwrap());
    }

    let pruned = store.prune_old_backups(2).await.unwrap();
    assert_eq!(pruned, created[..2].to_vec());

    let remaining: Vec<_> = store.list_backups().await.unwrap().into_iter().map(|e| e.path).collect();
    assert_eq!(remaining, created[2..].to_vec());
    assert_eq!(store.get_latest_backup_path().await.unwrap(), created[3]);
}

#[tokio::test]
async fn test_fresh_system_has_no_backup() {
    let sandbox = Sandbox::new("1.0.0");
    let store = BackupStore::new(&sandbox.ctx);

    let err = store.get_latest_backup_path().await.unwrap_err();
    assert_eq!(err.downcast_ref::<UpgradeError>(), Some(&UpgradeError::MissingBackup));
    let err = store.verify_backup().await.unwrap_err();
    assert_eq!(err.downcast_ref::<UpgradeError>(), Some(&UpgradeError::MissingBackup));
    assert!(store.list_backups().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_verification() {
    let sandbox = Sandbox::new("1.0.0");
    let store = BackupStore::new(&sandbox.ctx);
    let snapshot = store.create_backup().await.unwrap();
    std::fs::remove_file(snapshot.join("tasks.json")).unwrap();

    let err = store.verify_backup().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpgradeError>(),
        Some(UpgradeError::CorruptBackup { .. })
    ));
}
