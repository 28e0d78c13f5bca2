use crate::common::Sandbox;
use harvest_cli::core::UpgradeError;
use harvest_cli::test_utils::{StaticReleaseSource, linux_amd64};
use harvest_cli::upgrade::{DownloadStage, ReleaseSource};

#[tokio::test]
async fn test_truncated_artifact_is_rejected_and_deleted() {
    let mut sandbox = Sandbox::new("1.0.0");
    sandbox.ctx.config.binary_name = "tool".to_string();
    sandbox.ctx.config.min_artifact_size = 1024 * 1024;
    let source = StaticReleaseSource::new("1.0.0");
    let stage = DownloadStage::new(&sandbox.ctx, &source);

    std::fs::create_dir_all(&sandbox.ctx.paths.download_dir).unwrap();
    let staged = sandbox.ctx.paths.download_dir.join("tool-1.0.1-linux-amd64.tar.gz");
    std::fs::write(&staged, b"0123456789").unwrap();

    let err = stage.verify_download(&staged, "1.0.1").await.unwrap_err();
    match err.downcast_ref::<UpgradeError>() {
        Some(UpgradeError::ArtifactTooSmall {
            size,
            minimum,
            ..
        }) => {
            assert_eq!(*size, 10);
            assert_eq!(*minimum, 1024 * 1024);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!staged.exists());
}

#[tokio::test]
async fn test_tampered_artifact_fails_checksum() {
    let sandbox = Sandbox::new("1.0.0");
    let archive = sandbox.release_archive("echo harvest 1.0.1");
    let source = StaticReleaseSource::new("1.0.0")
        .with_release("v1.0.1", vec![("harvest-1.0.1-linux-amd64.tar.gz".to_string(), archive)], true)
        .with_checksum_override("harvest-1.0.1-linux-amd64.tar.gz", &"0".repeat(64));
    let stage = DownloadStage::new(&sandbox.ctx, &source).with_platform(linux_amd64());

    let release = source.latest_release().await.unwrap();
    let err = stage.fetch_verified(&release).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpgradeError>(),
        Some(UpgradeError::ChecksumMismatch { .. })
    ));

    let leftovers = std::fs::read_dir(&sandbox.ctx.paths.download_dir).unwrap().count();
    assert_eq!(leftovers, 0);
}
