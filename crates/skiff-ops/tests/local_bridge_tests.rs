use std::fs;
use std::sync::Arc;

use skiff_core::{Capabilities, ConflictDirective, TaskStatus, TransferConfig};
use skiff_ops::{Destination, LocalBridge, ScanInput, TransferEngine};
use tempfile::TempDir;

fn create_source_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("docs");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("a.txt"), "0123456789").unwrap();
    fs::write(root.join("sub/b.txt"), "01234567890123456789").unwrap();
    temp
}

fn config(compress: bool) -> TransferConfig {
    TransferConfig::builder()
        .frame_interval_ms(0u64)
        .compress_folders(compress)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_upload_tree_file_by_file() {
    let source = create_source_tree();
    let target = TempDir::new().unwrap();
    let bridge = Arc::new(LocalBridge::new().with_chunk_size(4));
    let session = bridge.open_session(target.path());
    let engine = TransferEngine::new(bridge.clone(), config(false));

    let report = engine
        .transfer(
            vec![ScanInput::path(source.path().join("docs"))],
            Destination::remote(session, "/"),
        )
        .await;

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(
        fs::read_to_string(target.path().join("docs/a.txt")).unwrap(),
        "0123456789"
    );
    assert_eq!(
        fs::read_to_string(target.path().join("docs/sub/b.txt")).unwrap(),
        "01234567890123456789"
    );

    let task = &engine.tasks()[0];
    assert_eq!(task.total_bytes, 30);
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_upload_tree_as_archive() {
    let source = create_source_tree();
    let target = TempDir::new().unwrap();
    let bridge = Arc::new(LocalBridge::new());
    let session = bridge.open_session(target.path());
    let engine = TransferEngine::new(bridge.clone(), config(true));

    let report = engine
        .transfer(
            vec![ScanInput::path(source.path().join("docs"))],
            Destination::remote(session, "/"),
        )
        .await;

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(
        fs::read_to_string(target.path().join("docs/sub/b.txt")).unwrap(),
        "01234567890123456789"
    );

    // The staging archive is gone once extracted.
    let leftovers: Vec<_> = fs::read_dir(target.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tar.gz"))
        .collect();
    assert!(leftovers.is_empty());

    let task = &engine.tasks()[0];
    assert_eq!(task.name, "docs");
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_download_remote_tree() {
    let source = create_source_tree();
    let target = TempDir::new().unwrap();
    let bridge = Arc::new(LocalBridge::with_capabilities(Capabilities::minimal()));
    let session = bridge.open_session(source.path());
    let engine = TransferEngine::new(bridge.clone(), config(false));

    let report = engine
        .transfer(
            vec![ScanInput::remote(session, "/docs")],
            Destination::local(target.path().to_string_lossy()),
        )
        .await;

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(
        fs::read_to_string(target.path().join("docs/sub/b.txt")).unwrap(),
        "01234567890123456789"
    );
}

#[tokio::test]
async fn test_existing_file_conflict_and_duplicate() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    fs::write(source.path().join("report.pdf"), vec![1u8; 5000]).unwrap();
    fs::write(target.path().join("report.pdf"), vec![0u8; 3000]).unwrap();

    let bridge = Arc::new(LocalBridge::new());
    let session = bridge.open_session(target.path());
    let engine = TransferEngine::new(bridge.clone(), config(false));

    let mut report = engine
        .transfer(
            vec![ScanInput::path(source.path().join("report.pdf"))],
            Destination::remote(session, "/"),
        )
        .await;

    assert!(report.results.is_empty());
    let pending = report.conflicts.remove(0);
    assert_eq!(pending.conflict.existing_size, 3000);
    assert_eq!(pending.conflict.new_size, 5000);
    assert!(pending.conflict.existing_modified.is_some());

    let resumed = engine.resolve(pending, ConflictDirective::Duplicate).await;
    assert!(resumed.is_success());
    assert_eq!(
        fs::metadata(target.path().join("report (copy).pdf")).unwrap().len(),
        5000
    );
    assert_eq!(fs::metadata(target.path().join("report.pdf")).unwrap().len(), 3000);
}

#[tokio::test]
async fn test_missing_input_is_a_warning() {
    let target = TempDir::new().unwrap();
    let bridge = Arc::new(LocalBridge::new());
    let session = bridge.open_session(target.path());
    let engine = TransferEngine::new(bridge.clone(), config(false));

    let report = engine
        .transfer(
            vec![ScanInput::path(target.path().join("does-not-exist"))],
            Destination::remote(session, "/"),
        )
        .await;

    assert!(report.results.is_empty());
    assert_eq!(report.warnings.len(), 1);
}

#[tokio::test]
async fn test_parent_dir_input_uses_resolved_name() {
    let source = create_source_tree();
    let target = TempDir::new().unwrap();
    let bridge = Arc::new(LocalBridge::new());
    let session = bridge.open_session(target.path());
    let engine = TransferEngine::new(bridge.clone(), config(false));

    let report = engine
        .transfer(
            vec![ScanInput::path(source.path().join("docs").join("sub").join(".."))],
            Destination::remote(session, "/"),
        )
        .await;

    assert!(report.is_success(), "{}", report.summary());
    assert!(report.warnings.is_empty());
    assert_eq!(
        fs::read_to_string(target.path().join("docs/sub/b.txt")).unwrap(),
        "01234567890123456789"
    );
    assert_eq!(engine.tasks()[0].name, "docs");
}
