use std::sync::Arc;

use skiff_core::{
    BridgeError, Capabilities, ContentHandle, Entry, IN_FLIGHT_PERCENT_CAP, ScanWarning, TaskId,
    TaskStatus, TransferConfig, TransferResult, TransferTask, WarningKind, display_percent,
    duplicate_name,
};

#[test]
fn test_task_lifecycle_flags() {
    assert!(TaskStatus::Pending.is_open());
    assert!(TaskStatus::Active.is_open());
    for status in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
        assert!(status.is_terminal());
        assert!(!status.is_open());
    }
}

#[test]
fn test_percent_capped_until_finished() {
    let mut task = TransferTask::new(TaskId::new(1), "docs", true, 30, 2);
    task.transferred_bytes = 30;
    task.completed_count = 1;
    assert_eq!(task.percent(), IN_FLIGHT_PERCENT_CAP);

    task.completed_count = 2;
    task.completed_files_bytes = 30;
    assert!(task.is_fully_transferred());
    assert_eq!(display_percent(30, 30, true), 100.0);
    assert_eq!(display_percent(0, 0, false), 0.0);
}

#[test]
fn test_results_distinguish_cancelled_from_failed() {
    let cancelled = TransferResult::cancelled("b/2.txt");
    assert!(!cancelled.success);
    assert!(cancelled.cancelled);
    assert!(cancelled.error.is_none());

    let failed = TransferResult::failed("b/2.txt", "disk full");
    assert!(!failed.cancelled);
    assert_eq!(failed.error.as_deref(), Some("disk full"));
}

#[test]
fn test_entry_bundling() {
    let data: Arc<[u8]> = Arc::from(&b"0123456789"[..]);
    let file = Entry::file("docs/a.txt", ContentHandle::Memory(data), 10);
    assert!(file.is_bundled());
    assert_eq!(file.root_name(), "docs");

    let standalone = Entry::file("report.pdf", ContentHandle::Local("/tmp/report.pdf".into()), 1);
    assert!(!standalone.is_bundled());

    let renamed = standalone.renamed(&duplicate_name(standalone.file_name()));
    assert_eq!(renamed.relative_path, "report (copy).pdf");
}

#[test]
fn test_bridge_error_classification() {
    let err = BridgeError::io("/x", std::io::Error::from(std::io::ErrorKind::NotFound));
    assert!(matches!(err, BridgeError::NotFound { .. }));

    assert!(BridgeError::unsupported("upload_archive").is_archive_fallback());
    assert!(BridgeError::Aborted.is_aborted());
    assert!(!BridgeError::other("boom").is_archive_fallback());

    let warning = ScanWarning::read_error("/srv/locked", &BridgeError::PermissionDenied {
        path: "/srv/locked".into(),
    });
    assert_eq!(warning.kind, WarningKind::PermissionDenied);
}

#[test]
fn test_config_defaults() {
    let config = TransferConfig::default();
    assert_eq!(config.frame_interval_ms, 16);
    assert!(config.should_check_conflicts());
    assert!(!config.compress_folders);
    assert_eq!(Capabilities::default(), Capabilities::minimal());
}
