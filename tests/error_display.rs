use std::time::Duration;

use pagewatch_lib::{ErrorCategory, SnapshotId, WatchError};

#[test]
fn config_error_display_includes_message() {
    let err = WatchError::Config("path.dir is required".to_string());

    assert_eq!(format!("{}", err), "Configuration error: path.dir is required");
}

#[test]
fn io_error_display_wraps_source() {
    let io_err = std::io::Error::other("disk full");
    let err: WatchError = io_err.into();
    let rendered = format!("{}", err);

    assert!(rendered.starts_with("IO error: "));
    assert!(rendered.contains("disk full"));
}

#[test]
fn page_load_names_url_and_reason() {
    let err = WatchError::page_load("https://example.com/", "net::ERR_CONNECTION_RESET");

    assert_eq!(
        format!("{}", err),
        "Page failed to load https://example.com/: net::ERR_CONNECTION_RESET"
    );
    assert_eq!(err.to_payload().category, ErrorCategory::Page);
}

#[test]
fn timeout_reports_wait() {
    let err = WatchError::Timeout {
        url: "https://example.com/".to_string(),
        waited: Duration::from_secs(60),
    };

    assert_eq!(format!("{}", err), "Page https://example.com/ did not settle within 60s");
    assert!(err
        .to_payload()
        .remediation
        .is_some_and(|hint| hint.contains("render.maxWait")));
}

#[test]
fn snapshot_errors_name_the_id() {
    let id = SnapshotId::from_millis(1_700_000_000_000);

    assert_eq!(
        format!("{}", WatchError::SnapshotNotFound(id)),
        "Snapshot 1700000000000 not found"
    );
    assert_eq!(
        format!(
            "{}",
            WatchError::SnapshotCorrupt {
                id,
                reason: "tree.json: EOF".to_string()
            }
        ),
        "Snapshot 1700000000000 is corrupt: tree.json: EOF"
    );
}

#[test]
fn exit_codes_split_input_from_runtime_failures() {
    assert_eq!(WatchError::config("bad").exit_code(), 2);
    assert_eq!(
        WatchError::from(url::Url::parse("not a url").unwrap_err()).exit_code(),
        2
    );
    assert_eq!(WatchError::browser("crashed").exit_code(), 1);
    assert_eq!(WatchError::Script("boom".to_string()).exit_code(), 1);
}
