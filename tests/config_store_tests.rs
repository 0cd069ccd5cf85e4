//! Config loading and change detection.

use mcpmux::config::{ConfigStore, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_LOADED_SERVERS};
use mcpmux::error::RouterError;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file.flush().expect("flush config");
    file
}

#[tokio::test]
async fn load_applies_defaults() {
    let file = write_config(
        r#"
[servers.alpha]
command = "alpha-server"
"#,
    );
    let mut store = ConfigStore::new(Some(file.path().to_path_buf()));
    let table = store.load().await.expect("load");

    assert_eq!(table.policy.max_loaded_servers, DEFAULT_MAX_LOADED_SERVERS);
    assert_eq!(
        table.policy.default_idle_timeout,
        Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
    );
    assert!(table.policy.hot_reload);

    let alpha = table.get("alpha").expect("alpha present");
    assert!(alpha.enabled);
    assert!(!alpha.auto_load);
    assert!(!alpha.is_remote());
    assert_eq!(
        alpha.idle_timeout,
        Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
    );
}

#[tokio::test]
async fn load_honors_explicit_policy_and_overrides() {
    let file = write_config(
        r#"
[router]
hot_reload = false
default_idle_timeout = 60
max_loaded_servers = 3

[servers.beta]
url = "http://localhost:9000/sse"
idle_timeout = 0
enabled = false
tags = ["math", "remote"]
"#,
    );
    let mut store = ConfigStore::new(Some(file.path().to_path_buf()));
    let table = store.load().await.expect("load");

    assert!(!table.policy.hot_reload);
    assert_eq!(table.policy.max_loaded_servers, 3);

    let beta = table.get("beta").expect("beta present");
    assert!(beta.is_remote());
    assert!(!beta.enabled);
    assert!(beta.idle_timeout.is_zero());
    assert!(beta.tags.contains("math"));
}

#[tokio::test]
async fn malformed_entries_are_skipped_not_fatal() {
    let file = write_config(
        r#"
[servers.good]
command = "good-server"

[servers.both]
command = "both-server"
url = "http://localhost:1/sse"

[servers.neither]
description = "no transport at all"
"#,
    );
    let mut store = ConfigStore::new(Some(file.path().to_path_buf()));
    let table = store.load().await.expect("load");

    assert_eq!(table.servers.len(), 1);
    assert!(table.get("good").is_some());
    assert!(table.get("both").is_none());
    assert!(table.get("neither").is_none());
}

#[tokio::test]
async fn invalid_toml_is_a_parse_error() {
    let file = write_config("this is [not toml");
    let mut store = ConfigStore::new(Some(file.path().to_path_buf()));
    match store.load().await {
        Err(RouterError::ConfigParse(_)) => {}
        other => panic!("expected ConfigParse, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_file_yields_empty_table() {
    let mut store = ConfigStore::new(Some(PathBuf::from("/nonexistent/mcpmux.toml")));
    let table = store.load().await.expect("load");
    assert!(table.servers.is_empty());

    let mut detached = ConfigStore::detached();
    let table = detached.load().await.expect("load");
    assert!(table.servers.is_empty());
}

#[tokio::test]
async fn has_changed_tracks_content_not_touches() {
    let file = write_config("[servers.alpha]\ncommand = \"alpha\"\n");
    let path = file.path().to_path_buf();
    let mut store =
        ConfigStore::new(Some(path.clone())).with_poll_interval(Duration::ZERO);

    store.load().await.expect("load");
    assert!(!store.has_changed().await, "unchanged file reports changed");

    // Rewrite with identical content but a fresh mtime.
    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::fs::write(&path, "[servers.alpha]\ncommand = \"alpha\"\n")
        .await
        .expect("rewrite");
    assert!(
        !store.has_changed().await,
        "identical content reports changed"
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::fs::write(&path, "[servers.alpha]\ncommand = \"alpha-v2\"\n")
        .await
        .expect("rewrite");
    assert!(store.has_changed().await, "edited file reports unchanged");

    // And the edge is consumed.
    assert!(!store.has_changed().await);
}

#[tokio::test]
async fn vanished_file_is_not_a_change() {
    let file = write_config("[servers.alpha]\ncommand = \"alpha\"\n");
    let path = file.path().to_path_buf();
    let mut store =
        ConfigStore::new(Some(path.clone())).with_poll_interval(Duration::ZERO);
    store.load().await.expect("load");

    drop(file);
    assert!(!store.has_changed().await);
}

#[tokio::test]
async fn detached_store_never_changes() {
    let mut store = ConfigStore::detached().with_poll_interval(Duration::ZERO);
    assert!(!store.has_changed().await);
}
