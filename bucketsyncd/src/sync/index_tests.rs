use std::sync::Mutex as StdMutex;

use tempfile::tempdir;

use super::*;
use crate::sync::notifier::LogNotifier;

#[derive(Default)]
struct RecordingNotifier {
    hints: StdMutex<Vec<(String, Option<SyncState>)>>,
}

impl SyncNotifier for RecordingNotifier {
    fn synchronizing(&self) {}

    fn idle(&self) {}

    fn path_changed(&self, name: &str, state: Option<SyncState>) {
        self.hints.lock().unwrap().push((name.to_string(), state));
    }
}

async fn make_store() -> StateStore {
    StateStore::in_memory(Arc::new(LogNotifier)).await.unwrap()
}

fn remote(id: &str, created: i64, size: i64) -> RemoteMeta {
    RemoteMeta {
        id: id.to_string(),
        created,
        size,
    }
}

fn local(modified: i64, size: i64) -> LocalMeta {
    LocalMeta { modified, size }
}

#[tokio::test]
async fn mark_for_download_inserts_remote_only_record() {
    let store = make_store().await;
    store
        .mark_for_download("Docs/a.txt", &remote("r1", 1_000, 100))
        .await
        .unwrap();

    let record = store.get("Docs/a.txt").await.unwrap().unwrap();
    assert_eq!(record.remote_id.as_deref(), Some("r1"));
    assert_eq!(record.remote_created, 1_000);
    assert_eq!(record.remote_size, 100);
    assert_eq!(record.local_modified, 0);
    assert_eq!(record.local_size, 0);
    assert_eq!(record.state, SyncState::ForDownload);
}

#[tokio::test]
async fn pending_transition_on_tracked_record_only_changes_state() {
    let store = make_store().await;
    store
        .mark_synced("a", &remote("r1", 1_000, 10), &local(2_000, 10))
        .await
        .unwrap();
    store
        .mark_for_download("a", &remote("r2", 5_000, 50))
        .await
        .unwrap();

    let record = store.get("a").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::ForDownload);
    assert_eq!(record.remote_id.as_deref(), Some("r1"));
    assert_eq!(record.remote_created, 1_000);
    assert_eq!(record.local_modified, 2_000);
}

#[tokio::test]
async fn mark_for_upload_inserts_local_only_record() {
    let store = make_store().await;
    store.mark_for_upload("b", &local(3_000, 50)).await.unwrap();

    let record = store.get("b").await.unwrap().unwrap();
    assert_eq!(record.remote_id, None);
    assert_eq!(record.remote_created, 0);
    assert_eq!(record.local_modified, 3_000);
    assert_eq!(record.local_size, 50);
    assert_eq!(record.state, SyncState::ForUpload);
}

#[tokio::test]
async fn upload_failure_clears_remote_half() {
    let store = make_store().await;
    store
        .mark_synced("b", &remote("r1", 1_000, 10), &local(2_000, 10))
        .await
        .unwrap();
    store.mark_upload_failed("b", &local(4_000, 20)).await.unwrap();

    let record = store.get("b").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::UploadFailed);
    assert_eq!(record.remote_id, None);
    assert_eq!(record.remote_created, 0);
    assert_eq!(record.remote_size, 0);
    assert_eq!(record.local_modified, 4_000);
    assert_eq!(record.local_size, 20);
}

#[tokio::test]
async fn download_failure_refreshes_remote_half_only() {
    let store = make_store().await;
    store
        .mark_synced("a", &remote("r1", 1_000, 10), &local(2_000, 10))
        .await
        .unwrap();
    store
        .mark_download_failed("a", &remote("r2", 9_000, 90))
        .await
        .unwrap();

    let record = store.get("a").await.unwrap().unwrap();
    assert_eq!(record.state, SyncState::DownloadFailed);
    assert_eq!(record.remote_id.as_deref(), Some("r2"));
    assert_eq!(record.remote_created, 9_000);
    assert_eq!(record.local_modified, 2_000);
}

#[tokio::test]
async fn delete_transitions_ignore_untracked_names() {
    let notifier = Arc::new(RecordingNotifier::default());
    let store = StateStore::in_memory(notifier.clone()).await.unwrap();

    store.mark_for_remote_delete("ghost").await.unwrap();
    store.mark_for_local_delete("ghost").await.unwrap();

    assert!(!store.contains("ghost").await.unwrap());
    assert!(notifier.hints.lock().unwrap().is_empty());
}

#[tokio::test]
async fn remove_contains_size_and_all() {
    let store = make_store().await;
    store
        .mark_synced("b", &remote("r2", 1, 1), &local(1, 1))
        .await
        .unwrap();
    store
        .mark_synced("a", &remote("r1", 1, 1), &local(1, 1))
        .await
        .unwrap();
    store.commit().await.unwrap();

    assert_eq!(store.size().await.unwrap(), 2);
    let names: Vec<String> = store
        .all()
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.name)
        .collect();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

    store.remove("a").await.unwrap();
    store.commit().await.unwrap();
    assert!(!store.contains("a").await.unwrap());
    assert!(store.contains("b").await.unwrap());
    assert_eq!(store.size().await.unwrap(), 1);
}

#[tokio::test]
async fn every_transition_sends_refresh_hint() {
    let notifier = Arc::new(RecordingNotifier::default());
    let store = StateStore::in_memory(notifier.clone()).await.unwrap();

    store.mark_for_upload("x", &local(1, 1)).await.unwrap();
    store.mark_for_remote_delete("x").await.unwrap();
    store.remove("x").await.unwrap();
    store
        .mark_for_local_create_dir("Docs", &remote("d", 1, 0))
        .await
        .unwrap();
    store
        .mark_conflict("Docs", &remote("d", 1, 0), &local(5, 3))
        .await
        .unwrap();

    let hints = notifier.hints.lock().unwrap().clone();
    assert_eq!(
        hints,
        vec![
            ("x".to_string(), Some(SyncState::ForUpload)),
            ("x".to_string(), Some(SyncState::ForRemoteDelete)),
            ("x".to_string(), None),
            ("Docs".to_string(), Some(SyncState::ForLocalCreateDir)),
            ("Docs".to_string(), Some(SyncState::Conflict)),
        ]
    );
}

#[tokio::test]
async fn uncommitted_writes_do_not_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("state.db");

    {
        let store = StateStore::open(&db_path, Arc::new(LogNotifier))
            .await
            .unwrap();
        store
            .mark_synced("kept", &remote("r1", 1, 1), &local(1, 1))
            .await
            .unwrap();
        store.commit().await.unwrap();
        store
            .mark_for_download("lost", &remote("r2", 2, 2))
            .await
            .unwrap();
        store.mark_for_remote_delete("kept").await.unwrap();
    }

    let reopened = StateStore::open(&db_path, Arc::new(LogNotifier))
        .await
        .unwrap();
    assert!(!reopened.contains("lost").await.unwrap());
    let kept = reopened.get("kept").await.unwrap().unwrap();
    assert_eq!(kept.state, SyncState::Synced);
}

#[tokio::test]
async fn close_rolls_back_and_rejects_writes() {
    let store = make_store().await;
    store.mark_for_upload("b", &local(1, 1)).await.unwrap();
    store.close().await.unwrap();

    assert!(matches!(
        store.mark_for_upload("c", &local(1, 1)).await,
        Err(StoreError::Closed)
    ));
    assert!(matches!(store.commit().await, Err(StoreError::Closed)));
    assert!(matches!(store.get("b").await, Err(StoreError::Closed)));
    store.close().await.unwrap();
}

#[test]
fn state_strings_parse_back() {
    for state in [
        SyncState::Synced,
        SyncState::ForDownload,
        SyncState::ForUpload,
        SyncState::ForLocalDelete,
        SyncState::ForRemoteDelete,
        SyncState::ForLocalCreateDir,
        SyncState::ForRemoteCreateDir,
        SyncState::DownloadFailed,
        SyncState::UploadFailed,
        SyncState::Conflict,
    ] {
        assert_eq!(SyncState::parse(state.as_str()).unwrap(), state);
    }
    assert!(matches!(
        SyncState::parse("cached"),
        Err(StoreError::InvalidState(_))
    ));
}

#[test]
fn state_predicates_partition_states() {
    assert!(SyncState::Synced.is_synced());
    assert!(SyncState::ForRemoteCreateDir.is_pending());
    assert!(!SyncState::UploadFailed.is_pending());
    assert!(SyncState::DownloadFailed.is_failed());
    assert!(SyncState::Conflict.is_conflict());
    assert!(!SyncState::Conflict.is_pending());
}
