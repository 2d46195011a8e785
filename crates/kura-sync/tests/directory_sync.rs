//! Directory reconciliation end to end.
//!
//! Most tests run against `MemoryFs`, whose per-path write counters make the
//! amount of disk I/O observable; the real-disk tests use `LocalFs` in a
//! `TempDir`. External edits are injected through `ManualSource`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kura_sync::{
    ChangeEvent, ChangeKind, ChangeOrigin, DirectoryCoordinator, DirectoryObserver,
    ExtensionResolver, FileSystem, Identifiable, JsonCodec, LifecycleSweeper, LocalFs, ManualSource,
    MemoryFs, Observable, ReadRecovery, Snapshot, SyncConfig, ValueIdentity,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Shared test setup
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Note {
    id: u32,
    text: String,
}

impl Identifiable for Note {
    type Id = u32;

    fn id(&self) -> u32 {
        self.id
    }

    fn value_identity(&self) -> ValueIdentity {
        ValueIdentity::hashed(&self.text)
    }

    fn same_value(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

fn note(id: u32, text: &str) -> Note {
    Note {
        id,
        text: text.to_string(),
    }
}

fn snapshot(notes: &[Note]) -> Snapshot<Note> {
    notes.iter().cloned().collect()
}

fn encoded(note: &Note) -> Vec<u8> {
    serde_json::to_vec(note).unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn resolver() -> Arc<ExtensionResolver<Note>> {
    Arc::new(ExtensionResolver::new(JsonCodec::default()).with_recovery(ReadRecovery::Propagate))
}

/// A directory coordinator over `/notes` with the given files already on disk.
fn memory_dir(existing: &[Note]) -> (Arc<MemoryFs>, DirectoryCoordinator<Note>) {
    init_tracing();
    let fs = Arc::new(MemoryFs::new());
    for n in existing {
        fs.put(Path::new(&format!("/notes/{}.json", n.id)), encoded(n));
    }
    let dir = DirectoryCoordinator::new("/notes", fs.clone(), resolver(), SyncConfig::for_tests());
    (fs, dir)
}

async fn settle() {
    tokio::time::sleep(SyncConfig::for_tests().debounce() * 4).await;
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_scenario_rename_and_update() {
    let (fs, dir) = memory_dir(&[note(1, "a"), note(2, "b")]);
    assert_eq!(dir.get().await.unwrap(), snapshot(&[note(1, "a"), note(2, "b")]));
    let before = dir.coordinator(&2).await.unwrap();

    let reconciled = dir
        .set(snapshot(&[note(1, "a2"), note(3, "b")]))
        .await
        .unwrap();
    assert_eq!(reconciled, snapshot(&[note(1, "a2"), note(3, "b")]));
    assert_eq!(dir.get().await.unwrap(), reconciled);

    // 2 → 3 is a rename: same coordinator, no file created or deleted.
    let after = dir.coordinator(&3).await.unwrap();
    assert!(after.ptr_eq(&before));
    assert!(dir.coordinator(&2).await.is_none());
    assert!(fs.exists(Path::new("/notes/2.json")).await);
    assert!(!fs.exists(Path::new("/notes/3.json")).await);
    assert_eq!(fs.write_count(Path::new("/notes/2.json")), 0);

    // 1 is an update, flushed after the debounce delay.
    assert_eq!(fs.write_count(Path::new("/notes/1.json")), 0);
    settle().await;
    assert_eq!(fs.write_count(Path::new("/notes/1.json")), 1);
    assert_eq!(
        fs.read(Path::new("/notes/1.json")).await.unwrap(),
        encoded(&note(1, "a2"))
    );
}

#[tokio::test]
async fn test_rename_performs_no_io() {
    let (fs, dir) = memory_dir(&[note(10, "x")]);
    dir.get().await.unwrap();

    dir.set(snapshot(&[note(11, "x")])).await.unwrap();
    settle().await;

    assert_eq!(fs.total_writes(), 0);
    assert!(fs.exists(Path::new("/notes/10.json")).await);
    assert!(!fs.exists(Path::new("/notes/11.json")).await);
    assert!(dir.coordinator(&11).await.is_some());
}

#[tokio::test]
async fn test_rename_survives_reload() {
    let (fs, dir) = memory_dir(&[note(1, "a"), note(2, "b")]);
    dir.get().await.unwrap();

    dir.set(snapshot(&[note(1, "a"), note(3, "b")])).await.unwrap();
    let reloaded = dir.reload().await.unwrap();
    assert_eq!(reloaded, snapshot(&[note(1, "a"), note(3, "b")]));
    assert!(dir.coordinator(&2).await.is_none());

    dir.commit().await.unwrap();
    assert_eq!(
        fs.read(Path::new("/notes/2.json")).await.unwrap(),
        encoded(&note(3, "b"))
    );
    assert_eq!(dir.reload().await.unwrap(), reloaded);
}

#[tokio::test]
async fn test_rename_flushed_on_drop() {
    let (fs, dir) = memory_dir(&[note(1, "a"), note(2, "b")]);
    dir.get().await.unwrap();

    dir.set(snapshot(&[note(1, "a"), note(3, "b")])).await.unwrap();
    drop(dir);
    settle().await;

    assert_eq!(
        fs.read(Path::new("/notes/2.json")).await.unwrap(),
        encoded(&note(3, "b"))
    );
    let reopened =
        DirectoryCoordinator::new("/notes", fs.clone(), resolver(), SyncConfig::for_tests());
    let mut ids: Vec<u32> = reopened.get().await.unwrap().ids().copied().collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn test_ambiguous_rename_is_delete_plus_inserts() {
    let (fs, dir) = memory_dir(&[note(10, "x")]);
    dir.get().await.unwrap();

    dir.set(snapshot(&[note(11, "x"), note(12, "x")])).await.unwrap();

    assert!(!fs.exists(Path::new("/notes/10.json")).await);
    assert_eq!(fs.write_count(Path::new("/notes/11.json")), 1);
    assert_eq!(fs.write_count(Path::new("/notes/12.json")), 1);
}

#[tokio::test]
async fn test_insert_after_rename_avoids_collision() {
    let (fs, dir) = memory_dir(&[note(1, "x")]);
    dir.get().await.unwrap();

    // 1 → 2 keeps the file 1.json; a new item 1 must not overwrite it.
    dir.set(snapshot(&[note(2, "x")])).await.unwrap();
    dir.set(snapshot(&[note(2, "x"), note(1, "fresh")])).await.unwrap();

    assert_eq!(fs.write_count(Path::new("/notes/1~2.json")), 1);
    assert_eq!(
        fs.read(Path::new("/notes/1~2.json")).await.unwrap(),
        encoded(&note(1, "fresh"))
    );
}

#[tokio::test]
async fn test_rapid_updates_coalesce() {
    let (fs, dir) = memory_dir(&[note(1, "v0")]);
    dir.get().await.unwrap();

    for i in 1..=5 {
        dir.set(snapshot(&[note(1, &format!("v{i}"))])).await.unwrap();
    }
    settle().await;

    assert_eq!(fs.write_count(Path::new("/notes/1.json")), 1);
    assert_eq!(
        fs.read(Path::new("/notes/1.json")).await.unwrap(),
        encoded(&note(1, "v5"))
    );
}

#[tokio::test]
async fn test_commit_is_idempotent() {
    let (fs, dir) = memory_dir(&[]);
    dir.set(snapshot(&[note(1, "a")])).await.unwrap();
    dir.set(snapshot(&[note(1, "b")])).await.unwrap();

    dir.commit().await.unwrap();
    let first = fs.read(Path::new("/notes/1.json")).await.unwrap();
    dir.commit().await.unwrap();
    let second = fs.read(Path::new("/notes/1.json")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, encoded(&note(1, "b")));
}

#[tokio::test]
async fn test_unreadable_entries_are_skipped() {
    let (fs, dir) = memory_dir(&[note(1, "ok")]);
    fs.put(Path::new("/notes/2.json"), "{ truncated");
    fs.put(Path::new("/notes/.draft.json"), encoded(&note(3, "hidden")));

    assert_eq!(dir.get().await.unwrap(), snapshot(&[note(1, "ok")]));
    assert_eq!(
        fs.read(Path::new("/notes/2.json")).await.unwrap(),
        b"{ truncated",
        "propagate leaves the bad file alone"
    );
}

#[tokio::test]
async fn test_set_publishes_local_notice() {
    let (_fs, dir) = memory_dir(&[]);
    let mut notices = dir.subscribe();
    Observable::set(&dir, snapshot(&[note(1, "a")])).await.unwrap();
    assert_eq!(notices.recv().await.unwrap().origin, ChangeOrigin::Local);
}

#[tokio::test]
async fn test_lifecycle_sweep_commits_directory() {
    let (fs, dir) = memory_dir(&[note(1, "a")]);
    let sweeper = LifecycleSweeper::new();
    sweeper.register(&dir);
    dir.get().await.unwrap();

    dir.set(snapshot(&[note(1, "b")])).await.unwrap();
    assert_eq!(fs.write_count(Path::new("/notes/1.json")), 0);
    assert_eq!(sweeper.sweep().await, 1);
    assert_eq!(
        fs.read(Path::new("/notes/1.json")).await.unwrap(),
        encoded(&note(1, "b"))
    );
}

// ============================================================================
// External changes
// ============================================================================

#[tokio::test]
async fn test_external_edits_reload() {
    init_tracing();
    let config = SyncConfig::for_tests();
    let fs = Arc::new(MemoryFs::new());
    fs.put(Path::new("/notes/1.json"), encoded(&note(1, "a")));
    fs.put(Path::new("/notes/2.json"), encoded(&note(2, "b")));

    let source = ManualSource::new();
    let observer = DirectoryObserver::new(Arc::new(source.clone()), &config);
    let dir =
        DirectoryCoordinator::observed("/notes", fs.clone(), resolver(), &observer, config.clone())
            .unwrap();
    let mut notices = dir.subscribe();
    dir.get().await.unwrap();

    fs.put(Path::new("/notes/1.json"), encoded(&note(1, "edited")));
    fs.remove(Path::new("/notes/2.json")).await.unwrap();
    fs.put(Path::new("/notes/5.json"), encoded(&note(5, "new")));
    source
        .emit(
            Path::new("/notes"),
            vec![
                ChangeEvent::new("/notes/1.json", ChangeKind::Modified),
                ChangeEvent::new("/notes/2.json", ChangeKind::Removed),
                ChangeEvent::new("/notes/5.json", ChangeKind::Created),
            ],
        )
        .await;

    let notice = tokio::time::timeout(Duration::from_secs(1), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.origin, ChangeOrigin::External);
    assert_eq!(
        dir.get().await.unwrap(),
        snapshot(&[note(1, "edited"), note(5, "new")])
    );

    // The coordinator of the vanished file is gone; nothing was deleted or rewritten.
    assert!(dir.coordinator(&2).await.is_none());
    assert_eq!(fs.total_writes(), 0);
}

#[tokio::test]
async fn test_external_edit_keeps_pending_rename() {
    init_tracing();
    let config = SyncConfig::for_tests();
    let fs = Arc::new(MemoryFs::new());
    fs.put(Path::new("/notes/1.json"), encoded(&note(1, "a")));
    fs.put(Path::new("/notes/2.json"), encoded(&note(2, "b")));

    let source = ManualSource::new();
    let observer = DirectoryObserver::new(Arc::new(source.clone()), &config);
    let dir =
        DirectoryCoordinator::observed("/notes", fs.clone(), resolver(), &observer, config.clone())
            .unwrap();
    dir.get().await.unwrap();
    dir.set(snapshot(&[note(1, "a"), note(3, "b")])).await.unwrap();
    let mut notices = dir.subscribe();

    fs.put(Path::new("/notes/1.json"), encoded(&note(1, "edited")));
    source
        .emit(
            Path::new("/notes"),
            vec![ChangeEvent::new("/notes/1.json", ChangeKind::Modified)],
        )
        .await;

    let notice = tokio::time::timeout(Duration::from_secs(1), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.origin, ChangeOrigin::External);
    assert_eq!(
        dir.get().await.unwrap(),
        snapshot(&[note(1, "edited"), note(3, "b")])
    );
    assert!(dir.coordinator(&3).await.is_some());
    assert!(dir.coordinator(&2).await.is_none());
}

#[tokio::test]
async fn test_own_writes_do_not_reload() {
    init_tracing();
    let config = SyncConfig::for_tests();
    let fs = Arc::new(MemoryFs::new());
    let source = ManualSource::new();
    let observer = DirectoryObserver::new(Arc::new(source.clone()), &config);
    let dir =
        DirectoryCoordinator::observed("/notes", fs.clone(), resolver(), &observer, config.clone())
            .unwrap();

    dir.set(snapshot(&[note(1, "mine")])).await.unwrap();
    let mut notices = dir.subscribe();
    source
        .emit(
            Path::new("/notes"),
            vec![ChangeEvent::new("/notes/1.json", ChangeKind::Created)],
        )
        .await;

    let quiet = tokio::time::timeout(Duration::from_millis(100), notices.recv()).await;
    assert!(quiet.is_err(), "self-inflicted change must not reload");
}

#[tokio::test]
async fn test_change_before_first_load_is_ignored() {
    init_tracing();
    let config = SyncConfig::for_tests();
    let fs = Arc::new(MemoryFs::new());
    let source = ManualSource::new();
    let observer = DirectoryObserver::new(Arc::new(source.clone()), &config);
    let dir =
        DirectoryCoordinator::observed("/notes", fs.clone(), resolver(), &observer, config.clone())
            .unwrap();
    let mut notices = dir.subscribe();

    fs.put(Path::new("/notes/1.json"), encoded(&note(1, "early")));
    source
        .emit(
            Path::new("/notes"),
            vec![ChangeEvent::new("/notes/1.json", ChangeKind::Created)],
        )
        .await;

    let quiet = tokio::time::timeout(Duration::from_millis(100), notices.recv()).await;
    assert!(quiet.is_err());
    assert_eq!(dir.get().await.unwrap(), snapshot(&[note(1, "early")]));
}

#[tokio::test]
async fn test_close_releases_watch() {
    let config = SyncConfig::for_tests();
    let fs = Arc::new(MemoryFs::new());
    let source = ManualSource::new();
    let observer = DirectoryObserver::new(Arc::new(source.clone()), &config);
    let dir =
        DirectoryCoordinator::observed("/notes", fs.clone(), resolver(), &observer, config.clone())
            .unwrap();
    assert!(source.is_watching(Path::new("/notes")));

    dir.set(snapshot(&[note(1, "a")])).await.unwrap();
    dir.set(snapshot(&[note(1, "b")])).await.unwrap();
    dir.close().await.unwrap();

    assert_eq!(observer.watch_count(Path::new("/notes")), 0);
    assert_eq!(
        fs.read(Path::new("/notes/1.json")).await.unwrap(),
        encoded(&note(1, "b"))
    );
}

// ============================================================================
// Real disk
// ============================================================================

#[tokio::test]
async fn test_local_fs_round_trip() {
    init_tracing();
    let tmp = tempfile::TempDir::new().unwrap();
    let root = tmp.path().join("notes");
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFs::new());

    let dir = DirectoryCoordinator::new(&root, fs.clone(), resolver(), SyncConfig::for_tests());
    dir.set(snapshot(&[note(1, "one"), note(2, "two")])).await.unwrap();
    dir.set(snapshot(&[note(1, "uno"), note(2, "two")])).await.unwrap();
    dir.commit().await.unwrap();

    let reopened = DirectoryCoordinator::new(&root, fs, resolver(), SyncConfig::for_tests());
    let loaded = reopened.get().await.unwrap();
    let mut items = loaded.into_vec();
    items.sort_by_key(|n| n.id);
    assert_eq!(items, vec![note(1, "uno"), note(2, "two")]);

    let leftovers: Vec<_> = std::fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "no temp files left: {leftovers:?}");
}
