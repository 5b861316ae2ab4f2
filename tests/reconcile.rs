//! Reconciliation properties checked against an in-memory remote.

mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Barrier, Mutex};

use cart_sync::{
    CartItem, CartSync, LocalCartStore, MemoryCartStore, MemoryRemote, RemoteCartStore, Result,
    SkipReason, SqliteCartStore,
};

use common::{FlakyRemote, USER, item, live, tombstone};

fn sync_with(
    local: MemoryCartStore,
    remote: &MemoryRemote,
) -> CartSync<MemoryCartStore, FlakyRemote> {
    CartSync::new(USER, local, FlakyRemote::new(remote.clone())).unwrap()
}

#[test]
fn repeated_pending_upsert_is_idempotent() {
    let remote = MemoryRemote::new();
    let mut local = MemoryCartStore::new();
    local.stage_item(&item("a", 3, 10)).unwrap();
    let sync = sync_with(local, &remote);

    sync.reconcile().unwrap();
    let first = remote.snapshot(USER);

    sync.with_local(|l| l.add_pending("a")).unwrap();
    sync.reconcile().unwrap();

    assert_eq!(remote.snapshot(USER), first);
    assert_eq!(first, vec![item("a", 3, 10)]);
    assert_eq!(sync.remote().upsert_count(), 2);
}

#[test]
fn pending_tombstone_deletes_remote_copy() {
    let remote = MemoryRemote::new();
    remote.upsert(USER, &item("a", 2, 10)).unwrap();

    let mut local = MemoryCartStore::new();
    local.stage_item(&tombstone("a", 20)).unwrap();
    let sync = sync_with(local, &remote);

    let report = sync.reconcile().unwrap();
    assert_eq!(report.remote_deleted, 1);
    assert!(remote.snapshot(USER).is_empty());
    assert!(sync.with_local(|l| l.items(true)).unwrap().is_empty());
    assert!(sync.current().is_empty());
}

#[test]
fn unmarked_newer_tombstone_is_never_resurrected() {
    // The marker can be missing if the host died between the two writes.
    let remote = MemoryRemote::new();
    remote.upsert(USER, &item("a", 2, 10)).unwrap();

    let mut local = MemoryCartStore::new();
    local.save_item(&tombstone("a", 20)).unwrap();
    let sync = sync_with(local, &remote);

    let report = sync.reconcile().unwrap();
    assert_eq!(report.pulled, 0);
    assert_eq!(report.remote_deleted, 1);
    assert!(remote.snapshot(USER).is_empty());
    assert!(sync.current().is_empty());
}

#[test]
fn larger_timestamp_wins_in_both_directions() {
    let remote = MemoryRemote::new();
    remote.upsert(USER, &item("newer-remote", 5, 20)).unwrap();
    remote.upsert(USER, &item("newer-local", 5, 20)).unwrap();

    let mut local = MemoryCartStore::new();
    local.save_item(&item("newer-remote", 1, 10)).unwrap();
    local.save_item(&item("newer-local", 9, 30)).unwrap();
    let sync = sync_with(local, &remote);

    let report = sync.reconcile().unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(report.pushed, 1);

    let expected = vec![item("newer-local", 9, 30), item("newer-remote", 5, 20)];
    assert_eq!(remote.snapshot(USER), expected);
    assert_eq!(sync.current(), expected);
}

#[test]
fn equal_timestamps_keep_local_copy() {
    let remote = MemoryRemote::new();
    remote.upsert(USER, &item("a", 5, 10)).unwrap();

    let mut local = MemoryCartStore::new();
    local.save_item(&item("a", 1, 10)).unwrap();
    let sync = sync_with(local, &remote);

    let report = sync.reconcile().unwrap();
    assert_eq!(report.pulled, 0);
    assert_eq!(report.pushed, 0);
    assert_eq!(sync.current(), vec![item("a", 1, 10)]);
}

#[test]
fn full_pass_converges_local_and_remote() {
    let remote = MemoryRemote::new();
    remote.upsert(USER, &item("only-remote", 1, 5)).unwrap();
    remote.upsert(USER, &item("shared", 2, 50)).unwrap();
    remote.upsert(USER, &item("doomed", 1, 5)).unwrap();

    let mut local = SqliteCartStore::open_in_memory().unwrap();
    local.save_item(&item("only-local", 4, 7)).unwrap();
    local.save_item(&item("shared", 3, 40)).unwrap();
    local.stage_item(&tombstone("doomed", 60)).unwrap();
    local.stage_item(&item("fresh", 1, 70)).unwrap();
    local.save_item(&tombstone("orphan", 8)).unwrap();

    let sync = CartSync::new(USER, local, remote.clone()).unwrap();
    let report = sync.reconcile().unwrap();
    assert_eq!(report.dropped_tombstones, 1);

    let local_live = live(sync.with_local(|l| l.items(true)).unwrap());
    let remote_live = live(remote.snapshot(USER));
    assert_eq!(local_live, remote_live);
    assert_eq!(sync.current(), remote_live);
    assert_eq!(
        remote_live
            .iter()
            .map(|i| i.product_id.as_str())
            .collect::<Vec<_>>(),
        ["fresh", "only-local", "only-remote", "shared"]
    );
    assert_eq!(remote_live[3].quantity, 2);
    assert!(sync.with_local(|l| l.items(true)).unwrap().iter().all(|i| i.is_live()));
    assert!(sync.with_local(|l| l.pending()).unwrap().is_empty());
}

#[test]
fn failure_mid_queue_keeps_unprocessed_markers() {
    let remote = MemoryRemote::new();
    let mut local = MemoryCartStore::new();
    for (id, ts) in [("a", 1), ("b", 2), ("c", 3)] {
        local.stage_item(&item(id, 1, ts)).unwrap();
    }
    let sync = sync_with(local, &remote);

    sync.remote().fail_upserts_after(2);
    assert!(sync.reconcile().is_err());
    assert_eq!(sync.with_local(|l| l.pending()).unwrap(), ["c"]);
    assert_eq!(remote.snapshot(USER).len(), 2);

    sync.remote().heal();
    let report = sync.reconcile().unwrap();
    assert_eq!(report.pushed, 1);
    assert!(sync.with_local(|l| l.pending()).unwrap().is_empty());
    assert_eq!(sync.remote().upsert_count(), 3);
    assert_eq!(remote.snapshot(USER).len(), 3);
}

#[test]
fn failure_after_queue_drain_is_retried_without_duplicates() {
    let remote = MemoryRemote::new();
    remote.upsert(USER, &item("r", 1, 1)).unwrap();

    let mut local = MemoryCartStore::new();
    local.stage_item(&item("a", 1, 10)).unwrap();
    local.stage_item(&tombstone("gone", 10)).unwrap();
    let sync = sync_with(local, &remote);

    sync.remote().fail_fetch(true);
    assert!(sync.reconcile().is_err());
    assert!(sync.with_local(|l| l.pending()).unwrap().is_empty());
    assert_eq!(sync.remote().upsert_count(), 1);
    assert_eq!(sync.remote().delete_count(), 1);
    // The pull never happened.
    assert_eq!(sync.current(), vec![item("a", 1, 10)]);

    sync.remote().heal();
    let report = sync.reconcile().unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.remote_deleted, 0);
    assert_eq!(report.pulled, 1);
    assert_eq!(sync.remote().upsert_count(), 1);
    assert_eq!(sync.remote().delete_count(), 1);
    assert_eq!(live(remote.snapshot(USER)), sync.current());
}

#[test]
fn remote_tombstones_are_cleaned_up_on_both_sides() {
    let remote = MemoryRemote::new();
    remote.upsert(USER, &tombstone("a", 20)).unwrap();
    remote.upsert(USER, &tombstone("b", 5)).unwrap();

    let mut local = MemoryCartStore::new();
    local.save_item(&item("a", 1, 10)).unwrap();
    let sync = sync_with(local, &remote);

    let report = sync.reconcile().unwrap();
    assert_eq!(report.remote_deleted, 2);
    assert!(remote.snapshot(USER).is_empty());
    assert!(sync.with_local(|l| l.items(true)).unwrap().is_empty());
    assert!(sync.current().is_empty());

    let again = sync.reconcile().unwrap();
    assert_eq!((again.pulled, again.pushed, again.remote_deleted), (0, 0, 0));
}

/// Remote whose first upsert also edits the local database through a
/// second connection, as another writer on the device would.
struct EditingRemote {
    inner: MemoryRemote,
    db: PathBuf,
    edit: Mutex<Option<CartItem>>,
}

impl RemoteCartStore for EditingRemote {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<CartItem>> {
        self.inner.fetch_all(user_id)
    }

    fn upsert(&self, user_id: &str, item: &CartItem) -> Result<()> {
        self.inner.upsert(user_id, item)?;
        if let Some(newer) = self.edit.lock().unwrap().take() {
            SqliteCartStore::open(&self.db)?.save_item(&newer)?;
        }
        Ok(())
    }

    fn delete(&self, user_id: &str, product_id: &str) -> Result<()> {
        self.inner.delete(user_id, product_id)
    }
}

fn editing_sync(
    dir: &tempfile::TempDir,
    remote: &MemoryRemote,
) -> CartSync<SqliteCartStore, EditingRemote> {
    let db = dir.path().join("cart.db");
    let mut local = SqliteCartStore::open(&db).unwrap();
    local.stage_item(&item("a", 1, 10)).unwrap();
    let editing = EditingRemote {
        inner: remote.clone(),
        db,
        edit: Mutex::new(Some(item("a", 5, 20))),
    };
    CartSync::new(USER, local, editing).unwrap()
}

#[test]
fn edit_during_upsert_keeps_the_marker() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryRemote::new();
    let sync = editing_sync(&dir, &remote).with_max_passes(1);

    let report = sync.reconcile().unwrap();
    assert_eq!(report.passes, 1);
    assert_eq!(sync.with_local(|l| l.pending()).unwrap(), ["a"]);

    sync.reconcile().unwrap();
    assert!(sync.with_local(|l| l.pending()).unwrap().is_empty());
    assert_eq!(remote.snapshot(USER), vec![item("a", 5, 20)]);
}

#[test]
fn edit_during_upsert_is_pushed_by_the_extra_pass() {
    let dir = tempfile::tempdir().unwrap();
    let remote = MemoryRemote::new();
    let sync = editing_sync(&dir, &remote);

    let report = sync.reconcile().unwrap();
    assert_eq!(report.passes, 2);
    assert!(sync.with_local(|l| l.pending()).unwrap().is_empty());
    assert_eq!(remote.snapshot(USER), vec![item("a", 5, 20)]);
    assert_eq!(sync.current(), vec![item("a", 5, 20)]);
}

/// Remote whose first fetch parks until the test lets it go.
struct GatedRemote {
    inner: MemoryRemote,
    armed: AtomicBool,
    entered: Barrier,
    release: Barrier,
}

impl RemoteCartStore for GatedRemote {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<CartItem>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
        self.inner.fetch_all(user_id)
    }

    fn upsert(&self, user_id: &str, item: &CartItem) -> Result<()> {
        self.inner.upsert(user_id, item)
    }

    fn delete(&self, user_id: &str, product_id: &str) -> Result<()> {
        self.inner.delete(user_id, product_id)
    }
}

#[test]
fn trigger_during_a_pass_gets_one_more_pass() {
    let remote = MemoryRemote::new();
    let mut local = MemoryCartStore::new();
    local.stage_item(&item("a", 1, 10)).unwrap();
    let gated = GatedRemote {
        inner: remote.clone(),
        armed: AtomicBool::new(true),
        entered: Barrier::new(2),
        release: Barrier::new(2),
    };
    let sync = CartSync::new(USER, local, gated).unwrap();

    std::thread::scope(|s| {
        let running = s.spawn(|| sync.reconcile());
        sync.remote().entered.wait();

        sync.with_local(|l| l.stage_item(&item("b", 1, 20))).unwrap();
        let second = sync.reconcile().unwrap();
        assert_eq!(second.skipped, Some(SkipReason::InProgress));

        sync.remote().release.wait();
        let report = running.join().unwrap().unwrap();
        assert_eq!(report.passes, 2);
    });

    assert!(sync.with_local(|l| l.pending()).unwrap().is_empty());
    assert_eq!(remote.snapshot(USER), vec![item("a", 1, 10), item("b", 1, 20)]);
}
