//! Reconciliation between the local cart and the remote collection.
//!
//! A pass runs in five steps:
//!
//! 1. Drain the pending queue: tombstones are deleted remotely and then
//!    locally, live items are upserted. A marker is cleared only once its
//!    remote write succeeded.
//! 2. Fetch the full remote item set.
//! 3. Pull remote items that are missing locally or newer.
//! 4. Push live local items that are missing remotely or newer.
//! 5. Publish the merged live cart.
//!
//! Any failure aborts the pass. Markers cleared before the failure stay
//! cleared, the rest stay queued for the next trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, TryLockError};

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{CartSyncError, Result};
use crate::item::CartItem;
use crate::merge::{self, MergePlan};
use crate::remote::RemoteCartStore;
use crate::store::LocalCartStore;

pub const DEFAULT_MAX_PASSES: u32 = 3;

/// Why a call to [`CartSync::reconcile`] did no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No connectivity; the pending queue waits for the next trigger.
    Offline,
    /// Another pass was running; it will run once more when it finishes.
    InProgress,
}

/// Counters for one `reconcile` call (possibly several coalesced passes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: u32,
    pub remote_deleted: u32,
    pub pulled: u32,
    pub dropped_tombstones: u32,
    pub passes: u32,
    pub skipped: Option<SkipReason>,
}

impl SyncReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Owns one user's local store and drives reconciliation against `R`.
pub struct CartSync<L, R> {
    user_id: String,
    local: Mutex<L>,
    remote: R,
    state: watch::Sender<Vec<CartItem>>,
    pass_lock: Mutex<()>,
    rerun: AtomicBool,
    max_passes: u32,
}

impl<L: LocalCartStore, R: RemoteCartStore> CartSync<L, R> {
    /// Bind `local` and `remote` for `user_id` and publish the stored cart.
    pub fn new(user_id: impl Into<String>, local: L, remote: R) -> Result<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(CartSyncError::validation("user id is empty"));
        }
        let initial = local.items(false)?;
        let (state, _) = watch::channel(initial);
        Ok(Self {
            user_id,
            local: Mutex::new(local),
            remote,
            state,
            pass_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
            max_passes: DEFAULT_MAX_PASSES,
        })
    }

    /// Cap on coalesced passes per `reconcile` call (at least one).
    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Watch the visible (non-tombstoned) cart.
    pub fn subscribe(&self) -> watch::Receiver<Vec<CartItem>> {
        self.state.subscribe()
    }

    /// Last published cart.
    pub fn current(&self) -> Vec<CartItem> {
        self.state.borrow().clone()
    }

    /// Run `f` with exclusive access to the local store.
    pub fn with_local<T>(&self, f: impl FnOnce(&mut L) -> Result<T>) -> Result<T> {
        let mut local = self
            .local
            .lock()
            .map_err(|_| CartSyncError::State("local cart store lock poisoned"))?;
        f(&mut *local)
    }

    /// Re-read the live items from the local store and publish them.
    pub fn publish(&self) -> Result<Vec<CartItem>> {
        let items = self.with_local(|l| l.items(false))?;
        self.publish_items(items.clone());
        Ok(items)
    }

    pub fn publish_items(&self, items: Vec<CartItem>) {
        debug_assert!(items.iter().all(CartItem::is_live));
        self.state.send_replace(items);
    }

    /// Ask the running pass (if any) to go round once more.
    pub fn request_rerun(&self) {
        self.rerun.store(true, Ordering::SeqCst);
    }

    /// Run reconciliation. At most one pass runs at a time; a call that
    /// finds a pass in flight returns at once and the running call does
    /// one more pass when it finishes.
    pub fn reconcile(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut handed_off = false;
        loop {
            let guard = match self.pass_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) if !handed_off => {
                    // The holder may release before reading the flag, so
                    // look once more after raising it.
                    self.request_rerun();
                    handed_off = true;
                    continue;
                }
                Err(TryLockError::WouldBlock) if report.passes == 0 => {
                    debug!(user = %self.user_id, "cart sync already running, coalescing");
                    return Ok(SyncReport::skipped(SkipReason::InProgress));
                }
                Err(TryLockError::WouldBlock) => break,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };

            self.rerun.store(false, Ordering::SeqCst);
            let outcome = self.run_pass(&mut report);
            drop(guard);
            if let Err(err) = outcome {
                error!(user = %self.user_id, error = %err, "cart sync failed");
                return Err(err);
            }
            report.passes += 1;

            // Read after the release: a trigger that lost the race for the
            // lock has raised the flag by now.
            if !self.rerun.load(Ordering::SeqCst) {
                break;
            }
            if report.passes >= self.max_passes {
                debug!(
                    user = %self.user_id,
                    passes = report.passes,
                    "pass limit reached, leftovers wait for the next trigger"
                );
                break;
            }
            handed_off = false;
        }

        info!(
            user = %self.user_id,
            pushed = report.pushed,
            remote_deleted = report.remote_deleted,
            pulled = report.pulled,
            dropped = report.dropped_tombstones,
            passes = report.passes,
            "cart reconciled"
        );
        Ok(report)
    }

    fn run_pass(&self, report: &mut SyncReport) -> Result<()> {
        self.drain_pending(report)?;

        let remote_items = self.remote.fetch_all(&self.user_id)?;
        let local_items = self.with_local(|l| l.items(true))?;
        let plan = merge::plan(&local_items, &remote_items);
        debug!(
            user = %self.user_id,
            local = local_items.len(),
            remote = remote_items.len(),
            pull = plan.pull.len(),
            push = plan.push.len(),
            "merge planned"
        );
        if plan.is_noop() {
            debug!(user = %self.user_id, "local and remote already agree");
        } else {
            self.apply_plan(plan, report)?;
        }

        self.publish()?;
        Ok(())
    }

    fn drain_pending(&self, report: &mut SyncReport) -> Result<()> {
        let pending = self.with_local(|l| l.pending())?;
        for id in pending {
            let item = self.with_local(|l| match l.item(&id)? {
                Some(item) => Ok(Some(item)),
                None => {
                    // Nothing left to propagate.
                    l.clear_pending(&id)?;
                    Ok(None)
                }
            })?;
            match item {
                None => debug!(product = %id, "pending marker without item cleared"),
                Some(item) if item.deleted => {
                    self.remote.delete(&self.user_id, &id)?;
                    self.settle(&item, |l| {
                        l.remove_item(&id)?;
                        l.clear_pending(&id)
                    })?;
                    report.remote_deleted += 1;
                    debug!(product = %id, "tombstone propagated");
                }
                Some(item) => {
                    self.remote.upsert(&self.user_id, &item)?;
                    self.settle(&item, |l| l.clear_pending(&id))?;
                    report.pushed += 1;
                    debug!(product = %id, quantity = item.quantity, "pending item pushed");
                }
            }
        }
        Ok(())
    }

    fn apply_plan(&self, plan: MergePlan, report: &mut SyncReport) -> Result<()> {
        for remote_item in plan.pull {
            let applied = self.with_local(|l| {
                let current = l.item(&remote_item.product_id)?;
                if merge::remote_wins(current.as_ref(), &remote_item) {
                    l.save_item(&remote_item)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            })?;
            if applied {
                report.pulled += 1;
                debug!(product = %remote_item.product_id, "remote item pulled");
            }
        }

        for item in plan.push {
            self.remote.upsert(&self.user_id, &item)?;
            report.pushed += 1;
            debug!(product = %item.product_id, "local item pushed");
        }

        for tomb in plan.purge_remote {
            self.remote.delete(&self.user_id, &tomb.product_id)?;
            self.settle(&tomb, |l| {
                l.remove_item(&tomb.product_id)?;
                l.clear_pending(&tomb.product_id)
            })?;
            report.remote_deleted += 1;
            debug!(product = %tomb.product_id, "stale remote copy deleted");
        }

        for tomb in plan.drop_local {
            self.settle(&tomb, |l| l.remove_item(&tomb.product_id))?;
            report.dropped_tombstones += 1;
        }
        Ok(())
    }

    /// Run `f` only if the local copy is still exactly the one that was
    /// sent. A local edit made meanwhile keeps its marker for the next pass.
    fn settle(&self, sent: &CartItem, f: impl FnOnce(&mut L) -> Result<()>) -> Result<()> {
        self.with_local(|l| {
            let unchanged = l
                .item(&sent.product_id)?
                .is_some_and(|cur| cur.updated_at == sent.updated_at && cur.deleted == sent.deleted);
            if unchanged {
                f(l)
            } else {
                debug!(product = %sent.product_id, "item changed during sync, keeping marker");
                self.request_rerun();
                Ok(())
            }
        })
    }
}
