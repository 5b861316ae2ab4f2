//! Cart operations for one signed-in user.
//!
//! Every change is written locally first as a pending item, published to
//! subscribers, and then reconciled with the remote collection when the
//! device is online.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{CartConfig, SyncConfig};
use crate::connectivity::{NetworkStatus, SyncTrigger};
use crate::error::{CartSyncError, Result};
use crate::item::{CartItem, Product, cart_total};
use crate::remote::RemoteCartStore;
use crate::store::{LocalCartStore, SqliteCartStore};
use crate::sync::{CartSync, SkipReason, SyncReport};

/// Result of feeding a realtime remote snapshot to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Local changes are still queued; the snapshot was ignored.
    Deferred { pending: usize },
    /// The local cart now mirrors the snapshot.
    Applied { items: usize },
}

pub struct CartRepository<L, R> {
    sync: CartSync<L, R>,
    network: Arc<dyn NetworkStatus>,
    clock: Arc<dyn Clock>,
    sync_on_mutation: bool,
}

impl<R: RemoteCartStore> CartRepository<SqliteCartStore, R> {
    /// Open the SQLite cart of `user_id` under the configured data dir.
    pub fn open(
        config: &CartConfig,
        user_id: &str,
        remote: R,
        network: Arc<dyn NetworkStatus>,
    ) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            let listed: Vec<String> = problems.iter().map(ToString::to_string).collect();
            return Err(CartSyncError::validation(format!(
                "invalid cart config: {}",
                listed.join("; ")
            )));
        }
        if user_id.is_empty()
            || user_id.contains(['/', '\\'])
            || user_id == "."
            || user_id == ".."
        {
            return Err(CartSyncError::validation(format!(
                "user id not usable as a file name: {user_id:?}"
            )));
        }
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let store = SqliteCartStore::open(config.database_path(user_id))?;

        let repo = Self::new(user_id, store, remote, network, Arc::new(SystemClock))?
            .with_settings(&config.sync);
        info!(user = %user_id, items = repo.items().len(), "cart session opened");

        if config.sync.sync_on_open {
            repo.sync_logged();
        }
        Ok(repo)
    }
}

impl<L: LocalCartStore, R: RemoteCartStore> CartRepository<L, R> {
    pub fn new(
        user_id: impl Into<String>,
        local: L,
        remote: R,
        network: Arc<dyn NetworkStatus>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            sync: CartSync::new(user_id, local, remote)?,
            network,
            clock,
            sync_on_mutation: true,
        })
    }

    pub fn with_settings(mut self, settings: &SyncConfig) -> Self {
        self.sync = self.sync.with_max_passes(settings.max_passes);
        self.sync_on_mutation = settings.sync_on_mutation;
        self
    }

    pub fn user_id(&self) -> &str {
        self.sync.user_id()
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// The visible cart (no tombstones).
    pub fn items(&self) -> Vec<CartItem> {
        self.sync.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<CartItem>> {
        self.sync.subscribe()
    }

    pub fn total(&self) -> f64 {
        cart_total(&self.items())
    }

    /// Product ids whose local state is not yet confirmed remotely.
    pub fn pending(&self) -> Result<Vec<String>> {
        self.sync.with_local(|l| l.pending())
    }

    /// Timestamp for a new local version, strictly after `previous`.
    fn stamp(&self, previous: Option<i64>) -> i64 {
        let now = self.clock.now_ms();
        match previous {
            Some(prev) if prev >= now => prev + 1,
            _ => now,
        }
    }

    /// Add one unit of `product`, creating the line if needed.
    ///
    /// A tombstoned line for the same product is revived at quantity 1
    /// rather than continuing its old count. The quantity saturates at
    /// `u32::MAX`.
    pub fn add_to_cart(&self, product: &Product) -> Result<CartItem> {
        let now = self.clock.now_ms();
        let fresh = CartItem::from_product(product, now)
            .ok_or_else(|| CartSyncError::validation("product id is missing"))?;

        let item = self.sync.with_local(|l| {
            let item = match l.item(&fresh.product_id)? {
                Some(mut existing) if existing.is_live() => {
                    existing.quantity = existing.quantity.saturating_add(1);
                    existing.updated_at = self.stamp(Some(existing.updated_at));
                    existing
                }
                Some(tomb) => CartItem {
                    updated_at: self.stamp(Some(tomb.updated_at)),
                    ..fresh
                },
                None => fresh,
            };
            l.stage_item(&item)?;
            Ok(item)
        })?;
        debug!(product = %item.product_id, quantity = item.quantity, "added to cart");

        self.sync.publish()?;
        self.after_mutation();
        Ok(item)
    }

    /// Tombstone the line for `product_id`. Returns `false` if there was
    /// no live line.
    pub fn remove_item(&self, product_id: &str) -> Result<bool> {
        let removed = self.sync.with_local(|l| match l.item(product_id)? {
            Some(mut item) if item.is_live() => {
                let ts = self.stamp(Some(item.updated_at));
                item.tombstone(ts);
                l.stage_item(&item)?;
                Ok(true)
            }
            _ => Ok(false),
        })?;
        if !removed {
            return Ok(false);
        }
        debug!(product = %product_id, "removed from cart");

        self.sync.publish()?;
        self.after_mutation();
        Ok(true)
    }

    /// Tombstone every live line. Returns how many were removed.
    pub fn clear_cart(&self) -> Result<usize> {
        let count = self.sync.with_local(|l| {
            let live = l.items(false)?;
            for mut item in live.iter().cloned() {
                let ts = self.stamp(Some(item.updated_at));
                item.tombstone(ts);
                l.stage_item(&item)?;
            }
            Ok(live.len())
        })?;
        debug!(count, "cart cleared");

        self.sync.publish_items(Vec::new());
        if count > 0 {
            self.after_mutation();
        }
        Ok(count)
    }

    /// Buy the current cart: needs connectivity, returns the purchased
    /// lines and empties the cart.
    pub fn checkout(&self) -> Result<Vec<CartItem>> {
        if !self.is_online() {
            return Err(CartSyncError::Offline);
        }
        let purchased = self.sync.with_local(|l| l.items(false))?;
        self.clear_cart()?;
        info!(
            user = %self.user_id(),
            lines = purchased.len(),
            total = cart_total(&purchased),
            "checkout completed"
        );
        Ok(purchased)
    }

    /// Reconcile now, or report `Offline` without touching anything.
    pub fn sync(&self) -> Result<SyncReport> {
        if !self.is_online() {
            debug!(user = %self.user_id(), "offline, sync deferred");
            return Ok(SyncReport::skipped(SkipReason::Offline));
        }
        self.sync.reconcile()
    }

    /// React to a connectivity or lifecycle event from the host.
    pub fn handle_trigger(&self, trigger: SyncTrigger) -> Result<SyncReport> {
        match trigger {
            SyncTrigger::ConnectivityLost => Ok(SyncReport::skipped(SkipReason::Offline)),
            SyncTrigger::ConnectivityRestored | SyncTrigger::Foreground => {
                debug!(?trigger, "sync triggered");
                self.sync()
            }
        }
    }

    /// Apply a realtime snapshot of the remote collection.
    ///
    /// While local changes are queued the snapshot is ignored; the next
    /// reconciliation pass merges them. Otherwise the local cart becomes an
    /// exact copy of the remote live items.
    pub fn apply_remote_snapshot(&self, items: Vec<CartItem>) -> Result<SnapshotOutcome> {
        let outcome = self.sync.with_local(|l| {
            let pending = l.pending()?;
            if !pending.is_empty() {
                return Ok(SnapshotOutcome::Deferred {
                    pending: pending.len(),
                });
            }

            let live: Vec<&CartItem> = items.iter().filter(|i| i.is_live()).collect();
            let ids: BTreeSet<&str> = live.iter().map(|i| i.product_id.as_str()).collect();
            for item in &live {
                l.save_item(item)?;
            }
            for local in l.items(true)? {
                if !ids.contains(local.product_id.as_str()) {
                    l.remove_item(&local.product_id)?;
                }
            }
            Ok(SnapshotOutcome::Applied { items: live.len() })
        })?;

        match outcome {
            SnapshotOutcome::Deferred { pending } => {
                debug!(pending, "pending changes, remote snapshot ignored");
            }
            SnapshotOutcome::Applied { items } => {
                self.sync.publish()?;
                debug!(items, "remote snapshot applied");
            }
        }
        Ok(outcome)
    }

    /// End the session (sign-out): subscribers see an empty cart.
    pub fn close(self) {
        self.sync.publish_items(Vec::new());
        info!(user = %self.sync.user_id(), "cart session closed");
    }

    fn after_mutation(&self) {
        if self.sync_on_mutation && self.is_online() {
            self.sync_logged();
        }
    }

    fn sync_logged(&self) {
        if let Err(err) = self.sync() {
            warn!(user = %self.user_id(), error = %err, "cart sync deferred to next trigger");
        }
    }
}
