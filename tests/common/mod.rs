//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use cart_sync::{CartItem, CartSyncError, MemoryRemote, RemoteCartStore, Result};

pub const USER: &str = "u1";

pub fn item(id: &str, qty: u32, ts: i64) -> CartItem {
    CartItem {
        product_id: id.to_string(),
        name: format!("product {id}"),
        price: 2.0,
        image: format!("{id}.png"),
        quantity: qty,
        updated_at: ts,
        deleted: false,
    }
}

pub fn tombstone(id: &str, ts: i64) -> CartItem {
    CartItem {
        deleted: true,
        ..item(id, 1, ts)
    }
}

/// Remote that counts successful writes and fails on demand.
pub struct FlakyRemote {
    pub inner: MemoryRemote,
    pub upserts: AtomicU32,
    pub deletes: AtomicU32,
    /// Upserts still allowed before failing; negative means unlimited.
    upsert_budget: AtomicI64,
    fail_fetch: AtomicBool,
}

impl FlakyRemote {
    pub fn new(inner: MemoryRemote) -> Self {
        Self {
            inner,
            upserts: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
            upsert_budget: AtomicI64::new(-1),
            fail_fetch: AtomicBool::new(false),
        }
    }

    pub fn fail_upserts_after(&self, allowed: i64) {
        self.upsert_budget.store(allowed, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_upserts_after(-1);
        self.fail_fetch(false);
    }

    pub fn upsert_count(&self) -> u32 {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl RemoteCartStore for FlakyRemote {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<CartItem>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(CartSyncError::remote("fetch unavailable"));
        }
        self.inner.fetch_all(user_id)
    }

    fn upsert(&self, user_id: &str, item: &CartItem) -> Result<()> {
        let budget = self.upsert_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(CartSyncError::remote("upsert unavailable"));
        }
        if budget > 0 {
            self.upsert_budget.store(budget - 1, Ordering::SeqCst);
        }
        self.inner.upsert(user_id, item)?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, user_id: &str, product_id: &str) -> Result<()> {
        self.inner.delete(user_id, product_id)?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Live items, ordered by product id.
pub fn live(items: Vec<CartItem>) -> Vec<CartItem> {
    let mut out: Vec<_> = items.into_iter().filter(CartItem::is_live).collect();
    out.sort_by(|a, b| a.product_id.cmp(&b.product_id));
    out
}
