use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{CartSyncError, Result};
use crate::item::CartItem;

/// The multi-device source of truth: one item collection per user
/// (`carts/{user_id}/items/{product_id}` in the hosted document store).
///
/// `upsert` and `delete` must be idempotent by product id.
pub trait RemoteCartStore: Send + Sync {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<CartItem>>;
    fn upsert(&self, user_id: &str, item: &CartItem) -> Result<()>;
    fn delete(&self, user_id: &str, product_id: &str) -> Result<()>;
}

impl<R: RemoteCartStore + ?Sized> RemoteCartStore for Arc<R> {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<CartItem>> {
        (**self).fetch_all(user_id)
    }

    fn upsert(&self, user_id: &str, item: &CartItem) -> Result<()> {
        (**self).upsert(user_id, item)
    }

    fn delete(&self, user_id: &str, product_id: &str) -> Result<()> {
        (**self).delete(user_id, product_id)
    }
}

type Collections = HashMap<String, BTreeMap<String, CartItem>>;

/// In-process remote collection. Clones share the same data, so several
/// repositories can play separate devices of one user.
#[derive(Debug, Default, Clone)]
pub struct MemoryRemote {
    carts: Arc<Mutex<Collections>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>> {
        self.carts
            .lock()
            .map_err(|_| CartSyncError::remote("remote collection lock poisoned"))
    }

    /// Documents stored for `user_id`, ordered by product id.
    pub fn snapshot(&self, user_id: &str) -> Vec<CartItem> {
        self.lock()
            .map(|carts| {
                carts
                    .get(user_id)
                    .map(|items| items.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl RemoteCartStore for MemoryRemote {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<CartItem>> {
        Ok(self.snapshot(user_id))
    }

    fn upsert(&self, user_id: &str, item: &CartItem) -> Result<()> {
        self.lock()?
            .entry(user_id.to_string())
            .or_default()
            .insert(item.product_id.clone(), item.clone());
        Ok(())
    }

    fn delete(&self, user_id: &str, product_id: &str) -> Result<()> {
        if let Some(items) = self.lock()?.get_mut(user_id) {
            items.remove(product_id);
        }
        Ok(())
    }
}
