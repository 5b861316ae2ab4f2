//! Last-write-wins decisions between a local and a remote cart.
//!
//! Everything here is pure: [`plan`] looks at two snapshots and says what
//! has to move in which direction. Applying the plan is the job of
//! [`crate::sync::CartSync`].

use std::collections::BTreeMap;

use crate::item::CartItem;

/// True when `remote` should overwrite the local copy. Ties keep local.
pub fn remote_wins(local: Option<&CartItem>, remote: &CartItem) -> bool {
    match local {
        None => true,
        Some(local) => remote.updated_at > local.updated_at,
    }
}

/// True when `local` is absent remotely or newer than the remote copy.
pub fn local_wins(local: &CartItem, remote: Option<&CartItem>) -> bool {
    match remote {
        None => true,
        Some(remote) => local.updated_at > remote.updated_at,
    }
}

/// The copy that survives a conflict.
pub fn resolve<'a>(local: &'a CartItem, remote: &'a CartItem) -> &'a CartItem {
    if remote_wins(Some(local), remote) {
        remote
    } else {
        local
    }
}

/// What a reconciliation pass must do after the pending queue is drained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// Remote items to write into the local store.
    pub pull: Vec<CartItem>,
    /// Live local items to upsert remotely.
    pub push: Vec<CartItem>,
    /// Tombstones that won against the remote copy (local and newer, or
    /// pulled from a remote tombstone): delete remotely, then locally.
    pub purge_remote: Vec<CartItem>,
    /// Local tombstones with no remote copy left: remove locally.
    pub drop_local: Vec<CartItem>,
    /// Merged live cart, ordered by product id.
    pub merged: Vec<CartItem>,
}

impl MergePlan {
    pub fn is_noop(&self) -> bool {
        self.pull.is_empty()
            && self.push.is_empty()
            && self.purge_remote.is_empty()
            && self.drop_local.is_empty()
    }
}

/// Compare full local (tombstones included) and remote snapshots.
pub fn plan(local: &[CartItem], remote: &[CartItem]) -> MergePlan {
    let remote_map: BTreeMap<&str, &CartItem> =
        remote.iter().map(|i| (i.product_id.as_str(), i)).collect();
    let mut merged: BTreeMap<String, CartItem> = local
        .iter()
        .map(|i| (i.product_id.clone(), i.clone()))
        .collect();

    let mut out = MergePlan::default();

    for (id, remote_item) in &remote_map {
        if remote_wins(merged.get(*id), remote_item) {
            out.pull.push((*remote_item).clone());
            merged.insert((*id).to_string(), (*remote_item).clone());
        }
    }

    for (id, item) in &merged {
        let remote_item = remote_map.get(id.as_str()).copied();
        if !local_wins(item, remote_item) {
            // A remote tombstone that won (or matches ours) is cleaned up
            // on both sides like a local one.
            if item.deleted && remote_item.is_some_and(|r| r.deleted) {
                out.purge_remote.push(item.clone());
            }
            continue;
        }
        match (item.deleted, remote_item) {
            (false, _) => out.push.push(item.clone()),
            (true, Some(_)) => out.purge_remote.push(item.clone()),
            (true, None) => out.drop_local.push(item.clone()),
        }
    }

    out.merged = merged.into_values().filter(CartItem::is_live).collect();
    out
}
