use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::error::{CartSyncError, Result};
use crate::item::CartItem;

/// On-device snapshot of a user's cart plus the pending-operations set.
///
/// Tombstoned items are kept until their deletion is confirmed remotely.
pub trait LocalCartStore: Send {
    fn items(&self, include_deleted: bool) -> Result<Vec<CartItem>>;
    fn item(&self, product_id: &str) -> Result<Option<CartItem>>;
    fn save_item(&mut self, item: &CartItem) -> Result<()>;
    /// Save `item` and mark it pending in one step.
    fn stage_item(&mut self, item: &CartItem) -> Result<()>;
    fn remove_item(&mut self, product_id: &str) -> Result<()>;
    /// Drop every item and pending marker.
    fn clear(&mut self) -> Result<()>;

    fn add_pending(&mut self, product_id: &str) -> Result<()>;
    fn pending(&self) -> Result<Vec<String>>;
    fn clear_pending(&mut self, product_id: &str) -> Result<()>;
}

const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed store, one database per user.
pub struct SqliteCartStore {
    conn: Connection,
}

impl SqliteCartStore {
    /// Open (or create) the database at `path` and make sure the tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened cart database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create the cart tables. Safe to call multiple times.
    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS items (
product_id TEXT PRIMARY KEY,
name TEXT NOT NULL,
price REAL NOT NULL,
image TEXT NOT NULL,
quantity INTEGER NOT NULL,
updated_at INTEGER NOT NULL,
deleted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pending_sync (
product_id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS sync_kv (
k TEXT PRIMARY KEY,
v TEXT NOT NULL
);
"#,
        )?;
        self.conn.execute(
            "INSERT INTO sync_kv(k,v) VALUES('schema_version',?1)
ON CONFLICT(k) DO NOTHING",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        let ver: Option<String> = self
            .conn
            .query_row("SELECT v FROM sync_kv WHERE k='schema_version'", [], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(ver.and_then(|s| s.parse::<i32>().ok()).unwrap_or(SCHEMA_VERSION))
    }

    /// Advance the stored schema version to `target_version`.
    ///
    /// Version 1 is the only layout so far; later steps go here.
    pub fn run_migrations(&self, target_version: i32) -> Result<()> {
        if target_version < 1 {
            return Err(CartSyncError::State("invalid target_version"));
        }
        let current = self.schema_version()?;
        if current >= target_version {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO sync_kv(k,v) VALUES('schema_version',?1)
ON CONFLICT(k) DO UPDATE SET v=excluded.v",
            params![target_version.to_string()],
        )?;
        tx.commit()?;
        debug!(from = current, to = target_version, "cart schema migrated");
        Ok(())
    }

    fn row_to_item(r: &Row<'_>) -> rusqlite::Result<CartItem> {
        Ok(CartItem {
            product_id: r.get(0)?,
            name: r.get(1)?,
            price: r.get(2)?,
            image: r.get(3)?,
            quantity: r.get(4)?,
            updated_at: r.get(5)?,
            deleted: r.get::<_, i64>(6)? != 0,
        })
    }

    fn upsert_row(conn: &Connection, item: &CartItem) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO items (product_id,name,price,image,quantity,updated_at,deleted)
VALUES (?1,?2,?3,?4,?5,?6,?7)
ON CONFLICT(product_id) DO UPDATE SET
name=excluded.name, price=excluded.price, image=excluded.image,
quantity=excluded.quantity, updated_at=excluded.updated_at, deleted=excluded.deleted",
            params![
                item.product_id,
                item.name,
                item.price,
                item.image,
                item.quantity,
                item.updated_at,
                item.deleted as i64,
            ],
        )
    }
}

impl LocalCartStore for SqliteCartStore {
    fn items(&self, include_deleted: bool) -> Result<Vec<CartItem>> {
        let sql = if include_deleted {
            "SELECT product_id,name,price,image,quantity,updated_at,deleted
FROM items ORDER BY product_id"
        } else {
            "SELECT product_id,name,price,image,quantity,updated_at,deleted
FROM items WHERE deleted = 0 ORDER BY product_id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], Self::row_to_item)?;

        let mut out = Vec::new();
        for item in rows {
            out.push(item?);
        }
        Ok(out)
    }

    fn item(&self, product_id: &str) -> Result<Option<CartItem>> {
        let item = self
            .conn
            .query_row(
                "SELECT product_id,name,price,image,quantity,updated_at,deleted
FROM items WHERE product_id=?1",
                params![product_id],
                Self::row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    fn save_item(&mut self, item: &CartItem) -> Result<()> {
        Self::upsert_row(&self.conn, item)?;
        Ok(())
    }

    fn stage_item(&mut self, item: &CartItem) -> Result<()> {
        let tx = self.conn.transaction()?;
        Self::upsert_row(&tx, item)?;
        tx.execute(
            "INSERT OR IGNORE INTO pending_sync (product_id) VALUES (?1)",
            params![item.product_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove_item(&mut self, product_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM items WHERE product_id=?1", params![product_id])?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM items", [])?;
        tx.execute("DELETE FROM pending_sync", [])?;
        tx.commit()?;
        Ok(())
    }

    fn add_pending(&mut self, product_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO pending_sync (product_id) VALUES (?1)",
            params![product_id],
        )?;
        Ok(())
    }

    fn pending(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT product_id FROM pending_sync ORDER BY product_id")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;

        let mut out = Vec::new();
        for id in rows {
            out.push(id?);
        }
        Ok(out)
    }

    fn clear_pending(&mut self, product_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_sync WHERE product_id=?1",
            params![product_id],
        )?;
        Ok(())
    }
}

/// Key-value flavoured store kept entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryCartStore {
    items: BTreeMap<String, CartItem>,
    pending: BTreeSet<String>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCartStore for MemoryCartStore {
    fn items(&self, include_deleted: bool) -> Result<Vec<CartItem>> {
        Ok(self
            .items
            .values()
            .filter(|i| include_deleted || i.is_live())
            .cloned()
            .collect())
    }

    fn item(&self, product_id: &str) -> Result<Option<CartItem>> {
        Ok(self.items.get(product_id).cloned())
    }

    fn save_item(&mut self, item: &CartItem) -> Result<()> {
        self.items.insert(item.product_id.clone(), item.clone());
        Ok(())
    }

    fn stage_item(&mut self, item: &CartItem) -> Result<()> {
        self.save_item(item)?;
        self.add_pending(&item.product_id)
    }

    fn remove_item(&mut self, product_id: &str) -> Result<()> {
        self.items.remove(product_id);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.items.clear();
        self.pending.clear();
        Ok(())
    }

    fn add_pending(&mut self, product_id: &str) -> Result<()> {
        self.pending.insert(product_id.to_string());
        Ok(())
    }

    fn pending(&self) -> Result<Vec<String>> {
        Ok(self.pending.iter().cloned().collect())
    }

    fn clear_pending(&mut self, product_id: &str) -> Result<()> {
        self.pending.remove(product_id);
        Ok(())
    }
}
