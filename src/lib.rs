pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod ffi;
pub mod item;
pub mod logging;
pub mod merge;
pub mod remote;
pub mod repository;
pub mod store;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CartConfig;
pub use connectivity::{ConnectivityFlag, NetworkStatus, SyncTrigger};
pub use error::{CartSyncError, Result};
pub use item::{CartItem, Product, cart_total};
pub use remote::{MemoryRemote, RemoteCartStore};
pub use repository::{CartRepository, SnapshotOutcome};
pub use store::{LocalCartStore, MemoryCartStore, SqliteCartStore};
pub use sync::{CartSync, SkipReason, SyncReport};
