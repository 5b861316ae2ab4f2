//! C ABI for native hosts (Swift, Kotlin/JNI).
//!
//! The host keeps ownership of the hosted document database and hands it to
//! Rust as a table of callbacks. Return codes: `0` success, `1` operation
//! error, `2` null handle, `3` invalid argument.

use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CartConfig;
use crate::connectivity::{ConnectivityFlag, SyncTrigger};
use crate::error::{CartSyncError, Result};
use crate::item::{CartItem, Product};
use crate::remote::RemoteCartStore;
use crate::repository::CartRepository;
use crate::store::SqliteCartStore;

/// Returns a JSON array of cart items allocated by the host, or null on failure.
pub type CartFetchFn = extern "C" fn(ctx: *mut c_void, user_id: *const c_char) -> *mut c_char;
/// Upserts one JSON item. Returns 0 on success.
pub type CartUpsertFn =
    extern "C" fn(ctx: *mut c_void, user_id: *const c_char, item_json: *const c_char) -> c_int;
/// Deletes one item by product id. Returns 0 on success.
pub type CartDeleteFn =
    extern "C" fn(ctx: *mut c_void, user_id: *const c_char, product_id: *const c_char) -> c_int;
/// Releases a string returned by `fetch_all`.
pub type CartFreeFn = extern "C" fn(ctx: *mut c_void, s: *mut c_char);

/// Remote collection implemented by the host.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CartRemoteCallbacks {
    pub ctx: *mut c_void,
    pub fetch_all: Option<CartFetchFn>,
    pub upsert: Option<CartUpsertFn>,
    pub delete: Option<CartDeleteFn>,
    pub free_string: Option<CartFreeFn>,
}

/// [`RemoteCartStore`] that forwards to host callbacks.
pub struct FfiRemote {
    ctx: *mut c_void,
    fetch_all: CartFetchFn,
    upsert: CartUpsertFn,
    delete: CartDeleteFn,
    free_string: CartFreeFn,
}

// The host promises its callbacks and `ctx` may be used from any thread.
unsafe impl Send for FfiRemote {}
unsafe impl Sync for FfiRemote {}

impl FfiRemote {
    fn from_callbacks(cb: &CartRemoteCallbacks) -> Option<Self> {
        Some(Self {
            ctx: cb.ctx,
            fetch_all: cb.fetch_all?,
            upsert: cb.upsert?,
            delete: cb.delete?,
            free_string: cb.free_string?,
        })
    }
}

fn c_arg(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| CartSyncError::validation("interior NUL byte"))
}

impl RemoteCartStore for FfiRemote {
    fn fetch_all(&self, user_id: &str) -> Result<Vec<CartItem>> {
        let uid = c_arg(user_id)?;
        let raw = (self.fetch_all)(self.ctx, uid.as_ptr());
        if raw.is_null() {
            return Err(CartSyncError::remote("host fetch_all failed"));
        }
        let parsed = unsafe { CStr::from_ptr(raw) }
            .to_str()
            .map_err(|_| CartSyncError::remote("host fetch_all returned invalid UTF-8"))
            .and_then(|s| Ok(serde_json::from_str::<Vec<CartItem>>(s)?));
        (self.free_string)(self.ctx, raw);
        parsed
    }

    fn upsert(&self, user_id: &str, item: &CartItem) -> Result<()> {
        let uid = c_arg(user_id)?;
        let json = c_arg(&serde_json::to_string(item)?)?;
        match (self.upsert)(self.ctx, uid.as_ptr(), json.as_ptr()) {
            0 => Ok(()),
            code => Err(CartSyncError::remote(format!("host upsert failed ({code})"))),
        }
    }

    fn delete(&self, user_id: &str, product_id: &str) -> Result<()> {
        let uid = c_arg(user_id)?;
        let pid = c_arg(product_id)?;
        match (self.delete)(self.ctx, uid.as_ptr(), pid.as_ptr()) {
            0 => Ok(()),
            code => Err(CartSyncError::remote(format!("host delete failed ({code})"))),
        }
    }
}

/// Opaque handle owning one user's cart session.
/// Swift/Objective-C hold this as an unsafe pointer and pass it back to Rust APIs.
pub struct CartHandle {
    repo: CartRepository<SqliteCartStore, FfiRemote>,
    network: ConnectivityFlag,
}

fn ptr_to_str<'a>(ptr: *const c_char) -> std::result::Result<&'a str, ()> {
    if ptr.is_null() {
        return Err(());
    }
    unsafe { CStr::from_ptr(ptr).to_str().map_err(|_| ()) }
}

fn opt_ptr_to_str<'a>(ptr: *const c_char) -> std::result::Result<Option<&'a str>, ()> {
    if ptr.is_null() {
        return Ok(None);
    }
    Ok(Some(ptr_to_str(ptr)?))
}

fn to_cstring_ptr(s: &str) -> *mut c_char {
    CString::new(s)
        .map(|cs| cs.into_raw())
        .unwrap_or(std::ptr::null_mut())
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(err) => {
            warn!(error = %err, "cart ffi call failed");
            1
        }
    }
}

/// Free a C string returned by this library.
#[unsafe(no_mangle)]
pub extern "C" fn cart_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}

/// Install a log subscriber at `level` (null means "info").
/// Returns 0 when installed, 1 if one already existed.
#[unsafe(no_mangle)]
pub extern "C" fn cart_init_logging(level: *const c_char) -> c_int {
    let level = match opt_ptr_to_str(level) {
        Ok(l) => l.unwrap_or("info"),
        Err(_) => return 3,
    };
    if crate::logging::init(level) { 0 } else { 1 }
}

/// Open the cart of `user_id`. `config_path` may be null for defaults.
/// Installs a log subscriber at `logging.level` unless one exists.
/// Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn cart_open(
    config_path: *const c_char,
    user_id: *const c_char,
    online: c_int,
    callbacks: CartRemoteCallbacks,
) -> *mut CartHandle {
    let (config_path, user_id) = match (opt_ptr_to_str(config_path), ptr_to_str(user_id)) {
        (Ok(c), Ok(u)) => (c, u),
        _ => return std::ptr::null_mut(),
    };
    let Some(remote) = FfiRemote::from_callbacks(&callbacks) else {
        return std::ptr::null_mut();
    };
    let config = match config_path {
        Some(p) => match CartConfig::load(Path::new(p)) {
            Ok(c) => c,
            Err(err) => {
                warn!(path = %p, error = %err, "cart config unreadable");
                return std::ptr::null_mut();
            }
        },
        None => CartConfig::default(),
    };
    if crate::logging::init(&config.logging.level) {
        debug!(level = %config.logging.level, "cart logging initialised from config");
    }

    let network = ConnectivityFlag::new(online != 0);
    match CartRepository::open(&config, user_id, remote, Arc::new(network.clone())) {
        Ok(repo) => Box::into_raw(Box::new(CartHandle { repo, network })),
        Err(err) => {
            warn!(user = %user_id, error = %err, "cart open failed");
            std::ptr::null_mut()
        }
    }
}

/// Close a session (sign-out) and free the handle.
#[unsafe(no_mangle)]
pub extern "C" fn cart_close(handle: *mut CartHandle) {
    if handle.is_null() {
        return;
    }
    let h = unsafe { Box::from_raw(handle) };
    h.repo.close();
}

/// Add one unit of the product described by `product_json`.
#[unsafe(no_mangle)]
pub extern "C" fn cart_add_item_json(handle: *mut CartHandle, product_json: *const c_char) -> c_int {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 2;
    };
    let product: Product = match ptr_to_str(product_json).map(serde_json::from_str) {
        Ok(Ok(p)) => p,
        _ => return 3,
    };
    status(h.repo.add_to_cart(&product).map(|_| ()))
}

/// Remove a line. Removing an unknown product is not an error.
#[unsafe(no_mangle)]
pub extern "C" fn cart_remove_item(handle: *mut CartHandle, product_id: *const c_char) -> c_int {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 2;
    };
    let Ok(product_id) = ptr_to_str(product_id) else {
        return 3;
    };
    status(h.repo.remove_item(product_id).map(|_| ()))
}

#[unsafe(no_mangle)]
pub extern "C" fn cart_clear(handle: *mut CartHandle) -> c_int {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 2;
    };
    status(h.repo.clear_cart().map(|_| ()))
}

/// Visible cart as a JSON array. Returns null on error.
#[unsafe(no_mangle)]
pub extern "C" fn cart_items_json(handle: *mut CartHandle) -> *mut c_char {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return std::ptr::null_mut();
    };
    match serde_json::to_string(&h.repo.items()) {
        Ok(s) => to_cstring_ptr(&s),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Pending product ids as a JSON array. Returns null on error.
#[unsafe(no_mangle)]
pub extern "C" fn cart_pending_json(handle: *mut CartHandle) -> *mut c_char {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return std::ptr::null_mut();
    };
    match h.repo.pending().and_then(|p| Ok(serde_json::to_string(&p)?)) {
        Ok(s) => to_cstring_ptr(&s),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Run a reconciliation pass now (no-op while offline).
#[unsafe(no_mangle)]
pub extern "C" fn cart_sync(handle: *mut CartHandle) -> c_int {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 2;
    };
    status(h.repo.sync().map(|_| ()))
}

/// Report a network status change. Going online retries the full pass.
#[unsafe(no_mangle)]
pub extern "C" fn cart_set_online(handle: *mut CartHandle, online: c_int) -> c_int {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 2;
    };
    match h.network.set(online != 0) {
        Some(trigger) => status(h.repo.handle_trigger(trigger).map(|_| ())),
        None => 0,
    }
}

/// The app returned to the foreground.
#[unsafe(no_mangle)]
pub extern "C" fn cart_foreground(handle: *mut CartHandle) -> c_int {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 2;
    };
    status(h.repo.handle_trigger(SyncTrigger::Foreground).map(|_| ()))
}

/// Feed a realtime snapshot (JSON array of items) from the host listener.
#[unsafe(no_mangle)]
pub extern "C" fn cart_apply_remote_snapshot_json(
    handle: *mut CartHandle,
    items_json: *const c_char,
) -> c_int {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return 2;
    };
    let items: Vec<CartItem> = match ptr_to_str(items_json).map(serde_json::from_str) {
        Ok(Ok(items)) => items,
        _ => return 3,
    };
    status(h.repo.apply_remote_snapshot(items).map(|_| ()))
}
