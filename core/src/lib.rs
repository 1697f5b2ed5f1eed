//! # Tidepool Core
//!
//! Core crate for the Tidepool save system: allocation-reuse pooling and
//! the reversible edit-action framework whose histories the archival layer
//! persists.

pub mod editor;
pub mod pool;

pub use editor::{
    ActionHistory, AsAny, DEFAULT_MAX_UNDO, EditAction, EditActionError, EditActionResult,
    Editable,
};
pub use pool::{Poolable, Pooled};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs the library version. Hosts call this once at startup.
pub fn init() {
    log::info!("Tidepool Core v{VERSION} initialized");
}
