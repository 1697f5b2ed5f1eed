//! # Tidepool ECS
//!
//! Entity world with generational handles, and the binary archival layer
//! that persists worlds, object graphs and undo/redo histories for game
//! saves. See the [`archive`] module for the save format.

pub mod archive;
mod entity;
mod world;

pub use entity::Entity;
pub use world::{DeadEntity, World};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
