//! Reversible editing operations and their undo/redo history.
//!
//! This module provides the foundational traits and types for an
//! undo/redo-capable editor. It is decoupled from specific editable types
//! (an ECS world, a scene graph, a texture) so that higher-level crates can
//! implement concrete editors — and so the archival layer can persist a
//! history and rebuild it on load without re-executing every action.
//!
//! - [`Editable`] — marker trait for types that can be edited
//! - [`EditAction`] — a reversible edit operation (Command pattern)
//! - [`ActionHistory`] — undo/redo stack managing action sequences
//!
//! # Merging
//!
//! Consecutive incremental actions (each mouse move of a drag) can coalesce
//! into a single undo entry via [`EditAction::merge`].
//!
//! # Restoring a persisted history
//!
//! [`ActionHistory::iter_undo`] / [`ActionHistory::iter_redo`] expose the
//! stacks for serialization, and [`ActionHistory::restore_undo`] /
//! [`ActionHistory::restore_redo`] push actions back without applying them.

mod action;
mod history;

pub use action::{AsAny, EditAction, EditActionError, EditActionResult, Editable};
pub use history::{ActionHistory, DEFAULT_MAX_UNDO};
