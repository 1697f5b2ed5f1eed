//! Editable targets and reversible editor actions.
//!
//! - [`Editable`] — marker trait for types that can be edited
//! - [`EditAction`] — a reversible edit operation (Command pattern)
//! - [`EditActionError`] / [`EditActionResult`] — error handling for actions
//!
//! EditActions are self-contained: each implementation internally stores
//! whatever data it needs (target identifiers, old/new values, captured
//! callbacks). That is also what makes them persistable: an action that
//! stores its effect as data can be written to an archive and replayed.

use std::any::Any;
use std::fmt;

/// Helper trait for downcasting trait objects to concrete types.
///
/// Automatically implemented for all `'static` types. Used by
/// [`EditAction::merge`] to downcast `&dyn EditAction<T>` to the concrete
/// action type, and by the archival layer to recognize persistable actions.
pub trait AsAny: 'static {
    /// Returns a reference to `self` as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: 'static> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Marker trait for types that serve as editing targets.
///
/// Implement this on any type that actions can operate on — an ECS world,
/// a scene graph, a species layout editor, etc.
pub trait Editable: 'static {}

/// Error type for action execution failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditActionError {
    /// The target object was not found.
    TargetNotFound(String),
    /// The target is in an invalid state for this action.
    InvalidState(String),
    /// A custom error with a description.
    Custom(String),
}

impl fmt::Display for EditActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetNotFound(msg) => write!(f, "target not found: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EditActionError {}

/// Result type for action operations.
pub type EditActionResult<T = ()> = Result<T, EditActionError>;

/// A reversible editor action (Command pattern).
///
/// EditActions encapsulate a single logical edit and capture enough state to
/// undo the change and redo it.
///
/// # Object Safety
///
/// This trait is dyn-compatible so that different action types can be stored
/// in a single [`ActionHistory`](super::ActionHistory) undo/redo stack as
/// `Box<dyn EditAction<T>>`.
pub trait EditAction<T: Editable>: fmt::Debug + AsAny {
    /// Applies the action to the target (forward / redo direction).
    fn apply(&mut self, target: &mut T) -> EditActionResult;

    /// Reverses the action (undo direction).
    ///
    /// Must restore the target to the state before [`apply`](Self::apply)
    /// was called.
    fn undo(&mut self, target: &mut T) -> EditActionResult;

    /// A short, human-readable description for display in the edit menu.
    ///
    /// Examples: `"Move entity"`, `"Place organelle"`, `"Rename species"`.
    fn description(&self) -> &str;

    /// Tries to merge `other` into `self`, taking ownership.
    ///
    /// If the actions are compatible (e.g. consecutive drags on the same
    /// entity), `self` absorbs `other`'s effect and returns `None`
    /// (the other action is consumed). Otherwise returns `Some(other)`
    /// back to the caller.
    ///
    /// Returns `Some(other)` by default (no merging). To probe `other`'s
    /// concrete type, deref the box first — `(*other).as_any()` — so the
    /// call dispatches through the action's vtable. `Box<dyn EditAction<T>>`
    /// is itself `'static` and has its own blanket [`AsAny`] impl, so
    /// `other.as_any()` downcasts against the `Box`, which always fails.
    fn merge(&mut self, other: Box<dyn EditAction<T>>) -> Option<Box<dyn EditAction<T>>> {
        Some(other)
    }
}
