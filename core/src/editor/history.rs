//! Undo/redo action history.
//!
//! [`ActionHistory`] manages a linear undo/redo stack of [`EditAction`] trait
//! objects. When a new action is pushed after undoing, the redo stack is
//! cleared (standard editor behavior).
//!
//! The history can be persisted: [`iter_undo`](ActionHistory::iter_undo) and
//! [`iter_redo`](ActionHistory::iter_redo) walk the stacks oldest-first for a
//! serializer, and [`restore_undo`](ActionHistory::restore_undo) /
//! [`restore_redo`](ActionHistory::restore_redo) rebuild them on load without
//! re-executing any action against the target.

use std::collections::VecDeque;
use std::fmt;

use super::action::{EditAction, EditActionError, EditActionResult, Editable};

/// Default maximum number of undo steps.
pub const DEFAULT_MAX_UNDO: usize = 100;

/// Manages an undo/redo stack of editor actions.
///
/// The undo stack is a bounded [`VecDeque`] — when it exceeds `max_undo`,
/// the oldest action is dropped from the front. The redo stack is an
/// unbounded [`Vec`] (it can never grow larger than the undo stack was).
///
/// # Example
///
/// ```ignore
/// let mut history = ActionHistory::new(50);
/// let mut target = MyScene::new();
///
/// // Execute and record an action
/// history.execute(Box::new(my_action), &mut target).unwrap();
///
/// // Undo the last action
/// history.undo(&mut target).unwrap();
///
/// // Redo it
/// history.redo(&mut target).unwrap();
/// ```
pub struct ActionHistory<T: Editable> {
    undo_stack: VecDeque<Box<dyn EditAction<T>>>,
    redo_stack: Vec<Box<dyn EditAction<T>>>,
    max_undo: usize,
    /// Tracks distance from the saved state.
    ///
    /// - `Some(0)` — the current state matches the last save.
    /// - `Some(n)` where `n > 0` — `n` undos needed to reach the saved state.
    /// - `Some(n)` where `n < 0` — `|n|` redos needed to reach the saved state.
    /// - `None` — never saved, or the save point is permanently unreachable
    ///   (dropped by capacity overflow, or the redo branch was discarded).
    save_distance: Option<i64>,
}

impl<T: Editable> ActionHistory<T> {
    /// Creates a new empty action history with the given maximum undo depth.
    ///
    /// When the undo stack exceeds `max_undo`, the oldest action is dropped.
    pub fn new(max_undo: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_undo,
            save_distance: Some(0),
        }
    }

    /// Applies an action to the target and pushes it onto the undo stack.
    ///
    /// Clears the redo stack and attempts to [merge](EditAction::merge) with
    /// the top of the undo stack. If the action fails, it is not pushed.
    pub fn execute(
        &mut self,
        mut action: Box<dyn EditAction<T>>,
        target: &mut T,
    ) -> EditActionResult {
        action.apply(target)?;

        // Clearing the redo stack invalidates a save point that was in redo.
        self.redo_stack.clear();
        if let Some(d) = self.save_distance
            && d < 0
        {
            self.save_distance = None;
        }

        if let Some(last) = self.undo_stack.back_mut() {
            match last.merge(action) {
                None => {
                    // Merged into the top entry — if that entry was the save
                    // point, the save is now invalidated (content changed).
                    if self.save_distance == Some(0) {
                        self.save_distance = None;
                    }
                    return Ok(());
                }
                Some(returned) => action = returned,
            }
        }

        // New entry pushed — save point moves one step further away.
        if let Some(d) = &mut self.save_distance {
            *d += 1;
        }

        self.undo_stack.push_back(action);
        if self.undo_stack.len() > self.max_undo {
            self.undo_stack.pop_front();
            // If the save point was beyond the oldest surviving entry, it's gone.
            if let Some(d) = self.save_distance
                && d > self.undo_stack.len() as i64
            {
                self.save_distance = None;
            }
        }
        Ok(())
    }

    /// Undoes the most recent action.
    ///
    /// Returns an error if the undo stack is empty or the undo failed.
    pub fn undo(&mut self, target: &mut T) -> EditActionResult {
        let mut action = self
            .undo_stack
            .pop_back()
            .ok_or_else(|| EditActionError::Custom("nothing to undo".into()))?;
        action.undo(target)?;
        self.redo_stack.push(action);
        if let Some(d) = &mut self.save_distance {
            *d -= 1;
        }
        Ok(())
    }

    /// Redoes the most recently undone action.
    ///
    /// Returns an error if the redo stack is empty or the redo failed.
    pub fn redo(&mut self, target: &mut T) -> EditActionResult {
        let mut action = self
            .redo_stack
            .pop()
            .ok_or_else(|| EditActionError::Custom("nothing to redo".into()))?;
        action.apply(target)?;
        self.undo_stack.push_back(action);
        if let Some(d) = &mut self.save_distance {
            *d += 1;
        }
        if self.undo_stack.len() > self.max_undo {
            self.undo_stack.pop_front();
            if let Some(d) = self.save_distance
                && d > self.undo_stack.len() as i64
            {
                self.save_distance = None;
            }
        }
        Ok(())
    }

    /// Returns `true` if there are actions that can be undone.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Returns `true` if there are actions that can be redone.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Returns an iterator over undo action descriptions, most recent first.
    pub fn undo_descriptions(&self) -> impl Iterator<Item = &str> {
        self.undo_stack.iter().rev().map(|a| a.description())
    }

    /// Returns an iterator over redo action descriptions, most recent first.
    pub fn redo_descriptions(&self) -> impl Iterator<Item = &str> {
        self.redo_stack.iter().rev().map(|a| a.description())
    }

    /// Returns the number of actions in the undo stack.
    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    /// Returns the number of actions in the redo stack.
    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Returns the maximum undo depth.
    pub fn max_undo(&self) -> usize {
        self.max_undo
    }

    /// Walks the undo stack oldest-first (for serialization).
    pub fn iter_undo(&self) -> impl Iterator<Item = &dyn EditAction<T>> {
        self.undo_stack.iter().map(|a| a.as_ref())
    }

    /// Walks the redo stack oldest-first (for serialization).
    ///
    /// "Oldest" here means the entry that was undone first, i.e. the bottom
    /// of the redo stack.
    pub fn iter_redo(&self) -> impl Iterator<Item = &dyn EditAction<T>> {
        self.redo_stack.iter().map(|a| a.as_ref())
    }

    /// Pushes a restored action onto the undo stack without applying it.
    ///
    /// Used when rebuilding a persisted history. Call in the same
    /// oldest-first order [`iter_undo`](Self::iter_undo) produced. Entries
    /// beyond `max_undo` drop the oldest, as during normal execution.
    pub fn restore_undo(&mut self, action: Box<dyn EditAction<T>>) {
        self.undo_stack.push_back(action);
        if self.undo_stack.len() > self.max_undo {
            self.undo_stack.pop_front();
        }
    }

    /// Pushes a restored action onto the redo stack without applying it.
    ///
    /// Call in the same oldest-first order [`iter_redo`](Self::iter_redo)
    /// produced.
    pub fn restore_redo(&mut self, action: Box<dyn EditAction<T>>) {
        self.redo_stack.push(action);
    }

    /// Records the current state as the saved state.
    ///
    /// After calling this, [`has_unsaved_changes`](Self::has_unsaved_changes)
    /// returns `false` until the history is modified by execute, undo, or redo.
    pub fn mark_saved(&mut self) {
        self.save_distance = Some(0);
    }

    /// Returns `true` if the current state differs from the last saved state.
    ///
    /// Returns `true` if [`mark_saved`](Self::mark_saved) has never been
    /// called, or if the history has been modified since the last save, or if
    /// the save point is permanently unreachable.
    pub fn has_unsaved_changes(&self) -> bool {
        self.save_distance != Some(0)
    }

    /// Clears both undo and redo stacks.
    ///
    /// If the current state was the saved state (`has_unsaved_changes` was
    /// `false`), it remains so after clearing. Otherwise the save point is
    /// permanently lost.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        // If we were at the save point, clearing history doesn't change
        // the target — we're still at the saved state. Otherwise the
        // save point is unreachable.
        if self.save_distance != Some(0) {
            self.save_distance = None;
        }
    }
}

impl<T: Editable> fmt::Debug for ActionHistory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHistory")
            .field("undo_count", &self.undo_stack.len())
            .field("redo_count", &self.redo_stack.len())
            .field("max_undo", &self.max_undo)
            .field("save_distance", &self.save_distance)
            .finish()
    }
}
