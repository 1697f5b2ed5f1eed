//! Shared set of entities excluded from world serialization.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entity::Entity;

/// Entities to leave out of a world snapshot.
///
/// Gameplay and editor systems mark transient entities (drag previews,
/// particles, debug gizmos) here; the writer then omits them from the
/// entity list, and any component field referencing a skipped entity is
/// written as the null handle. Clones share the same underlying set, so a
/// handle can be given to the systems that mark entities while the write
/// session holds another.
#[derive(Clone, Default, Debug)]
pub struct SkipSet {
    inner: Arc<Mutex<HashSet<Entity>>>,
}

impl SkipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: Entity) {
        self.inner.lock().insert(entity);
    }

    pub fn remove(&self, entity: Entity) {
        self.inner.lock().remove(&entity);
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.inner.lock().contains(&entity)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
