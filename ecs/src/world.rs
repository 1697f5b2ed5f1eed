//! Entity world: spawn/despawn lifecycle and per-type component storage.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::entity::{Entity, EntityAllocator};

static NEXT_WORLD_ID: AtomicU32 = AtomicU32::new(1);

/// Error returned when a component operation targets a dead or foreign handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadEntity {
    pub entity: Entity,
}

impl fmt::Display for DeadEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity {:?} is not alive in this world", self.entity)
    }
}

impl std::error::Error for DeadEntity {}

/// Type-erased component column. Components are stored sparsely, keyed by
/// the entity's slot id; the erased `remove` hook lets despawn clear a
/// column without knowing its component type.
struct Column {
    data: Box<dyn Any>,
    remove: fn(&mut dyn Any, u32) -> bool,
}

impl Column {
    fn new<T: 'static>() -> Self {
        Self {
            data: Box::new(HashMap::<u32, T>::new()),
            remove: |data, id| {
                match data.downcast_mut::<HashMap<u32, T>>() {
                    Some(map) => map.remove(&id).is_some(),
                    None => false,
                }
            },
        }
    }

    fn map<T: 'static>(&self) -> Option<&HashMap<u32, T>> {
        self.data.downcast_ref()
    }

    fn map_mut<T: 'static>(&mut self) -> Option<&mut HashMap<u32, T>> {
        self.data.downcast_mut()
    }
}

/// Container for entities and their components.
///
/// Each world gets a process-unique id at construction; entity handles carry
/// that id, so handles from one world are rejected by every other world
/// rather than resolving to an unrelated entity.
pub struct World {
    id: u32,
    entities: EntityAllocator,
    columns: HashMap<TypeId, Column>,
}

impl World {
    pub fn new() -> Self {
        let id = NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            entities: EntityAllocator::new(id),
            columns: HashMap::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Pre-sizes entity storage for roughly `additional` more spawns.
    pub fn reserve_entities(&mut self, additional: usize) {
        self.entities.reserve(additional);
    }

    pub fn spawn(&mut self) -> Entity {
        let entity = self.entities.allocate();
        log::trace!("spawned {entity:?}");
        entity
    }

    /// Despawns the entity and drops all of its components. Returns `false`
    /// if the handle was already dead, stale or foreign.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.entities.deallocate(entity) {
            return false;
        }
        for column in self.columns.values_mut() {
            (column.remove)(column.data.as_mut(), entity.id());
        }
        log::trace!("despawned {entity:?}");
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> u32 {
        self.entities.count()
    }

    pub fn iter_entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter_alive()
    }

    /// Inserts (or replaces) a component on a live entity.
    pub fn insert<T: 'static>(&mut self, entity: Entity, value: T) -> Result<(), DeadEntity> {
        if !self.is_alive(entity) {
            return Err(DeadEntity { entity });
        }
        let column = self
            .columns
            .entry(TypeId::of::<T>())
            .or_insert_with(Column::new::<T>);
        if let Some(map) = column.map_mut::<T>() {
            map.insert(entity.id(), value);
        }
        Ok(())
    }

    pub fn get<T: 'static>(&self, entity: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.columns
            .get(&TypeId::of::<T>())?
            .map::<T>()?
            .get(&entity.id())
    }

    pub fn get_mut<T: 'static>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.columns
            .get_mut(&TypeId::of::<T>())?
            .map_mut::<T>()?
            .get_mut(&entity.id())
    }

    pub fn has<T: 'static>(&self, entity: Entity) -> bool {
        self.get::<T>(entity).is_some()
    }

    /// Removes and returns the entity's `T` component, if present.
    pub fn remove<T: 'static>(&mut self, entity: Entity) -> Option<T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.columns
            .get_mut(&TypeId::of::<T>())?
            .map_mut::<T>()?
            .remove(&entity.id())
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("entities", &self.entity_count())
            .finish()
    }
}

impl tidepool_core::Editable for World {}
