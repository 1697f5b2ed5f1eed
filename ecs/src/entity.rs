//! Entity handles and slot allocation.
//!
//! An [`Entity`] is a lightweight handle into a [`World`](crate::World):
//! a slot id, the id of the owning world, and a version counter that is
//! bumped whenever the slot is recycled. A handle is only valid while all
//! three fields match the world's current state, so stale handles held
//! across a despawn are detected instead of silently aliasing a new entity.

use std::fmt;

use fixedbitset::FixedBitSet;

/// Handle to an entity in a [`World`](crate::World).
///
/// Entities are cheap to copy and compare. Equality covers the slot id,
/// the owning world id and the slot version, so a handle left over from a
/// despawned entity never compares equal to the handle of the entity that
/// later reuses the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    id: u32,
    world_id: u32,
    version: u32,
}

impl Entity {
    /// The null handle. Never alive in any world.
    pub const NULL: Entity = Entity {
        id: u32::MAX,
        world_id: 0,
        version: 0,
    };

    pub(crate) fn new(id: u32, world_id: u32, version: u32) -> Self {
        Self {
            id,
            world_id,
            version,
        }
    }

    /// Slot index within the owning world.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Id of the world this handle belongs to.
    pub fn world_id(&self) -> u32 {
        self.world_id
    }

    /// Slot version at the time the handle was created.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Whether this is the null handle.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({}v{}@w{})", self.id, self.version, self.world_id)
        }
    }
}

/// Slot allocator backing a world's entity storage.
///
/// Slots are recycled through a free list; the per-slot version counter is
/// bumped on deallocation so recycled slots invalidate old handles. Alive
/// slots are tracked in a bitset for fast iteration and membership tests.
pub(crate) struct EntityAllocator {
    world_id: u32,
    versions: Vec<u32>,
    alive: FixedBitSet,
    free_list: Vec<u32>,
    count: u32,
}

impl EntityAllocator {
    pub fn new(world_id: u32) -> Self {
        Self {
            world_id,
            versions: Vec::new(),
            alive: FixedBitSet::new(),
            free_list: Vec::new(),
            count: 0,
        }
    }

    /// Pre-sizes internal storage for `additional` more live entities.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.versions.len() + additional.saturating_sub(self.free_list.len());
        self.versions.reserve(additional);
        self.alive.grow(needed);
    }

    pub fn allocate(&mut self) -> Entity {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None => {
                let id = self.versions.len() as u32;
                self.versions.push(1);
                self.alive.grow((id + 1) as usize);
                id
            }
        };
        self.alive.insert(id as usize);
        self.count += 1;
        Entity::new(id, self.world_id, self.versions[id as usize])
    }

    /// Frees the slot behind `entity`. Returns `false` for handles that are
    /// stale, foreign or null.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let idx = entity.id as usize;
        self.alive.set(idx, false);
        // Bumping on free makes every outstanding handle to this slot stale.
        self.versions[idx] = self.versions[idx].wrapping_add(1);
        self.free_list.push(entity.id);
        self.count -= 1;
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        entity.world_id == self.world_id
            && (entity.id as usize) < self.versions.len()
            && self.alive.contains(entity.id as usize)
            && self.versions[entity.id as usize] == entity.version
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn iter_alive(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .ones()
            .map(|idx| Entity::new(idx as u32, self.world_id, self.versions[idx]))
    }
}
