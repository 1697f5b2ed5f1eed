//! Reference identity tracking across one archive session.
//!
//! The write side assigns sequential object ids keyed on `Rc` allocation
//! pointers, so two fields holding the same `Rc` serialize as one payload
//! plus a back-reference. The read side mirrors the assignment order: ids
//! for full serializations are implicit (assigned in encounter order, never
//! written to the stream), and only back-references carry an explicit id.
//! Registering the id before a payload's children are decoded is what makes
//! reference cycles loadable.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use super::error::{ArchiveError, FormatError};

fn identity_key(object: &Rc<dyn Any>) -> usize {
    // Thin out the vtable half of the fat pointer; identity is the
    // allocation address.
    Rc::as_ptr(object) as *const () as usize
}

/// Write-side table: allocation pointer to assigned object id.
#[derive(Default)]
pub(crate) struct ReferenceIds {
    ids: HashMap<usize, u32>,
}

impl ReferenceIds {
    /// Returns the object's id and whether this is its first appearance.
    pub fn get_or_assign(&mut self, object: &Rc<dyn Any>) -> (u32, bool) {
        let next = self.ids.len() as u32;
        match self.ids.entry(identity_key(object)) {
            std::collections::hash_map::Entry::Occupied(slot) => (*slot.get(), false),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(next);
                (next, true)
            }
        }
    }

    pub fn len(&self) -> u32 {
        self.ids.len() as u32
    }
}

/// Read-side table: object id to the reconstructed shared object.
#[derive(Default)]
pub(crate) struct ReferenceTable {
    objects: HashMap<u32, Rc<dyn Any>>,
    next: u32,
}

impl ReferenceTable {
    /// Reserves the id for the full serialization being decoded. Mirrors
    /// the writer's sequential assignment.
    pub fn assign_next(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Binds `id` to its object. Called by read delegates that construct
    /// their object before decoding children (cycle support), or by the
    /// session after a delegate that does not.
    pub fn insert(&mut self, id: u32, object: Rc<dyn Any>) -> Result<(), ArchiveError> {
        if self.objects.insert(id, object).is_some() {
            return Err(FormatError::DuplicateReference(id).into());
        }
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&Rc<dyn Any>> {
        self.objects.get(&id)
    }

    pub fn resolve(&self, id: u32) -> Result<Rc<dyn Any>, ArchiveError> {
        self.objects
            .get(&id)
            .cloned()
            .ok_or_else(|| FormatError::DanglingReference(id).into())
    }

    pub fn len(&self) -> u32 {
        self.next
    }
}
