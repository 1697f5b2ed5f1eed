//! Write and read sessions.
//!
//! A session owns all per-archive mutable state: the reference identity
//! tables, the world being reconstructed and its handle remap table. The
//! registry and the stream are borrowed. Sessions are not re-entrant —
//! starting a second world load inside one, or finishing with a load still
//! active, is a protocol error — and nothing in a session outlives it, so
//! a failed load leaves no half-mutated shared state behind.

use std::any::Any;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use super::error::{ArchiveError, FormatError};
use super::header::{ObjectHeader, TypeTag};
use super::registry::{Archivable, TypeRegistry, check_readable_version};
use super::resolver::{ReferenceIds, ReferenceTable};
use super::skip::SkipSet;
use super::stream::{ArchiveReader, ArchiveWriter, WriteSeek};
use crate::entity::Entity;
use crate::world::World;

/// Write side of one archival session.
pub struct WriteSession<'a> {
    registry: &'a TypeRegistry,
    writer: ArchiveWriter<'a>,
    refs: ReferenceIds,
    skip: SkipSet,
    bookkeeping_at: u64,
}

impl<'a> WriteSession<'a> {
    /// Opens a session on `stream`. Reserves the bookkeeping slot that
    /// [`finish`](Self::finish) patches with the shared-object count.
    pub fn new(
        registry: &'a TypeRegistry,
        stream: &'a mut dyn WriteSeek,
        skip: SkipSet,
    ) -> Result<Self, ArchiveError> {
        let mut writer = ArchiveWriter::new(stream);
        let bookkeeping_at = writer.position()?;
        writer.write_u32(0)?;
        Ok(Self {
            registry,
            writer,
            refs: ReferenceIds::default(),
            skip,
            bookkeeping_at,
        })
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    pub fn writer(&mut self) -> &mut ArchiveWriter<'a> {
        &mut self.writer
    }

    pub fn skip_set(&self) -> &SkipSet {
        &self.skip
    }

    /// Writes an object with its header, dispatching on the value's
    /// concrete type. Shared reference-type `Rc`s are written in full on
    /// first encounter and as a back-reference afterwards.
    pub fn write_object(&mut self, value: &Rc<dyn Any>) -> Result<(), ArchiveError> {
        let registry = self.registry;
        let type_id = value.as_ref().type_id();

        if let Some(instance) = registry.instance_for(type_id) {
            let family = registry.family(instance.family).ok_or_else(|| {
                ArchiveError::Protocol(format!(
                    "extended instance '{}' has no family entry",
                    instance.type_argument
                ))
            })?;
            let mut header = ObjectHeader {
                tag: instance.family,
                version: family.current_version,
                is_reference: family.is_reference,
                is_null: false,
                is_back_reference: false,
                is_extended: true,
            };
            if family.is_reference {
                let (id, first) = self.refs.get_or_assign(value);
                if !first {
                    header.is_back_reference = true;
                    self.writer.write_u32(header.pack()?)?;
                    return self.writer.write_var_u32(id);
                }
            }
            self.writer.write_u32(header.pack()?)?;
            self.writer.write_string(instance.type_argument)?;
            return (instance.write)(self, value);
        }

        let tag = registry.tag_for(type_id).ok_or_else(|| {
            ArchiveError::Protocol("value's type is not registered for archiving".into())
        })?;
        let entry = registry.entry(tag).ok_or_else(|| {
            ArchiveError::Protocol(format!("tag {tag} has no registry entry"))
        })?;
        let mut header = ObjectHeader {
            tag,
            version: entry.current_version,
            is_reference: entry.is_reference,
            is_null: false,
            is_back_reference: false,
            is_extended: false,
        };
        if entry.is_reference {
            let (id, first) = self.refs.get_or_assign(value);
            if !first {
                header.is_back_reference = true;
                self.writer.write_u32(header.pack()?)?;
                return self.writer.write_var_u32(id);
            }
        }
        self.writer.write_u32(header.pack()?)?;
        (entry.write)(self, value)
    }

    /// Writes a null header carrying the field's declared tag.
    pub fn write_null(&mut self, declared: TypeTag) -> Result<(), ArchiveError> {
        let header = ObjectHeader {
            tag: declared,
            version: self.registry.version_for_tag(declared),
            is_reference: false,
            is_null: true,
            is_back_reference: false,
            is_extended: false,
        };
        self.writer.write_u32(header.pack()?)
    }

    pub fn write_optional_object(
        &mut self,
        value: Option<&Rc<dyn Any>>,
        declared: TypeTag,
    ) -> Result<(), ArchiveError> {
        match value {
            Some(value) => self.write_object(value),
            None => self.write_null(declared),
        }
    }

    /// Typed convenience over [`write_object`](Self::write_object).
    pub fn write_ref<T: Archivable>(&mut self, value: &Rc<T>) -> Result<(), ArchiveError> {
        let erased: Rc<dyn Any> = value.clone();
        self.write_object(&erased)
    }

    /// Writes a value type inline, without identity tracking.
    pub fn write_value<T: Archivable>(&mut self, value: &T) -> Result<(), ArchiveError> {
        let header = ObjectHeader {
            tag: T::TAG,
            version: T::VERSION,
            is_reference: false,
            is_null: false,
            is_back_reference: false,
            is_extended: false,
        };
        self.writer.write_u32(header.pack()?)?;
        value.write(self)
    }

    /// Writes an entity handle. Null handles and entities in the skip set
    /// are written as the null handle.
    pub fn write_entity(&mut self, entity: Entity) -> Result<(), ArchiveError> {
        if entity.is_null() || self.skip.contains(entity) {
            return self.writer.write_var_u32(0);
        }
        let biased = entity.id().checked_add(1).ok_or_else(|| {
            ArchiveError::Protocol(format!("entity id {} cannot be encoded", entity.id()))
        })?;
        self.writer.write_var_u32(biased)?;
        self.writer.write_var_u32(entity.world_id())?;
        self.writer.write_var_u32(entity.version())
    }

    /// Ends the session: patches the bookkeeping slot with the number of
    /// shared objects written, leaving the stream positioned at its end.
    pub fn finish(mut self) -> Result<(), ArchiveError> {
        let end = self.writer.position()?;
        self.writer.seek_to(self.bookkeeping_at)?;
        self.writer.write_u32(self.refs.len())?;
        self.writer.seek_to(end)?;
        log::debug!("archive written: {} shared objects", self.refs.len());
        Ok(())
    }
}

/// The world being reconstructed plus its old-to-new handle remap table.
pub(crate) struct WorldLoad {
    pub world: World,
    pub entity_map: HashMap<Entity, Entity>,
    // Entities declared by the entity list so far; the difference between
    // this and the map size is the number of placeholder spawns.
    pub declared: u32,
}

/// Read side of one archival session.
pub struct ReadSession<'a> {
    registry: &'a TypeRegistry,
    reader: ArchiveReader<'a>,
    refs: ReferenceTable,
    expected_refs: u32,
    world_load: Option<WorldLoad>,
}

impl<'a> ReadSession<'a> {
    pub fn new(registry: &'a TypeRegistry, stream: &'a mut dyn Read) -> Result<Self, ArchiveError> {
        let mut reader = ArchiveReader::new(stream);
        let expected_refs = reader.read_u32()?;
        Ok(Self {
            registry,
            reader,
            refs: ReferenceTable::default(),
            expected_refs,
            world_load: None,
        })
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    pub fn reader(&mut self) -> &mut ArchiveReader<'a> {
        &mut self.reader
    }

    /// Reads one object. `declared` is the field's declared tag: the
    /// decoded tag must match it exactly, or be registered with it as a
    /// base for polymorphic fields. `None` accepts any registered tag.
    ///
    /// Returns `None` for a null header.
    pub fn read_object(
        &mut self,
        declared: Option<TypeTag>,
    ) -> Result<Option<Rc<dyn Any>>, ArchiveError> {
        let registry = self.registry;
        let header = ObjectHeader::unpack(self.reader.read_u32()?);

        if let Some(declared) = declared
            && header.tag != declared
        {
            let widened = registry.is_base(declared)
                && registry.entry(header.tag).and_then(|e| e.base) == Some(declared);
            if !widened {
                return Err(FormatError::TagMismatch {
                    expected: declared.0,
                    found: header.tag.0,
                }
                .into());
            }
        }

        if header.is_null {
            return Ok(None);
        }

        if header.is_extended {
            let family = registry
                .family(header.tag)
                .ok_or(FormatError::UnknownTag(header.tag.0))?;
            check_readable_version(header.tag, header.version, family.current_version)?;
            if header.is_back_reference {
                if !family.is_reference {
                    return Err(FormatError::Malformed("back-reference to a value family").into());
                }
                let id = self.reader.read_var_u32()?;
                return Ok(Some(self.refs.resolve(id)?));
            }
            let type_argument = self.reader.read_string()?;
            if family.is_reference {
                let id = self.refs.assign_next();
                let object = (family.read)(self, header.version, Some(id), &type_argument)?;
                self.commit_reference(id, object.clone())?;
                return Ok(Some(object));
            }
            let object = (family.read)(self, header.version, None, &type_argument)?;
            return Ok(Some(object));
        }

        let entry = registry
            .entry(header.tag)
            .ok_or(FormatError::UnknownTag(header.tag.0))?;
        check_readable_version(header.tag, header.version, entry.current_version)?;
        if header.is_reference != entry.is_reference {
            return Err(FormatError::Malformed("reference flag").into());
        }

        if header.is_back_reference {
            if !entry.is_reference {
                return Err(FormatError::Malformed("back-reference to a value type").into());
            }
            let id = self.reader.read_var_u32()?;
            return Ok(Some(self.refs.resolve(id)?));
        }

        if entry.is_reference {
            let id = self.refs.assign_next();
            let object = (entry.read)(self, header.version, Some(id))?;
            self.commit_reference(id, object.clone())?;
            return Ok(Some(object));
        }

        let object = (entry.read)(self, header.version, None)?;
        Ok(Some(object))
    }

    /// Typed convenience over [`read_object`](Self::read_object).
    pub fn read_ref<T: Archivable>(&mut self) -> Result<Option<Rc<T>>, ArchiveError> {
        match self.read_object(Some(T::TAG))? {
            None => Ok(None),
            Some(object) => object
                .downcast::<T>()
                .map(Some)
                .map_err(|_| FormatError::Malformed("object type behind tag").into()),
        }
    }

    /// Reads a value written by [`WriteSession::write_value`].
    pub fn read_value<T: Archivable>(&mut self) -> Result<Rc<T>, ArchiveError> {
        let header = ObjectHeader::unpack(self.reader.read_u32()?);
        if header.tag != T::TAG {
            return Err(FormatError::TagMismatch {
                expected: T::TAG.0,
                found: header.tag.0,
            }
            .into());
        }
        if header.is_null {
            return Err(ArchiveError::NullValue(T::NAME.into()));
        }
        if header.is_reference || header.is_back_reference || header.is_extended {
            return Err(FormatError::Malformed("value header flags").into());
        }
        check_readable_version(T::TAG, header.version, T::VERSION)?;
        T::read(self, header.version, None)
    }

    /// Binds an object id ahead of decoding its children. Read delegates
    /// for reference types that can be part of a cycle must call this with
    /// the id they were handed before reading any nested object.
    pub fn register_reference(
        &mut self,
        id: u32,
        object: Rc<dyn Any>,
    ) -> Result<(), ArchiveError> {
        self.refs.insert(id, object)
    }

    pub fn resolve_reference(&self, id: u32) -> Result<Rc<dyn Any>, ArchiveError> {
        self.refs.resolve(id)
    }

    fn commit_reference(&mut self, id: u32, object: Rc<dyn Any>) -> Result<(), ArchiveError> {
        match self.refs.get(id) {
            // The delegate registered itself (cycle support); the returned
            // object must be the same allocation.
            Some(existing) => {
                if !Rc::ptr_eq(existing, &object) {
                    return Err(ArchiveError::Protocol(format!(
                        "read delegate registered a different object than it returned for id {id}"
                    )));
                }
                Ok(())
            }
            None => self.refs.insert(id, object),
        }
    }

    /// Reads an entity handle and remaps it into the world being loaded.
    /// The null handle passes through unmapped.
    pub fn read_entity(&mut self) -> Result<Entity, ArchiveError> {
        let old = self.read_raw_entity()?;
        if old.is_null() {
            return Ok(Entity::NULL);
        }
        self.remap_entity(old)
    }

    /// Decodes a handle triple without remapping.
    pub(crate) fn read_raw_entity(&mut self) -> Result<Entity, ArchiveError> {
        let biased = self.reader.read_var_u32()?;
        if biased == 0 {
            return Ok(Entity::NULL);
        }
        let world_id = self.reader.read_var_u32()?;
        let version = self.reader.read_var_u32()?;
        Ok(Entity::new(biased - 1, world_id, version))
    }

    /// Maps an archived handle to its live counterpart, spawning a fresh
    /// entity on first sight. Forward references therefore resolve to the
    /// same entity the later entity record fills in.
    pub(crate) fn remap_entity(&mut self, old: Entity) -> Result<Entity, ArchiveError> {
        let load = self.world_load.as_mut().ok_or_else(|| {
            ArchiveError::Protocol("entity handle read outside of a world load".into())
        })?;
        if let Some(&new) = load.entity_map.get(&old) {
            return Ok(new);
        }
        let new = load.world.spawn();
        load.entity_map.insert(old, new);
        Ok(new)
    }

    /// Inserts a decoded component on an entity of the world being loaded.
    pub fn attach_component<T: 'static>(
        &mut self,
        entity: Entity,
        component: T,
    ) -> Result<(), ArchiveError> {
        let load = self.world_load.as_mut().ok_or_else(|| {
            ArchiveError::Protocol("component decoded outside of a world load".into())
        })?;
        load.world
            .insert(entity, component)
            .map_err(|e| ArchiveError::Protocol(e.to_string()))
    }

    pub(crate) fn begin_world_load(&mut self) -> Result<(), ArchiveError> {
        if self.world_load.is_some() {
            return Err(ArchiveError::Protocol(
                "a world is already being loaded in this session".into(),
            ));
        }
        self.world_load = Some(WorldLoad {
            world: World::new(),
            entity_map: HashMap::new(),
            declared: 0,
        });
        Ok(())
    }

    pub(crate) fn world_load_mut(&mut self) -> Result<&mut WorldLoad, ArchiveError> {
        self.world_load.as_mut().ok_or_else(|| {
            ArchiveError::Protocol("no world is being loaded in this session".into())
        })
    }

    /// Discards a half-built world after a load error. The session stays
    /// usable for error reporting but the partial world is dropped.
    pub(crate) fn abort_world_load(&mut self) {
        self.world_load = None;
    }

    pub(crate) fn finish_world_load(&mut self) -> Result<World, ArchiveError> {
        let load = self.world_load.take().ok_or_else(|| {
            ArchiveError::Protocol("no world is being loaded in this session".into())
        })?;
        let placeholders = (load.entity_map.len() as u32).saturating_sub(load.declared);
        if placeholders > 0 {
            log::warn!(
                "world load spawned {placeholders} placeholder entities for handles \
                 with no entity record"
            );
        }
        Ok(load.world)
    }

    /// Ends the session, verifying that nothing was left half-done: no
    /// world load still active, and exactly as many shared objects read as
    /// the bookkeeping slot declared.
    pub fn finish(self) -> Result<(), ArchiveError> {
        if self.world_load.is_some() {
            return Err(ArchiveError::Protocol(
                "session finished while a world load is active".into(),
            ));
        }
        let actual = self.refs.len();
        if actual != self.expected_refs {
            return Err(FormatError::ReferenceCountMismatch {
                expected: self.expected_refs,
                actual,
            }
            .into());
        }
        Ok(())
    }
}
