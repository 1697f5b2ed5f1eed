//! Type registry: tags, versions and serialization delegates.
//!
//! The archive format is closed-world: every type, component and callback
//! that can appear in a stream is registered up front with a hand-assigned
//! numeric tag. Nothing is derived from type names or memory layout, so
//! renaming or reordering a Rust type never changes the format.
//!
//! Registration is startup code and misuse is a programming error, so the
//! `register_*` methods panic on duplicate tags or out-of-range versions
//! instead of returning results.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::callback::CallbackTarget;
use super::error::ArchiveError;
use super::header::{COMPONENT_TAG_MAX, COMPONENT_VERSION_MAX, TypeTag};
use super::session::{ReadSession, WriteSession};
use crate::entity::Entity;
use crate::world::World;

/// Erased write delegate for a registered object type.
pub type WriteFn = fn(&mut WriteSession<'_>, &Rc<dyn Any>) -> Result<(), ArchiveError>;

/// Erased read delegate for a registered object type. Receives the version
/// the payload was written with and, for reference types, the object id to
/// register before decoding children.
pub type ReadFn =
    fn(&mut ReadSession<'_>, u16, Option<u32>) -> Result<Rc<dyn Any>, ArchiveError>;

/// Read delegate for an extended (generic) family. The extra argument is
/// the type-argument name decoded from the stream; the delegate selects the
/// closed generic instance to construct from it.
pub type ExtendedReadFn =
    fn(&mut ReadSession<'_>, u16, Option<u32>, &str) -> Result<Rc<dyn Any>, ArchiveError>;

/// A type that can be written to and read from an archive as an object.
///
/// `VERSION` is the current format version of the payload; `write` always
/// emits it, and `read` must accept every version in `(0, VERSION]`,
/// branching per version where the layout changed.
pub trait Archivable: Sized + 'static {
    const TAG: TypeTag;
    const VERSION: u16;
    const NAME: &'static str;

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError>;

    /// Reconstructs a value written by [`write`](Self::write) at `version`.
    ///
    /// For reference types `ref_id` is `Some`; a delegate whose payload can
    /// contain references back to itself must call
    /// [`ReadSession::register_reference`] with it before decoding children.
    fn read(
        session: &mut ReadSession<'_>,
        version: u16,
        ref_id: Option<u32>,
    ) -> Result<Rc<Self>, ArchiveError>;
}

/// A closed instance of a generic type family (e.g. `Slots<f32>` within the
/// `Slots<T>` family).
///
/// All instances of a family share the family's tag and version; the stream
/// distinguishes them by `TYPE_ARGUMENT`, a stable name for the closed type
/// argument. Reading is registered once per family, not per instance — the
/// family's [`ExtendedReadFn`] dispatches on the decoded argument name.
pub trait ArchivableExtended: Sized + 'static {
    const FAMILY: TypeTag;
    const TYPE_ARGUMENT: &'static str;

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError>;
}

/// A component persisted as part of an entity record.
///
/// Components use the compact header (24-bit tag, 8-bit version) and are
/// always values owned by their entity; reference semantics between
/// components go through [`Entity`] fields instead.
pub trait ArchiveComponent: Sized + 'static {
    const TAG: u32;
    const VERSION: u8;
    const NAME: &'static str;

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError>;

    fn read(session: &mut ReadSession<'_>, version: u8) -> Result<Self, ArchiveError>;
}

pub(crate) struct TypeEntry {
    pub name: &'static str,
    pub write: WriteFn,
    pub read: ReadFn,
    pub current_version: u16,
    pub is_reference: bool,
    pub base: Option<TypeTag>,
}

pub(crate) struct ExtendedFamily {
    pub name: &'static str,
    pub read: ExtendedReadFn,
    pub current_version: u16,
    pub is_reference: bool,
}

pub(crate) struct ExtendedInstance {
    pub family: TypeTag,
    pub type_argument: &'static str,
    pub write: WriteFn,
}

pub(crate) struct ComponentEntry {
    pub tag: u32,
    pub name: &'static str,
    pub current_version: u8,
    pub has: fn(&World, Entity) -> bool,
    pub write: fn(&mut WriteSession<'_>, &World, Entity) -> Result<(), ArchiveError>,
    pub read: fn(&mut ReadSession<'_>, Entity, u8) -> Result<(), ArchiveError>,
}

/// Registry of everything the archive format can contain.
///
/// Built once at startup, then shared immutably by every session.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<TypeTag, TypeEntry>,
    tags_by_type: HashMap<TypeId, TypeTag>,
    bases: HashMap<TypeTag, &'static str>,
    families: HashMap<TypeTag, ExtendedFamily>,
    instances: HashMap<TypeId, ExtendedInstance>,
    // BTreeMap keeps component iteration (and therefore the order of
    // components inside an entity record) deterministic.
    components: BTreeMap<u32, ComponentEntry>,
    pub(crate) callbacks: HashMap<String, CallbackTarget>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as a value type: serialized inline wherever it
    /// appears, no identity tracking.
    pub fn register_value<T: Archivable>(&mut self) {
        self.register_entry::<T>(false, None);
    }

    /// Registers `T` as a reference type: shared `Rc`s serialize once and
    /// back-reference afterwards, and cycles are supported.
    pub fn register_reference<T: Archivable>(&mut self) {
        self.register_entry::<T>(true, None);
    }

    /// Registers `T` as a reference type assignable to the abstract `base`
    /// tag for polymorphic fields.
    pub fn register_reference_with_base<T: Archivable>(&mut self, base: TypeTag) {
        assert!(
            self.bases.contains_key(&base),
            "base tag {base} must be registered before its subtypes"
        );
        self.register_entry::<T>(true, Some(base));
    }

    /// Registers an abstract base tag. Base tags never appear in headers;
    /// they only widen what a polymorphic field accepts on read.
    pub fn register_base(&mut self, tag: TypeTag, name: &'static str) {
        assert!(
            !self.types.contains_key(&tag) && !self.families.contains_key(&tag),
            "base tag {tag} collides with a concrete type"
        );
        let previous = self.bases.insert(tag, name);
        assert!(previous.is_none(), "base tag {tag} registered twice");
    }

    /// Registers a generic type family under one shared tag. Instances are
    /// added with [`register_extended_instance`](Self::register_extended_instance).
    pub fn register_extended_family(
        &mut self,
        tag: TypeTag,
        name: &'static str,
        current_version: u16,
        is_reference: bool,
        read: ExtendedReadFn,
    ) {
        assert!(tag.0 <= TypeTag::MAX, "family tag {tag} out of range");
        assert!(
            (1..=255).contains(&current_version),
            "family {name} version {current_version} out of range"
        );
        assert!(
            !self.types.contains_key(&tag) && !self.bases.contains_key(&tag),
            "family tag {tag} collides with an existing registration"
        );
        let previous = self.families.insert(
            tag,
            ExtendedFamily {
                name,
                read,
                current_version,
                is_reference,
            },
        );
        assert!(previous.is_none(), "family tag {tag} registered twice");
    }

    /// Registers one closed instance of an extended family.
    pub fn register_extended_instance<T: ArchivableExtended>(&mut self) {
        assert!(
            self.families.contains_key(&T::FAMILY),
            "family {} must be registered before instance '{}'",
            T::FAMILY,
            T::TYPE_ARGUMENT
        );
        let write: WriteFn = |session, value| {
            let value = value.downcast_ref::<T>().ok_or_else(|| {
                ArchiveError::Protocol("write delegate received a foreign type".into())
            })?;
            value.write(session)
        };
        let previous = self.instances.insert(
            TypeId::of::<T>(),
            ExtendedInstance {
                family: T::FAMILY,
                type_argument: T::TYPE_ARGUMENT,
                write,
            },
        );
        assert!(
            previous.is_none(),
            "extended instance '{}' registered twice",
            T::TYPE_ARGUMENT
        );
    }

    /// Registers `T` as a persistable component.
    pub fn register_component<T: ArchiveComponent>(&mut self) {
        assert!(
            T::TAG <= COMPONENT_TAG_MAX,
            "component tag {:#08x} for {} out of range",
            T::TAG,
            T::NAME
        );
        assert!(
            (1..=COMPONENT_VERSION_MAX).contains(&T::VERSION),
            "component {} version {} out of range",
            T::NAME,
            T::VERSION
        );
        let entry = ComponentEntry {
            tag: T::TAG,
            name: T::NAME,
            current_version: T::VERSION,
            has: |world, entity| world.has::<T>(entity),
            write: |session, world, entity| {
                let component = world.get::<T>(entity).ok_or_else(|| {
                    ArchiveError::Protocol(format!(
                        "{} component vanished from {entity:?} mid-write",
                        T::NAME
                    ))
                })?;
                component.write(session)
            },
            read: |session, entity, version| {
                let component = T::read(session, version)?;
                session.attach_component(entity, component)
            },
        };
        let previous = self.components.insert(T::TAG, entry);
        assert!(
            previous.is_none(),
            "component tag {:#08x} registered twice",
            T::TAG
        );
    }

    fn register_entry<T: Archivable>(&mut self, is_reference: bool, base: Option<TypeTag>) {
        assert!(T::TAG.0 <= TypeTag::MAX, "tag {} for {} out of range", T::TAG, T::NAME);
        assert!(
            (1..=255).contains(&T::VERSION),
            "{} version {} out of range",
            T::NAME,
            T::VERSION
        );
        assert!(
            !self.bases.contains_key(&T::TAG) && !self.families.contains_key(&T::TAG),
            "tag {} for {} collides with an existing registration",
            T::TAG,
            T::NAME
        );
        let write: WriteFn = |session, value| {
            let value = value.downcast_ref::<T>().ok_or_else(|| {
                ArchiveError::Protocol("write delegate received a foreign type".into())
            })?;
            value.write(session)
        };
        let read: ReadFn = |session, version, ref_id| {
            let value = T::read(session, version, ref_id)?;
            let erased: Rc<dyn Any> = value;
            Ok(erased)
        };
        let previous = self.types.insert(
            T::TAG,
            TypeEntry {
                name: T::NAME,
                write,
                read,
                current_version: T::VERSION,
                is_reference,
                base,
            },
        );
        assert!(previous.is_none(), "tag {} registered twice", T::TAG);
        let previous = self.tags_by_type.insert(TypeId::of::<T>(), T::TAG);
        assert!(previous.is_none(), "type {} registered twice", T::NAME);
    }

    pub(crate) fn entry(&self, tag: TypeTag) -> Option<&TypeEntry> {
        self.types.get(&tag)
    }

    pub(crate) fn tag_for(&self, type_id: TypeId) -> Option<TypeTag> {
        self.tags_by_type.get(&type_id).copied()
    }

    pub(crate) fn instance_for(&self, type_id: TypeId) -> Option<&ExtendedInstance> {
        self.instances.get(&type_id)
    }

    pub(crate) fn family(&self, tag: TypeTag) -> Option<&ExtendedFamily> {
        self.families.get(&tag)
    }

    pub(crate) fn is_base(&self, tag: TypeTag) -> bool {
        self.bases.contains_key(&tag)
    }

    pub(crate) fn component(&self, tag: u32) -> Option<&ComponentEntry> {
        self.components.get(&tag)
    }

    pub(crate) fn components(&self) -> impl Iterator<Item = &ComponentEntry> {
        self.components.values()
    }

    /// Version of the entry behind `tag`, if any kind of entry exists.
    /// Used when writing null headers for abstract or family tags.
    pub(crate) fn version_for_tag(&self, tag: TypeTag) -> u16 {
        if let Some(entry) = self.types.get(&tag) {
            entry.current_version
        } else if let Some(family) = self.families.get(&tag) {
            family.current_version
        } else {
            1
        }
    }
}

/// Checks that a decoded version is readable for `tag`: in `(0, current]`.
pub(crate) fn check_readable_version(
    tag: TypeTag,
    version: u16,
    current: u16,
) -> Result<(), ArchiveError> {
    if version == 0 || version > current {
        return Err(ArchiveError::Version {
            tag: tag.0,
            version,
            current,
        });
    }
    Ok(())
}
