//! End-to-end archive tests: object graphs with shared references and
//! cycles, polymorphic and extended dispatch, version evolution, world
//! snapshots combined with action histories, and the callback allow list.

use std::any::Any;
use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use tidepool_core::{ActionHistory, EditActionError, EditActionResult};
use tidepool_ecs::World;
use tidepool_ecs::archive::{
    Archivable, ArchivableExtended, ArchiveComponent, ArchiveError, FormatError, ObjectHeader,
    ReadSession, ReplayableAction, SkipSet, TypeRegistry, TypeTag, WriteSession, read_history,
    read_world, write_history, write_world,
};

// ---------------------------------------------------------------
// Fixture types
// ---------------------------------------------------------------

/// Inline value type: save metadata.
#[derive(Debug, Clone, PartialEq)]
struct SaveMeta {
    name: String,
    play_time: f64,
}

impl Archivable for SaveMeta {
    const TAG: TypeTag = TypeTag(0x01);
    const VERSION: u16 = 1;
    const NAME: &'static str = "SaveMeta";

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
        session.writer().write_string(&self.name)?;
        session.writer().write_f64(self.play_time)
    }

    fn read(
        session: &mut ReadSession<'_>,
        _version: u16,
        _ref_id: Option<u32>,
    ) -> Result<Rc<Self>, ArchiveError> {
        Ok(Rc::new(Self {
            name: session.reader().read_string()?,
            play_time: session.reader().read_f64()?,
        }))
    }
}

/// Reference type forming a linked structure; `next` may point back at an
/// earlier node, producing a cycle.
#[derive(Debug)]
struct Node {
    name: String,
    next: RefCell<Option<Rc<Node>>>,
}

impl Node {
    fn new(name: &str) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_owned(),
            next: RefCell::new(None),
        })
    }
}

impl Archivable for Node {
    const TAG: TypeTag = TypeTag(0x02);
    const VERSION: u16 = 1;
    const NAME: &'static str = "Node";

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
        session.writer().write_string(&self.name)?;
        match self.next.borrow().as_ref() {
            Some(next) => {
                let erased: Rc<dyn Any> = next.clone();
                session.write_object(&erased)
            }
            None => session.write_null(Self::TAG),
        }
    }

    fn read(
        session: &mut ReadSession<'_>,
        _version: u16,
        ref_id: Option<u32>,
    ) -> Result<Rc<Self>, ArchiveError> {
        let node = Rc::new(Self {
            name: session.reader().read_string()?,
            next: RefCell::new(None),
        });
        // Register before reading `next` so a cycle back to this node
        // resolves.
        if let Some(id) = ref_id {
            let erased: Rc<dyn Any> = node.clone();
            session.register_reference(id, erased)?;
        }
        *node.next.borrow_mut() = session.read_ref::<Node>()?;
        Ok(node)
    }
}

// Polymorphic shapes behind an abstract base tag.

const SHAPE: TypeTag = TypeTag(0x10);

#[derive(Debug, PartialEq)]
struct Circle {
    radius: f32,
}

impl Archivable for Circle {
    const TAG: TypeTag = TypeTag(0x11);
    const VERSION: u16 = 1;
    const NAME: &'static str = "Circle";

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
        session.writer().write_f32(self.radius)
    }

    fn read(
        session: &mut ReadSession<'_>,
        _version: u16,
        _ref_id: Option<u32>,
    ) -> Result<Rc<Self>, ArchiveError> {
        Ok(Rc::new(Self {
            radius: session.reader().read_f32()?,
        }))
    }
}

#[derive(Debug, PartialEq)]
struct Square {
    side: f32,
}

impl Archivable for Square {
    const TAG: TypeTag = TypeTag(0x12);
    const VERSION: u16 = 1;
    const NAME: &'static str = "Square";

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
        session.writer().write_f32(self.side)
    }

    fn read(
        session: &mut ReadSession<'_>,
        _version: u16,
        _ref_id: Option<u32>,
    ) -> Result<Rc<Self>, ArchiveError> {
        Ok(Rc::new(Self {
            side: session.reader().read_f32()?,
        }))
    }
}

// Extended generic family: all Slots<T> instances share one tag and are
// told apart by the type-argument name in the stream.

const SLOTS: TypeTag = TypeTag(0x20);

#[derive(Debug, PartialEq)]
struct Slots<T> {
    items: Vec<T>,
}

impl ArchivableExtended for Slots<f32> {
    const FAMILY: TypeTag = SLOTS;
    const TYPE_ARGUMENT: &'static str = "f32";

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
        session.writer().write_var_u32(self.items.len() as u32)?;
        for item in &self.items {
            session.writer().write_f32(*item)?;
        }
        Ok(())
    }
}

impl ArchivableExtended for Slots<u32> {
    const FAMILY: TypeTag = SLOTS;
    const TYPE_ARGUMENT: &'static str = "u32";

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
        session.writer().write_var_u32(self.items.len() as u32)?;
        for item in &self.items {
            session.writer().write_var_u32(*item)?;
        }
        Ok(())
    }
}

fn read_slots(
    session: &mut ReadSession<'_>,
    _version: u16,
    _ref_id: Option<u32>,
    type_argument: &str,
) -> Result<Rc<dyn Any>, ArchiveError> {
    match type_argument {
        "f32" => {
            let len = session.reader().read_var_u32()?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(session.reader().read_f32()?);
            }
            Ok(Rc::new(Slots { items }))
        }
        "u32" => {
            let len = session.reader().read_var_u32()?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(session.reader().read_var_u32()?);
            }
            Ok(Rc::new(Slots { items }))
        }
        other => Err(FormatError::UnknownTypeArgument(other.to_owned()).into()),
    }
}

// Callback receiver: a tool whose methods are allow-listed for replay.

#[derive(Debug, PartialEq)]
struct SpawnTool {
    batch: u32,
}

impl Archivable for SpawnTool {
    const TAG: TypeTag = TypeTag(0x30);
    const VERSION: u16 = 1;
    const NAME: &'static str = "SpawnTool";

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
        session.writer().write_var_u32(self.batch)
    }

    fn read(
        session: &mut ReadSession<'_>,
        _version: u16,
        _ref_id: Option<u32>,
    ) -> Result<Rc<Self>, ArchiveError> {
        Ok(Rc::new(Self {
            batch: session.reader().read_var_u32()?,
        }))
    }
}

fn spawn_batch(tool: &SpawnTool, world: &mut World) -> EditActionResult {
    for _ in 0..tool.batch {
        world.spawn();
    }
    Ok(())
}

fn despawn_batch(tool: &SpawnTool, world: &mut World) -> EditActionResult {
    // Despawn the most recently spawned entities (highest slot ids).
    let mut alive: Vec<_> = world.iter_entities().collect();
    let keep = alive.len().saturating_sub(tool.batch as usize);
    for entity in alive.split_off(keep) {
        world.despawn(entity);
    }
    Ok(())
}

// Component used by the combined save test.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Energy(u32);

impl ArchiveComponent for Energy {
    const TAG: u32 = 0x0001;
    const VERSION: u8 = 1;
    const NAME: &'static str = "Energy";

    fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
        session.writer().write_var_u32(self.0)
    }

    fn read(session: &mut ReadSession<'_>, _version: u8) -> Result<Self, ArchiveError> {
        Ok(Self(session.reader().read_var_u32()?))
    }
}

fn graph_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register_value::<SaveMeta>();
    registry.register_reference::<Node>();
    registry.register_base(SHAPE, "Shape");
    registry.register_reference_with_base::<Circle>(SHAPE);
    registry.register_reference_with_base::<Square>(SHAPE);
    registry.register_extended_family(SLOTS, "Slots", 1, true, read_slots);
    registry.register_extended_instance::<Slots<f32>>();
    registry.register_extended_instance::<Slots<u32>>();
    registry
}

fn write_archive(
    registry: &TypeRegistry,
    write: impl FnOnce(&mut WriteSession<'_>) -> Result<(), ArchiveError>,
) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    let mut session = WriteSession::new(registry, &mut buf, SkipSet::new()).unwrap();
    write(&mut session).unwrap();
    session.finish().unwrap();
    buf.into_inner()
}

// ---------------------------------------------------------------
// Object graphs
// ---------------------------------------------------------------

#[test]
fn value_type_round_trip() {
    let registry = graph_registry();
    let meta = SaveMeta {
        name: "slot 3".to_owned(),
        play_time: 1234.5,
    };

    let bytes = write_archive(&registry, |s| s.write_value(&meta));

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let loaded = session.read_value::<SaveMeta>().unwrap();
    session.finish().unwrap();
    assert_eq!(*loaded, meta);
}

#[test]
fn shared_reference_keeps_identity() {
    let registry = graph_registry();
    let shared = Node::new("shared");

    let bytes = write_archive(&registry, |s| {
        s.write_ref(&shared)?;
        s.write_ref(&shared)
    });

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let first = session.read_ref::<Node>().unwrap().unwrap();
    let second = session.read_ref::<Node>().unwrap().unwrap();
    session.finish().unwrap();

    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(first.name, "shared");
}

#[test]
fn distinct_objects_stay_distinct() {
    let registry = graph_registry();
    let a = Node::new("a");
    let b = Node::new("a"); // equal contents, different identity

    let bytes = write_archive(&registry, |s| {
        s.write_ref(&a)?;
        s.write_ref(&b)
    });

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let first = session.read_ref::<Node>().unwrap().unwrap();
    let second = session.read_ref::<Node>().unwrap().unwrap();
    session.finish().unwrap();

    assert!(!Rc::ptr_eq(&first, &second));
}

#[test]
fn reference_cycle_round_trips() {
    let registry = graph_registry();
    let a = Node::new("a");
    let b = Node::new("b");
    *a.next.borrow_mut() = Some(Rc::clone(&b));
    *b.next.borrow_mut() = Some(Rc::clone(&a));

    let bytes = write_archive(&registry, |s| s.write_ref(&a));

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let loaded_a = session.read_ref::<Node>().unwrap().unwrap();
    session.finish().unwrap();

    let loaded_b = loaded_a.next.borrow().clone().unwrap();
    assert_eq!(loaded_a.name, "a");
    assert_eq!(loaded_b.name, "b");
    let back = loaded_b.next.borrow().clone().unwrap();
    assert!(Rc::ptr_eq(&back, &loaded_a));
}

#[test]
fn self_cycle_round_trips() {
    let registry = graph_registry();
    let node = Node::new("ouroboros");
    *node.next.borrow_mut() = Some(Rc::clone(&node));

    let bytes = write_archive(&registry, |s| s.write_ref(&node));
    // Break the cycle so the fixture itself doesn't leak.
    *node.next.borrow_mut() = None;

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let loaded = session.read_ref::<Node>().unwrap().unwrap();
    session.finish().unwrap();

    let next = loaded.next.borrow().clone().unwrap();
    assert!(Rc::ptr_eq(&next, &loaded));
    *loaded.next.borrow_mut() = None;
}

#[test]
fn null_reference_round_trips() {
    let registry = graph_registry();
    let bytes = write_archive(&registry, |s| s.write_null(Node::TAG));

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    assert!(session.read_ref::<Node>().unwrap().is_none());
    session.finish().unwrap();
}

// ---------------------------------------------------------------
// Polymorphic and extended dispatch
// ---------------------------------------------------------------

#[test]
fn polymorphic_field_reads_concrete_type() {
    let registry = graph_registry();
    let circle: Rc<Circle> = Rc::new(Circle { radius: 2.0 });
    let square: Rc<Square> = Rc::new(Square { side: 3.0 });

    let bytes = write_archive(&registry, |s| {
        s.write_ref(&circle)?;
        s.write_ref(&square)
    });

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let first = session.read_object(Some(SHAPE)).unwrap().unwrap();
    let second = session.read_object(Some(SHAPE)).unwrap().unwrap();
    session.finish().unwrap();

    assert_eq!(
        first.downcast_ref::<Circle>(),
        Some(&Circle { radius: 2.0 })
    );
    assert_eq!(second.downcast_ref::<Square>(), Some(&Square { side: 3.0 }));
}

#[test]
fn declared_tag_mismatch_is_rejected() {
    let registry = graph_registry();
    let node = Node::new("n");
    let bytes = write_archive(&registry, |s| s.write_ref(&node));

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    // A Node payload where a Shape was declared: Node is not registered
    // under the Shape base.
    let err = session.read_object(Some(SHAPE)).unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Format(FormatError::TagMismatch { .. })
    ));
}

#[test]
fn extended_instances_dispatch_on_type_argument() {
    let registry = graph_registry();
    let floats: Rc<Slots<f32>> = Rc::new(Slots {
        items: vec![1.0, 2.5],
    });
    let ints: Rc<Slots<u32>> = Rc::new(Slots {
        items: vec![10, 20, 30],
    });

    let bytes = write_archive(&registry, |s| {
        let floats: Rc<dyn Any> = floats;
        let ints: Rc<dyn Any> = ints;
        s.write_object(&floats)?;
        s.write_object(&ints)
    });

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let first = session.read_object(Some(SLOTS)).unwrap().unwrap();
    let second = session.read_object(Some(SLOTS)).unwrap().unwrap();
    session.finish().unwrap();

    assert_eq!(
        first.downcast_ref::<Slots<f32>>().unwrap().items,
        vec![1.0, 2.5]
    );
    assert_eq!(
        second.downcast_ref::<Slots<u32>>().unwrap().items,
        vec![10, 20, 30]
    );
}

#[test]
fn shared_extended_object_back_references() {
    let registry = graph_registry();
    let slots: Rc<Slots<u32>> = Rc::new(Slots { items: vec![1] });
    let erased: Rc<dyn Any> = slots.clone();

    let bytes = write_archive(&registry, |s| {
        s.write_object(&erased)?;
        s.write_object(&erased)
    });

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let first = session.read_object(None).unwrap().unwrap();
    let second = session.read_object(None).unwrap().unwrap();
    session.finish().unwrap();

    assert!(Rc::ptr_eq(&first, &second));
}

#[test]
fn unknown_type_argument_fails_the_load() {
    let registry = graph_registry();
    let floats: Rc<Slots<f32>> = Rc::new(Slots { items: vec![] });
    let bytes = write_archive(&registry, |s| {
        let erased: Rc<dyn Any> = floats;
        s.write_object(&erased)
    });

    // A registry whose family reader knows no instances at all.
    let mut narrow = TypeRegistry::new();
    narrow.register_extended_family(SLOTS, "Slots", 1, true, |_, _, _, arg| {
        Err(FormatError::UnknownTypeArgument(arg.to_owned()).into())
    });

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&narrow, &mut cursor).unwrap();
    let err = session.read_object(None).unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Format(FormatError::UnknownTypeArgument(arg)) if arg == "f32"
    ));
}

// ---------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------

mod versioning {
    use super::*;

    /// The type as an older build wrote it: version 1, name only.
    #[derive(Debug)]
    struct ProfileV1 {
        name: String,
    }

    impl Archivable for ProfileV1 {
        const TAG: TypeTag = TypeTag(0x40);
        const VERSION: u16 = 1;
        const NAME: &'static str = "Profile";

        fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
            session.writer().write_string(&self.name)
        }

        fn read(
            session: &mut ReadSession<'_>,
            _version: u16,
            _ref_id: Option<u32>,
        ) -> Result<Rc<Self>, ArchiveError> {
            Ok(Rc::new(Self {
                name: session.reader().read_string()?,
            }))
        }
    }

    /// The current build: version 2 added `age`; reading a version-1
    /// payload defaults it.
    #[derive(Debug, PartialEq)]
    struct Profile {
        name: String,
        age: u32,
    }

    impl Archivable for Profile {
        const TAG: TypeTag = TypeTag(0x40);
        const VERSION: u16 = 2;
        const NAME: &'static str = "Profile";

        fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
            session.writer().write_string(&self.name)?;
            session.writer().write_var_u32(self.age)
        }

        fn read(
            session: &mut ReadSession<'_>,
            version: u16,
            _ref_id: Option<u32>,
        ) -> Result<Rc<Self>, ArchiveError> {
            let name = session.reader().read_string()?;
            let age = if version >= 2 {
                session.reader().read_var_u32()?
            } else {
                0
            };
            Ok(Rc::new(Self { name, age }))
        }
    }

    /// A future build's layout: version 3.
    #[derive(Debug)]
    struct ProfileV3;

    impl Archivable for ProfileV3 {
        const TAG: TypeTag = TypeTag(0x40);
        const VERSION: u16 = 3;
        const NAME: &'static str = "Profile";

        fn write(&self, session: &mut WriteSession<'_>) -> Result<(), ArchiveError> {
            session.writer().write_var_u32(0)
        }

        fn read(
            _: &mut ReadSession<'_>,
            _: u16,
            _: Option<u32>,
        ) -> Result<Rc<Self>, ArchiveError> {
            Ok(Rc::new(Self))
        }
    }

    fn registry_with<T: Archivable>() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register_value::<T>();
        registry
    }

    #[test]
    fn current_version_round_trips() {
        let registry = registry_with::<Profile>();
        let profile = Profile {
            name: "kelp".to_owned(),
            age: 4,
        };
        let bytes = write_archive(&registry, |s| s.write_value(&profile));

        let mut cursor = Cursor::new(bytes);
        let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
        assert_eq!(*session.read_value::<Profile>().unwrap(), profile);
    }

    #[test]
    fn older_version_is_upgraded_on_read() {
        let old = registry_with::<ProfileV1>();
        let bytes = write_archive(&old, |s| {
            s.write_value(&ProfileV1 {
                name: "kelp".to_owned(),
            })
        });

        let current = registry_with::<Profile>();
        let mut cursor = Cursor::new(bytes);
        let mut session = ReadSession::new(&current, &mut cursor).unwrap();
        let profile = session.read_value::<Profile>().unwrap();
        session.finish().unwrap();

        assert_eq!(profile.name, "kelp");
        assert_eq!(profile.age, 0);
    }

    #[test]
    fn newer_version_is_rejected() {
        let future = registry_with::<ProfileV3>();
        let bytes = write_archive(&future, |s| s.write_value(&ProfileV3));

        let current = registry_with::<Profile>();
        let mut cursor = Cursor::new(bytes);
        let mut session = ReadSession::new(&current, &mut cursor).unwrap();
        let err = session.read_value::<Profile>().unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Version {
                version: 3,
                current: 2,
                ..
            }
        ));
    }

    #[test]
    fn version_zero_is_rejected() {
        // Hand-crafted stream: empty bookkeeping slot, then a header whose
        // version byte is zero. No writer can produce this.
        let mut bytes = vec![0u8, 0, 0, 0];
        bytes.extend_from_slice(&0x40u32.to_le_bytes());

        let current = registry_with::<Profile>();
        let mut cursor = Cursor::new(bytes);
        let mut session = ReadSession::new(&current, &mut cursor).unwrap();
        let err = session.read_value::<Profile>().unwrap_err();
        assert!(matches!(err, ArchiveError::Version { version: 0, .. }));
    }

    #[test]
    fn writer_refuses_version_zero_header() {
        let header = ObjectHeader {
            tag: TypeTag(0x40),
            version: 0,
            is_reference: false,
            is_null: false,
            is_back_reference: false,
            is_extended: false,
        };
        assert!(matches!(header.pack(), Err(ArchiveError::Protocol(_))));
    }
}

// ---------------------------------------------------------------
// Corruption
// ---------------------------------------------------------------

#[test]
fn unknown_tag_fails_the_load() {
    let registry = graph_registry();
    let node = Node::new("n");
    let bytes = write_archive(&registry, |s| s.write_ref(&node));

    let empty = TypeRegistry::new();
    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&empty, &mut cursor).unwrap();
    let err = session.read_object(None).unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Format(FormatError::UnknownTag(tag)) if tag == Node::TAG.0
    ));
}

#[test]
fn truncated_archive_fails_cleanly() {
    let registry = graph_registry();
    let node = Node::new("a longer node name");
    let mut bytes = write_archive(&registry, |s| s.write_ref(&node));
    bytes.truncate(bytes.len() - 4);

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let err = session.read_ref::<Node>().unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Format(FormatError::UnexpectedEof)
    ));
}

#[test]
fn tampered_bookkeeping_count_is_detected() {
    let registry = graph_registry();
    let node = Node::new("n");
    let mut bytes = write_archive(&registry, |s| s.write_ref(&node));
    // Inflate the shared-object count in the bookkeeping slot.
    bytes[0] = bytes[0].wrapping_add(1);

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    session.read_ref::<Node>().unwrap();
    let err = session.finish().unwrap_err();
    assert!(matches!(
        err,
        ArchiveError::Format(FormatError::ReferenceCountMismatch { .. })
    ));
}

// ---------------------------------------------------------------
// Worlds and histories in one archive
// ---------------------------------------------------------------

fn replay_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register_component::<Energy>();
    registry.register_reference::<SpawnTool>();
    registry.allow_callback_target::<SpawnTool>("SpawnTool");
    registry.allow_callback_method::<SpawnTool>("SpawnTool", "spawn_batch", spawn_batch);
    registry.allow_callback_method::<SpawnTool>("SpawnTool", "despawn_batch", despawn_batch);
    registry
}

fn make_action(registry: &TypeRegistry, tool: &Rc<SpawnTool>, description: &str) -> ReplayableAction {
    let receiver: Rc<dyn Any> = tool.clone();
    let forward = registry
        .bind_callback("SpawnTool", "spawn_batch", receiver.clone())
        .unwrap();
    let reverse = registry
        .bind_callback("SpawnTool", "despawn_batch", receiver)
        .unwrap();
    ReplayableAction::new(description, forward, reverse)
}

#[test]
fn world_and_history_round_trip() {
    let registry = replay_registry();

    let mut world = World::new();
    let e = world.spawn();
    world.insert(e, Energy(40)).unwrap();

    let tool = Rc::new(SpawnTool { batch: 2 });
    let mut history: ActionHistory<World> = ActionHistory::new(16);
    history
        .execute(Box::new(make_action(&registry, &tool, "Spawn batch")), &mut world)
        .unwrap();
    assert_eq!(world.entity_count(), 3);
    history.undo(&mut world).unwrap();
    assert_eq!(world.entity_count(), 1);
    history
        .execute(Box::new(make_action(&registry, &tool, "Spawn batch again")), &mut world)
        .unwrap();
    history.undo(&mut world).unwrap();

    // One archive holding the world snapshot and the history.
    let mut buf = Cursor::new(Vec::new());
    let mut session = WriteSession::new(&registry, &mut buf, SkipSet::new()).unwrap();
    write_world(&mut session, &world).unwrap();
    write_history(&mut session, &history).unwrap();
    session.finish().unwrap();

    buf.set_position(0);
    let mut session = ReadSession::new(&registry, &mut buf).unwrap();
    let mut loaded_world = read_world(&mut session).unwrap();
    let mut loaded_history = read_history(&mut session, 16).unwrap();
    session.finish().unwrap();

    assert_eq!(loaded_world.entity_count(), 1);
    assert!(!loaded_history.can_undo());
    assert!(loaded_history.can_redo());
    assert_eq!(
        loaded_history.redo_descriptions().collect::<Vec<_>>(),
        vec!["Spawn batch again"]
    );

    // The restored redo entry replays against the loaded world.
    loaded_history.redo(&mut loaded_world).unwrap();
    assert_eq!(loaded_world.entity_count(), 3);
    loaded_history.undo(&mut loaded_world).unwrap();
    assert_eq!(loaded_world.entity_count(), 1);
}

#[test]
fn shared_receiver_keeps_identity_across_actions() {
    let registry = replay_registry();
    let tool = Rc::new(SpawnTool { batch: 1 });

    let mut history: ActionHistory<World> = ActionHistory::new(16);
    history.restore_undo(Box::new(make_action(&registry, &tool, "one")));
    history.restore_undo(Box::new(make_action(&registry, &tool, "two")));

    let bytes = write_archive(&registry, |s| write_history(s, &history));

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&registry, &mut cursor).unwrap();
    let loaded = read_history(&mut session, 16).unwrap();
    session.finish().unwrap();

    let receivers: Vec<Rc<dyn Any>> = loaded
        .iter_undo()
        .map(|action| {
            action
                .as_any()
                .downcast_ref::<ReplayableAction>()
                .unwrap()
                .forward()
                .receiver()
                .clone()
        })
        .collect();
    assert_eq!(receivers.len(), 2);
    assert!(Rc::ptr_eq(&receivers[0], &receivers[1]));
}

#[test]
fn history_with_foreign_action_is_a_protocol_error() {
    #[derive(Debug)]
    struct Opaque;

    impl tidepool_core::EditAction<World> for Opaque {
        fn apply(&mut self, _: &mut World) -> EditActionResult {
            Ok(())
        }
        fn undo(&mut self, _: &mut World) -> EditActionResult {
            Ok(())
        }
        fn description(&self) -> &str {
            "Opaque"
        }
    }

    let registry = replay_registry();
    let mut history: ActionHistory<World> = ActionHistory::new(4);
    history.restore_undo(Box::new(Opaque));

    let mut buf = Cursor::new(Vec::new());
    let mut session = WriteSession::new(&registry, &mut buf, SkipSet::new()).unwrap();
    let err = write_history(&mut session, &history).unwrap_err();
    assert!(matches!(err, ArchiveError::Protocol(_)));
}

// ---------------------------------------------------------------
// Callback allow list
// ---------------------------------------------------------------

#[test]
fn unlisted_target_is_rejected_on_read() {
    let registry = replay_registry();
    let tool = Rc::new(SpawnTool { batch: 1 });
    let mut history: ActionHistory<World> = ActionHistory::new(4);
    history.restore_undo(Box::new(make_action(&registry, &tool, "spawn")));
    let bytes = write_archive(&registry, |s| write_history(s, &history));

    // Reader build dropped the SpawnTool allow-listing entirely.
    let mut restricted = TypeRegistry::new();
    restricted.register_reference::<SpawnTool>();

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&restricted, &mut cursor).unwrap();
    let err = read_history(&mut session, 4).unwrap_err();
    assert!(matches!(err, ArchiveError::Security(_)));
}

#[test]
fn unlisted_method_is_rejected_on_read() {
    let registry = replay_registry();
    let tool = Rc::new(SpawnTool { batch: 1 });
    let mut history: ActionHistory<World> = ActionHistory::new(4);
    history.restore_undo(Box::new(make_action(&registry, &tool, "spawn")));
    let bytes = write_archive(&registry, |s| write_history(s, &history));

    // Target allow-listed, but without the archived methods.
    let mut restricted = TypeRegistry::new();
    restricted.register_reference::<SpawnTool>();
    restricted.allow_callback_target::<SpawnTool>("SpawnTool");

    let mut cursor = Cursor::new(bytes);
    let mut session = ReadSession::new(&restricted, &mut cursor).unwrap();
    let err = read_history(&mut session, 4).unwrap_err();
    assert!(matches!(err, ArchiveError::Security(_)));
}

#[test]
fn bind_rejects_unlisted_target_and_method() {
    let registry = replay_registry();
    let tool: Rc<dyn Any> = Rc::new(SpawnTool { batch: 1 });

    assert!(matches!(
        registry.bind_callback("GrowTool", "grow", tool.clone()),
        Err(ArchiveError::Security(_))
    ));
    assert!(matches!(
        registry.bind_callback("SpawnTool", "grow", tool.clone()),
        Err(ArchiveError::Security(_))
    ));

    // Receiver of the wrong concrete type is also rejected.
    let imposter: Rc<dyn Any> = Rc::new(42u32);
    assert!(matches!(
        registry.bind_callback("SpawnTool", "spawn_batch", imposter),
        Err(ArchiveError::Security(_))
    ));
}

#[test]
fn bound_callback_invokes_method() {
    let registry = replay_registry();
    let tool: Rc<dyn Any> = Rc::new(SpawnTool { batch: 3 });
    let callback = registry
        .bind_callback("SpawnTool", "spawn_batch", tool)
        .unwrap();

    let mut world = World::new();
    callback.invoke(&mut world).unwrap();
    assert_eq!(world.entity_count(), 3);
    assert_eq!(callback.type_name(), "SpawnTool");
    assert_eq!(callback.method_name(), "spawn_batch");
}

#[test]
fn invoker_errors_propagate() {
    let mut registry = TypeRegistry::new();
    registry.allow_callback_target::<SpawnTool>("SpawnTool");
    registry.allow_callback_method::<SpawnTool>("SpawnTool", "fail", |_, _| {
        Err(EditActionError::InvalidState("always fails".into()))
    });

    let tool: Rc<dyn Any> = Rc::new(SpawnTool { batch: 1 });
    let callback = registry.bind_callback("SpawnTool", "fail", tool).unwrap();
    let mut world = World::new();
    assert!(matches!(
        callback.invoke(&mut world),
        Err(EditActionError::InvalidState(_))
    ));
}
