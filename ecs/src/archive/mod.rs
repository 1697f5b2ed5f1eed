//! Binary graph archival for game saves.
//!
//! The archive format persists object graphs with shared references and
//! cycles, whole entity worlds, and undo/redo action histories, all through
//! a closed-world [`TypeRegistry`]: every persistable type is registered up
//! front with a hand-assigned tag and an explicit version, and every
//! callback that may be rebuilt from a save sits behind an allow list.
//!
//! A save is produced inside a [`WriteSession`] and loaded inside a
//! [`ReadSession`]; the session owns all per-archive state (reference
//! identity tables, the entity handle remap), so a failed load leaves
//! nothing half-mutated behind.
//!
//! ```no_run
//! use std::io::Cursor;
//! use tidepool_ecs::archive::{ReadSession, SkipSet, TypeRegistry, WriteSession};
//! use tidepool_ecs::archive::{read_world, write_world};
//! use tidepool_ecs::World;
//!
//! # fn main() -> Result<(), tidepool_ecs::archive::ArchiveError> {
//! let registry = TypeRegistry::new(); // plus register_* calls at startup
//! let world = World::new();
//!
//! let mut buffer = Cursor::new(Vec::new());
//! let mut session = WriteSession::new(&registry, &mut buffer, SkipSet::new())?;
//! write_world(&mut session, &world)?;
//! session.finish()?;
//!
//! buffer.set_position(0);
//! let mut session = ReadSession::new(&registry, &mut buffer)?;
//! let loaded = read_world(&mut session)?;
//! session.finish()?;
//! # let _ = loaded;
//! # Ok(())
//! # }
//! ```

mod callback;
mod error;
mod header;
mod registry;
mod resolver;
mod session;
mod skip;
mod stream;
mod world_io;

pub use callback::{
    BoundCallback, ReplayableAction, read_callback, read_history, write_callback, write_history,
};
pub use error::{ArchiveError, FormatError};
pub use header::{
    COMPONENT_TAG_MAX, COMPONENT_VERSION_MAX, ObjectHeader, TypeTag, pack_component_header,
    unpack_component_header,
};
pub use registry::{
    Archivable, ArchivableExtended, ArchiveComponent, ExtendedReadFn, ReadFn, TypeRegistry,
    WriteFn,
};
pub use session::{ReadSession, WriteSession};
pub use skip::SkipSet;
pub use stream::{ArchiveReader, ArchiveWriter, WriteSeek};
pub use world_io::{read_world, write_world};
