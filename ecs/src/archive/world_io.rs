//! World snapshots: the entity list and per-entity component payloads.
//!
//! Wire layout, after the session's bookkeeping slot:
//!
//! ```text
//! varint  world id
//! varint  entity count hint (pre-sizing only, not authoritative)
//! repeat:
//!   u8 1
//!   entity handle (the record's own identity)
//!   varint component count
//!   repeat: u32 compact component header, then the component payload
//! u8 0
//! ```
//!
//! Loading never reuses archived slot indices: every archived handle maps
//! to a freshly spawned entity through the session's remap table, so a
//! snapshot can be loaded into a process where those slots are taken.

use super::error::{ArchiveError, FormatError};
use super::header::{pack_component_header, unpack_component_header};
use super::session::{ReadSession, WriteSession};
use crate::world::World;

/// Upper bound on the up-front slot reservation taken from the archived
/// entity-count hint. The hint is untrusted input; a corrupt stream must
/// not be able to demand an arbitrarily large allocation before a single
/// entity record is decoded.
const MAX_ENTITY_RESERVE: u32 = 4096;

/// Writes a snapshot of `world`, omitting entities in the session's skip
/// set. Component order inside a record follows component tag order.
pub fn write_world(session: &mut WriteSession<'_>, world: &World) -> Result<(), ArchiveError> {
    let registry = session.registry();
    session.writer().write_var_u32(world.id())?;

    let serialized: Vec<_> = world
        .iter_entities()
        .filter(|e| !session.skip_set().contains(*e))
        .collect();
    session.writer().write_var_u32(serialized.len() as u32)?;

    for entity in serialized {
        session.writer().write_u8(1)?;
        session.write_entity(entity)?;

        let present: Vec<_> = registry
            .components()
            .filter(|c| (c.has)(world, entity))
            .collect();
        session.writer().write_var_u32(present.len() as u32)?;
        for component in present {
            let header = pack_component_header(component.tag, component.current_version)?;
            session.writer().write_u32(header)?;
            (component.write)(session, world, entity)?;
        }
    }

    session.writer().write_u8(0)?;
    log::debug!("archived world {}", world.id());
    Ok(())
}

/// Reads a snapshot into a brand-new world.
///
/// Any error aborts the load and drops the partial world; the session
/// itself stays consistent.
pub fn read_world(session: &mut ReadSession<'_>) -> Result<World, ArchiveError> {
    session.begin_world_load()?;
    match read_world_body(session) {
        Ok(()) => session.finish_world_load(),
        Err(e) => {
            session.abort_world_load();
            Err(e)
        }
    }
}

fn read_world_body(session: &mut ReadSession<'_>) -> Result<(), ArchiveError> {
    let registry = session.registry();
    let archived_world_id = session.reader().read_var_u32()?;
    let hint = session.reader().read_var_u32()?;
    session
        .world_load_mut()?
        .world
        .reserve_entities(hint.min(MAX_ENTITY_RESERVE) as usize);

    loop {
        match session.reader().read_u8()? {
            0 => break,
            1 => {}
            _ => return Err(FormatError::Malformed("entity list continuation byte").into()),
        }

        let old = session.read_raw_entity()?;
        if old.is_null() {
            return Err(FormatError::Malformed("null entity record").into());
        }
        let entity = session.remap_entity(old)?;
        session.world_load_mut()?.declared += 1;

        let count = session.reader().read_var_u32()?;
        for _ in 0..count {
            let raw = session.reader().read_u32()?;
            let (tag, version) = unpack_component_header(raw);
            let entry = registry
                .component(tag)
                .ok_or(FormatError::UnknownComponentTag(tag))?;
            if version == 0 || version > entry.current_version {
                return Err(ArchiveError::Version {
                    tag,
                    version: version as u16,
                    current: entry.current_version as u16,
                });
            }
            (entry.read)(session, entity, version)?;
        }
    }

    log::debug!("loaded snapshot of world {archived_world_id}");
    Ok(())
}
