//! Allow-listed callback serialization and persistable edit actions.
//!
//! Undo/redo actions capture their effect as a pair of bound callbacks:
//! a receiver object plus a named method on it. Persisting a callback
//! writes the receiver's registered type name, the receiver itself (through
//! normal object serialization, so shared receivers dedup), and the method
//! name. Loading one is gated by an explicit allow list: the type name must
//! have been allow-listed, the decoded receiver must have exactly the
//! registered type, and the method name must have been allow-listed on that
//! type. Every check runs on every read; nothing is cached between loads.
//!
//! Free functions and static methods have no receiver and therefore cannot
//! be expressed here at all: [`BoundCallback`] values only come out of
//! [`TypeRegistry::bind_callback`], which requires a receiver of an
//! allow-listed type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tidepool_core::{ActionHistory, EditAction, EditActionError, EditActionResult};

use super::error::{ArchiveError, FormatError};
use super::registry::TypeRegistry;
use super::session::{ReadSession, WriteSession};
use crate::world::World;

/// Erased method invoker: downcasts the receiver and calls the registered
/// method on it against the world.
pub(crate) type CallbackInvoker = Arc<dyn Fn(&dyn Any, &mut World) -> EditActionResult>;

/// One allow-listed receiver type and its allow-listed methods.
pub(crate) struct CallbackTarget {
    pub type_id: TypeId,
    pub methods: HashMap<String, CallbackInvoker>,
}

impl TypeRegistry {
    /// Allow-lists `T` as a callback receiver type under a stable name.
    ///
    /// The name is what appears in the stream; it is independent of the
    /// Rust type path, so refactors never change the format.
    pub fn allow_callback_target<T: 'static>(&mut self, type_name: &str) {
        let previous = self.callbacks.insert(
            type_name.to_owned(),
            CallbackTarget {
                type_id: TypeId::of::<T>(),
                methods: HashMap::new(),
            },
        );
        assert!(
            previous.is_none(),
            "callback target '{type_name}' allow-listed twice"
        );
    }

    /// Allow-lists one method on a previously allow-listed target type.
    pub fn allow_callback_method<T: 'static>(
        &mut self,
        type_name: &str,
        method_name: &str,
        method: fn(&T, &mut World) -> EditActionResult,
    ) {
        let target = self
            .callbacks
            .get_mut(type_name)
            .unwrap_or_else(|| panic!("callback target '{type_name}' is not allow-listed"));
        assert_eq!(
            target.type_id,
            TypeId::of::<T>(),
            "method '{method_name}' registered with a different type than target '{type_name}'"
        );
        let invoker: CallbackInvoker = Arc::new(move |receiver, world| {
            let receiver = receiver.downcast_ref::<T>().ok_or_else(|| {
                EditActionError::InvalidState("callback receiver has the wrong type".into())
            })?;
            method(receiver, world)
        });
        let previous = target.methods.insert(method_name.to_owned(), invoker);
        assert!(
            previous.is_none(),
            "callback method '{type_name}::{method_name}' allow-listed twice"
        );
    }

    /// Binds an allow-listed method to a receiver, producing a callback
    /// that can be invoked and archived. Fails if the type name, the
    /// receiver's concrete type or the method is outside the allow list.
    pub fn bind_callback(
        &self,
        type_name: &str,
        method_name: &str,
        receiver: Rc<dyn Any>,
    ) -> Result<BoundCallback, ArchiveError> {
        let target = self.callbacks.get(type_name).ok_or_else(|| {
            ArchiveError::Security(format!("callback target '{type_name}' is not allow-listed"))
        })?;
        if receiver.as_ref().type_id() != target.type_id {
            return Err(ArchiveError::Security(format!(
                "receiver is not an instance of callback target '{type_name}'"
            )));
        }
        let invoker = target.methods.get(method_name).cloned().ok_or_else(|| {
            ArchiveError::Security(format!(
                "callback method '{type_name}::{method_name}' is not allow-listed"
            ))
        })?;
        Ok(BoundCallback {
            type_name: type_name.to_owned(),
            method_name: method_name.to_owned(),
            receiver,
            invoker,
        })
    }
}

/// An allow-listed method bound to its receiver object.
#[derive(Clone)]
pub struct BoundCallback {
    type_name: String,
    method_name: String,
    receiver: Rc<dyn Any>,
    invoker: CallbackInvoker,
}

impl BoundCallback {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn receiver(&self) -> &Rc<dyn Any> {
        &self.receiver
    }

    pub fn invoke(&self, world: &mut World) -> EditActionResult {
        (self.invoker)(self.receiver.as_ref(), world)
    }
}

impl fmt::Debug for BoundCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundCallback({}::{})", self.type_name, self.method_name)
    }
}

/// Writes a bound callback: type name, receiver object, method name.
///
/// The receiver goes through normal object serialization, so a receiver
/// shared by several callbacks is written once and back-referenced.
pub fn write_callback(
    session: &mut WriteSession<'_>,
    callback: &BoundCallback,
) -> Result<(), ArchiveError> {
    session.writer().write_string(&callback.type_name)?;
    session.write_object(&callback.receiver)?;
    session.writer().write_string(&callback.method_name)?;
    Ok(())
}

/// Reads a bound callback, enforcing the allow list at every step.
pub fn read_callback(session: &mut ReadSession<'_>) -> Result<BoundCallback, ArchiveError> {
    let type_name = session.reader().read_string()?;
    let registry = session.registry();
    let target = registry.callbacks.get(&type_name).ok_or_else(|| {
        ArchiveError::Security(format!("callback target '{type_name}' is not allow-listed"))
    })?;

    let receiver = session
        .read_object(None)?
        .ok_or_else(|| ArchiveError::NullValue("callback receiver".into()))?;
    if receiver.as_ref().type_id() != target.type_id {
        return Err(FormatError::Malformed("callback receiver type").into());
    }

    let method_name = session.reader().read_string()?;
    let invoker = target.methods.get(&method_name).cloned().ok_or_else(|| {
        ArchiveError::Security(format!(
            "callback method '{type_name}::{method_name}' is not allow-listed"
        ))
    })?;

    Ok(BoundCallback {
        type_name,
        method_name,
        receiver,
        invoker,
    })
}

/// An edit action whose forward and reverse effects are bound callbacks,
/// making it archivable as part of an action history.
#[derive(Debug)]
pub struct ReplayableAction {
    description: String,
    forward: BoundCallback,
    reverse: BoundCallback,
}

impl ReplayableAction {
    pub fn new(
        description: impl Into<String>,
        forward: BoundCallback,
        reverse: BoundCallback,
    ) -> Self {
        Self {
            description: description.into(),
            forward,
            reverse,
        }
    }

    pub fn forward(&self) -> &BoundCallback {
        &self.forward
    }

    pub fn reverse(&self) -> &BoundCallback {
        &self.reverse
    }
}

impl EditAction<World> for ReplayableAction {
    fn apply(&mut self, target: &mut World) -> EditActionResult {
        self.forward.invoke(target)
    }

    fn undo(&mut self, target: &mut World) -> EditActionResult {
        self.reverse.invoke(target)
    }

    fn description(&self) -> &str {
        &self.description
    }
}

fn write_action_list<'a>(
    session: &mut WriteSession<'_>,
    count: usize,
    actions: impl Iterator<Item = &'a dyn EditAction<World>>,
) -> Result<(), ArchiveError> {
    session.writer().write_var_u32(count as u32)?;
    for action in actions {
        let action = action
            .as_any()
            .downcast_ref::<ReplayableAction>()
            .ok_or_else(|| {
                ArchiveError::Protocol(format!(
                    "action '{}' is not replayable and cannot be archived",
                    action.description()
                ))
            })?;
        session.writer().write_string(&action.description)?;
        write_callback(session, &action.forward)?;
        write_callback(session, &action.reverse)?;
    }
    Ok(())
}

/// Writes an action history: the undo stack then the redo stack, each
/// oldest action first.
///
/// Every action must be a [`ReplayableAction`]; a history holding any other
/// action kind at save time is a protocol error.
pub fn write_history(
    session: &mut WriteSession<'_>,
    history: &ActionHistory<World>,
) -> Result<(), ArchiveError> {
    write_action_list(session, history.undo_count(), history.iter_undo())?;
    write_action_list(session, history.redo_count(), history.iter_redo())?;
    log::debug!(
        "archived action history: {} undo, {} redo",
        history.undo_count(),
        history.redo_count()
    );
    Ok(())
}

/// Reads an action history written by [`write_history`]. The actions are
/// restored onto the stacks without being applied; the loaded world is
/// already in the state the history's cursor describes.
pub fn read_history(
    session: &mut ReadSession<'_>,
    max_undo: usize,
) -> Result<ActionHistory<World>, ArchiveError> {
    let mut history = ActionHistory::new(max_undo);
    let undo_count = session.reader().read_var_u32()?;
    for _ in 0..undo_count {
        let action = read_action(session)?;
        history.restore_undo(Box::new(action));
    }
    let redo_count = session.reader().read_var_u32()?;
    for _ in 0..redo_count {
        let action = read_action(session)?;
        history.restore_redo(Box::new(action));
    }
    Ok(history)
}

fn read_action(session: &mut ReadSession<'_>) -> Result<ReplayableAction, ArchiveError> {
    let description = session.reader().read_string()?;
    let forward = read_callback(session)?;
    let reverse = read_callback(session)?;
    Ok(ReplayableAction {
        description,
        forward,
        reverse,
    })
}
