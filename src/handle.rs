//! The object handle table.
//!
//! A handle is a client-local reference to a server-side object, valid only
//! within its owning session. Handles live in an arena whose slots are never
//! reused, so a released handle can never silently alias a later object;
//! using one is always reported as a lifecycle bug.

use std::fmt;

use crate::error::{Error, Result};

/// What a handle refers to on the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Store,
    Folder,
    Message,
}

/// Opaque reference to a live entry in one session's [`HandleTable`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    index: u32,
    session: u32,
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({}.{})", self.session, self.index)
    }
}

#[derive(Debug)]
struct Entry {
    kind: ObjectKind,
    server_id: u64,
    parent: Option<ObjectHandle>,
}

/// Arena of live object handles for one session.
///
/// Every Folder and Message handle has a parent chain terminating at a Store
/// handle of the same session; the chain rules are enforced when a handle is
/// registered, not when it is used.
#[derive(Debug)]
pub struct HandleTable {
    session: u32,
    slots: Vec<Option<Entry>>,
    live: usize,
}

impl HandleTable {
    pub(crate) fn new(session: u32) -> HandleTable {
        HandleTable {
            session,
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Registers a new handle for a server-side object.
    ///
    /// A Store takes no parent; a Folder hangs under a Store or another
    /// Folder; a Message hangs under a Folder.
    pub fn register(
        &mut self,
        kind: ObjectKind,
        server_id: u64,
        parent: Option<ObjectHandle>,
    ) -> Result<ObjectHandle> {
        match (kind, parent) {
            (ObjectKind::Store, None) => {}
            (ObjectKind::Store, Some(_)) => {
                return Err(Error::InvalidState("a store handle takes no parent"));
            }
            (_, None) => {
                return Err(Error::InvalidState("folder and message handles need a parent"));
            }
            (ObjectKind::Folder, Some(parent)) => match self.entry(parent)?.kind {
                ObjectKind::Store | ObjectKind::Folder => {}
                ObjectKind::Message => {
                    return Err(Error::InvalidState("a folder cannot hang under a message"));
                }
            },
            (ObjectKind::Message, Some(parent)) => match self.entry(parent)?.kind {
                ObjectKind::Folder => {}
                _ => return Err(Error::InvalidState("a message must hang under a folder")),
            },
        }
        let index = self.slots.len() as u32;
        self.slots.push(Some(Entry {
            kind,
            server_id,
            parent,
        }));
        self.live += 1;
        Ok(ObjectHandle {
            index,
            session: self.session,
        })
    }

    /// The 64-bit server-side identifier behind `handle`.
    pub fn resolve(&self, handle: ObjectHandle) -> Result<u64> {
        Ok(self.entry(handle)?.server_id)
    }

    pub fn kind(&self, handle: ObjectHandle) -> Result<ObjectKind> {
        Ok(self.entry(handle)?.kind)
    }

    pub fn parent(&self, handle: ObjectHandle) -> Result<Option<ObjectHandle>> {
        Ok(self.entry(handle)?.parent)
    }

    /// Frees the slot behind `handle`.
    ///
    /// Releasing a handle twice is an error, not a no-op: it signals a caller
    /// lifecycle bug.
    pub fn release(&mut self, handle: ObjectHandle) -> Result<()> {
        if handle.session != self.session {
            return Err(Error::InvalidHandle(handle));
        }
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.live -= 1;
                Ok(())
            }
            _ => Err(Error::InvalidHandle(handle)),
        }
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Resolves `handle`, additionally requiring its kind.
    pub(crate) fn expect_kind(&self, handle: ObjectHandle, kind: ObjectKind) -> Result<u64> {
        let entry = self.entry(handle)?;
        if entry.kind != kind {
            return Err(Error::InvalidHandle(handle));
        }
        Ok(entry.server_id)
    }

    fn entry(&self, handle: ObjectHandle) -> Result<&Entry> {
        if handle.session != self.session {
            return Err(Error::InvalidHandle(handle));
        }
        self.slots
            .get(handle.index as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidHandle(handle))
    }
}
