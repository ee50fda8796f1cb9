//! The operation dispatcher.
//!
//! A [`Client`] wraps a [`Session`] and exposes one method per protocol
//! operation. It resolves handles through its [`HandleTable`], rejects
//! out-of-sequence calls before they reach the wire, and registers new
//! handles only when the server reported success: a failed operation never
//! changes client-visible state.

use std::collections::HashMap;
use std::io::{Read, Write};

use chrono::Utc;

use crate::error::{Error, Result};
use crate::handle::{HandleTable, ObjectHandle, ObjectKind};
use crate::session::Session;
use crate::status::{OpResult, OperationResult};
use crate::types::{FolderIdentity, LockState, MessageDraft, WellKnownFolder};
use crate::wire::{tags, DecodeError, Opcode, Prop, PropValue, Response};

/// Client-side progression of the spooler lock on one message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum LockProgress {
    #[default]
    Unlocked,
    FirstLocked,
    FirstFinished,
    SecondLocked,
    SecondFinished,
}

impl LockProgress {
    fn advance(self, requested: LockState) -> Option<LockProgress> {
        match (self, requested) {
            (LockProgress::Unlocked, LockState::FirstLock) => Some(LockProgress::FirstLocked),
            (LockProgress::FirstLocked, LockState::FirstFinished) => {
                Some(LockProgress::FirstFinished)
            }
            (LockProgress::FirstFinished, LockState::SecondLock) => {
                Some(LockProgress::SecondLocked)
            }
            (LockProgress::SecondLocked, LockState::SecondFinished) => {
                Some(LockProgress::SecondFinished)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct MessageState {
    draft: MessageDraft,
    saved: bool,
    lock: LockProgress,
}

/// Dispatches typed operations over a [`Session`].
///
/// The session, the handle table and all per-message bookkeeping sit behind
/// the same `&mut self` borrow, so handle registration can never race an
/// operation that uses the handle. A `Client` is single-threaded by
/// construction; run several clients for concurrency.
#[derive(Debug)]
pub struct Client<T: Read + Write> {
    session: Session<T>,
    handles: HandleTable,
    messages: HashMap<ObjectHandle, MessageState>,
    folders: HashMap<WellKnownFolder, FolderIdentity>,
    spooler: bool,
}

fn unit_result(response: Response) -> OperationResult<()> {
    if response.status.is_success() {
        OperationResult::success(())
    } else {
        OperationResult::failure(response.status)
    }
}

fn require_id(response: &Response, id: u16) -> Result<u64> {
    response
        .id_value(id)
        .ok_or(Error::Malformed(DecodeError::MissingProperty(id)))
}

fn require_binary(response: &Response, id: u16) -> Result<Vec<u8>> {
    match response.prop(id) {
        Some(PropValue::Binary(bytes)) => Ok(bytes.clone()),
        _ => Err(Error::Malformed(DecodeError::MissingProperty(id))),
    }
}

fn require_strings(response: &Response, id: u16) -> Result<Vec<String>> {
    match response.prop(id) {
        Some(PropValue::StringArray(items)) => Ok(items.clone()),
        _ => Err(Error::Malformed(DecodeError::MissingProperty(id))),
    }
}

impl<T: Read + Write> Client<T> {
    pub fn new(session: Session<T>) -> Client<T> {
        let handles = HandleTable::new(session.id());
        Client {
            session,
            handles,
            messages: HashMap::new(),
            folders: HashMap::new(),
            spooler: false,
        }
    }

    /// Read access to the handle table, e.g. for parent-chain queries.
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// The underlying session, e.g. to set a call deadline or reset it after
    /// a timeout.
    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    /// The 64-bit server-side ID behind `handle`.
    pub fn object_id(&self, handle: ObjectHandle) -> Result<u64> {
        self.handles.resolve(handle)
    }

    /// The draft last pushed for `message`, if any content was pushed.
    pub fn draft(&self, message: ObjectHandle) -> Option<&MessageDraft> {
        self.messages.get(&message).map(|state| &state.draft)
    }

    /// Logs on to `mailbox` and opens its message store.
    ///
    /// On success the store handle is registered and the server's session
    /// cookie is attached to every subsequent request. A rejected logon
    /// surfaces as a status (typically [`Status::LOGON_FAILED`]); there is
    /// nothing to retry.
    ///
    /// [`Status::LOGON_FAILED`]: crate::status::Status::LOGON_FAILED
    pub fn open_msg_store(&mut self, mailbox: &str) -> OpResult<ObjectHandle> {
        let props = vec![Prop::new(tags::MAILBOX, PropValue::String(mailbox.to_owned()))];
        let response = self.session.call(Opcode::Logon, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        let store_id = require_id(&response, tags::STORE_ID)?;
        let cookie = require_binary(&response, tags::SESSION_COOKIE)?;
        self.session.set_cookie(cookie);
        let handle = self.handles.register(ObjectKind::Store, store_id, None)?;
        Ok(OperationResult::success(handle))
    }

    /// Resolves one of the store's well-known folders.
    ///
    /// The identity is fetched from the server at most once per session and
    /// folder kind; later calls answer from the cache without a round trip.
    pub fn get_default_folder(
        &mut self,
        store: ObjectHandle,
        which: WellKnownFolder,
    ) -> OpResult<FolderIdentity> {
        let store_id = self.handles.expect_kind(store, ObjectKind::Store)?;
        if let Some(folder) = self.folders.get(&which) {
            return Ok(OperationResult::success(*folder));
        }
        let props = vec![
            Prop::new(tags::STORE_ID, PropValue::Id(store_id)),
            Prop::new(tags::DEFAULT_FOLDER, PropValue::Long(which.code())),
        ];
        let response = self.session.call(Opcode::GetDefaultFolder, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        let folder = FolderIdentity::new(require_id(&response, tags::FOLDER_ID)?, Some(which));
        self.folders.insert(which, folder);
        Ok(OperationResult::success(folder))
    }

    /// Opens `folder` within the store, registering a Folder handle whose
    /// parent is `store`.
    pub fn open_folder(
        &mut self,
        store: ObjectHandle,
        folder: FolderIdentity,
    ) -> OpResult<ObjectHandle> {
        let store_id = self.handles.expect_kind(store, ObjectKind::Store)?;
        let props = vec![
            Prop::new(tags::STORE_ID, PropValue::Id(store_id)),
            Prop::new(tags::FOLDER_ID, PropValue::Id(folder.id())),
        ];
        let response = self.session.call(Opcode::OpenFolder, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        let handle = self
            .handles
            .register(ObjectKind::Folder, folder.id(), Some(store))?;
        Ok(OperationResult::success(handle))
    }

    /// The transport address types the server can deliver to, in server
    /// order. One shot; call again for a fresh listing.
    pub fn address_types(&mut self, store: ObjectHandle) -> OpResult<Vec<String>> {
        let store_id = self.handles.expect_kind(store, ObjectKind::Store)?;
        let props = vec![Prop::new(tags::STORE_ID, PropValue::Id(store_id))];
        let response = self.session.call(Opcode::AddressTypes, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        let types = require_strings(&response, tags::ADDRESS_TYPES)?;
        Ok(OperationResult::success(types))
    }

    /// Creates an empty message under `folder` and registers its handle.
    pub fn create_message(&mut self, folder: ObjectHandle) -> OpResult<ObjectHandle> {
        let folder_id = self.handles.expect_kind(folder, ObjectKind::Folder)?;
        let props = vec![Prop::new(tags::FOLDER_ID, PropValue::Id(folder_id))];
        let response = self.session.call(Opcode::CreateMessage, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        let message_id = require_id(&response, tags::MESSAGE_ID)?;
        let handle = self
            .handles
            .register(ObjectKind::Message, message_id, Some(folder))?;
        self.messages.insert(handle, MessageState::default());
        Ok(OperationResult::success(handle))
    }

    /// Pushes draft content onto an unsaved message.
    ///
    /// The draft is kept client-side, keyed by the message handle, until the
    /// message is saved; a committed draft is immutable.
    pub fn set_properties(&mut self, message: ObjectHandle, draft: &MessageDraft) -> OpResult<()> {
        let message_id = self.handles.expect_kind(message, ObjectKind::Message)?;
        if self.message_state(message)?.saved {
            return Err(Error::InvalidState("draft is committed; saved messages are immutable"));
        }
        let mut props = vec![Prop::new(tags::MESSAGE_ID, PropValue::Id(message_id))];
        props.extend(draft.props());
        let response = self.session.call(Opcode::SetProperties, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        if let Some(state) = self.messages.get_mut(&message) {
            state.draft = draft.clone();
        }
        Ok(OperationResult::success(()))
    }

    /// Commits the message, stamping the client submit time. Required before
    /// [`Client::submit_message`] or [`Client::transport_send`].
    pub fn save_changes(&mut self, folder: ObjectHandle, message: ObjectHandle) -> OpResult<()> {
        let folder_id = self.handles.expect_kind(folder, ObjectKind::Folder)?;
        let message_id = self.handles.expect_kind(message, ObjectKind::Message)?;
        if self.message_state(message)?.saved {
            return Err(Error::InvalidState("message already saved"));
        }
        let props = vec![
            Prop::new(tags::FOLDER_ID, PropValue::Id(folder_id)),
            Prop::new(tags::MESSAGE_ID, PropValue::Id(message_id)),
            Prop::new(tags::CLIENT_SUBMIT_TIME, PropValue::Time(Utc::now())),
        ];
        let response = self.session.call(Opcode::SaveChangesMessage, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        if let Some(state) = self.messages.get_mut(&message) {
            state.saved = true;
        }
        Ok(OperationResult::success(()))
    }

    /// Hands a saved message to the server for delivery.
    ///
    /// Submission is not idempotent, so nothing here retries; an unsaved
    /// message is rejected before any bytes hit the wire.
    pub fn submit_message(&mut self, message: ObjectHandle) -> OpResult<()> {
        let message_id = self.handles.expect_kind(message, ObjectKind::Message)?;
        if !self.message_state(message)?.saved {
            return Err(Error::InvalidState("submit requires a saved message"));
        }
        let props = vec![Prop::new(tags::MESSAGE_ID, PropValue::Id(message_id))];
        let response = self.session.call(Opcode::SubmitMessage, props)?;
        Ok(unit_result(response))
    }

    /// Best-effort attempt to pull a submitted message back.
    ///
    /// The server races the abort against its own delivery, so
    /// [`Status::UNABLE_TO_ABORT`] and [`Status::MESSAGE_PROCESSED`] are
    /// expected outcomes alongside success; only other statuses indicate a
    /// real failure. The loose contract is deliberate; callers decide.
    ///
    /// [`Status::UNABLE_TO_ABORT`]: crate::status::Status::UNABLE_TO_ABORT
    /// [`Status::MESSAGE_PROCESSED`]: crate::status::Status::MESSAGE_PROCESSED
    pub fn abort_submit(
        &mut self,
        store: ObjectHandle,
        folder: ObjectHandle,
        message: ObjectHandle,
    ) -> OpResult<()> {
        let store_id = self.handles.expect_kind(store, ObjectKind::Store)?;
        let folder_id = self.handles.expect_kind(folder, ObjectKind::Folder)?;
        let message_id = self.handles.expect_kind(message, ObjectKind::Message)?;
        let props = vec![
            Prop::new(tags::STORE_ID, PropValue::Id(store_id)),
            Prop::new(tags::FOLDER_ID, PropValue::Id(folder_id)),
            Prop::new(tags::MESSAGE_ID, PropValue::Id(message_id)),
        ];
        let response = self.session.call(Opcode::AbortSubmit, props)?;
        Ok(unit_result(response))
    }

    /// Deletes messages out of `folder` by their server-side IDs.
    pub fn delete_messages(&mut self, folder: ObjectHandle, ids: &[u64]) -> OpResult<()> {
        let folder_id = self.handles.expect_kind(folder, ObjectKind::Folder)?;
        let props = vec![
            Prop::new(tags::FOLDER_ID, PropValue::Id(folder_id)),
            Prop::new(tags::MESSAGE_ID, PropValue::IdArray(ids.to_vec())),
        ];
        let response = self.session.call(Opcode::DeleteMessages, props)?;
        Ok(unit_result(response))
    }

    /// Declares this session an email spooler. Must precede any
    /// [`Client::spooler_lock_message`].
    pub fn set_spooler(&mut self, store: ObjectHandle) -> OpResult<()> {
        let store_id = self.handles.expect_kind(store, ObjectKind::Store)?;
        let props = vec![Prop::new(tags::STORE_ID, PropValue::Id(store_id))];
        let response = self.session.call(Opcode::SetSpooler, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        self.spooler = true;
        Ok(OperationResult::success(()))
    }

    /// Advances the spooler lock on `message`.
    ///
    /// Transitions must follow `FirstLock`, `FirstFinished`, `SecondLock`,
    /// `SecondFinished` in order; an out-of-order request fails with
    /// [`Error::InvalidState`] before any round trip is spent on it.
    pub fn spooler_lock_message(
        &mut self,
        store: ObjectHandle,
        message: ObjectHandle,
        state: LockState,
    ) -> OpResult<()> {
        let store_id = self.handles.expect_kind(store, ObjectKind::Store)?;
        let message_id = self.handles.expect_kind(message, ObjectKind::Message)?;
        if !self.spooler {
            return Err(Error::InvalidState("SetSpooler must precede SpoolerLockMessage"));
        }
        let next = self
            .message_state(message)?
            .lock
            .advance(state)
            .ok_or(Error::InvalidState("spooler lock requested out of order"))?;
        let props = vec![
            Prop::new(tags::STORE_ID, PropValue::Id(store_id)),
            Prop::new(tags::MESSAGE_ID, PropValue::Id(message_id)),
            Prop::new(tags::LOCK_STATE, PropValue::Long(state.code())),
        ];
        let response = self.session.call(Opcode::SpoolerLockMessage, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        if let Some(message_state) = self.messages.get_mut(&message) {
            message_state.lock = next;
        }
        Ok(OperationResult::success(()))
    }

    /// Sends a saved message straight through the transport, returning the
    /// transport-assigned property values verbatim.
    pub fn transport_send(&mut self, message: ObjectHandle) -> OpResult<Vec<Prop>> {
        let message_id = self.handles.expect_kind(message, ObjectKind::Message)?;
        if !self.message_state(message)?.saved {
            return Err(Error::InvalidState("transport send requires a saved message"));
        }
        let props = vec![Prop::new(tags::MESSAGE_ID, PropValue::Id(message_id))];
        let response = self.session.call(Opcode::TransportSend, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        Ok(OperationResult::success(response.props))
    }

    /// The store's temporary transport folder.
    pub fn get_transport_folder(&mut self, store: ObjectHandle) -> OpResult<FolderIdentity> {
        let store_id = self.handles.expect_kind(store, ObjectKind::Store)?;
        let props = vec![Prop::new(tags::STORE_ID, PropValue::Id(store_id))];
        let response = self.session.call(Opcode::GetTransportFolder, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        let folder = FolderIdentity::new(require_id(&response, tags::FOLDER_ID)?, None);
        Ok(OperationResult::success(folder))
    }

    /// Releases `handle` on the server and frees its slot.
    ///
    /// The slot (and any draft state) is freed only on success; releasing a
    /// dead handle is an error, never a silent no-op.
    pub fn release(&mut self, handle: ObjectHandle) -> OpResult<()> {
        let server_id = self.handles.resolve(handle)?;
        let props = vec![Prop::new(tags::OBJECT_ID, PropValue::Id(server_id))];
        let response = self.session.call(Opcode::Release, props)?;
        if !response.status.is_success() {
            return Ok(OperationResult::failure(response.status));
        }
        self.handles.release(handle)?;
        self.messages.remove(&handle);
        Ok(OperationResult::success(()))
    }

    fn message_state(&self, message: ObjectHandle) -> Result<&MessageState> {
        self.messages
            .get(&message)
            .ok_or(Error::InvalidHandle(message))
    }
}
