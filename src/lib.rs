//! A client for a session-oriented, binary mail-object RPC protocol.
//!
//! The protocol is stateful: a logon opens a message *store*, folders and
//! messages are opened or created beneath it, and every server-side object is
//! addressed through a client-local [`ObjectHandle`] that lives exactly as
//! long as the caller keeps it registered. Operations are strict
//! request/response exchanges over one connection; see [`session::Session`]
//! for the channel and [`client::Client`] for the typed operations.
//!
//! Every operation returns an [`OperationResult`] carrying the server's
//! 32-bit status code, because for several operations a non-success status is
//! an expected outcome rather than an error (submission aborts race the
//! server's own delivery, for instance). Client-side misuse, such as a
//! released handle, an out-of-order spooler lock, or submitting an unsaved
//! message, fails fast with an [`error::Error`] before anything reaches the
//! wire.
//!
//! # Usage
//!
//! ```no_run
//! use emsmdb::client::Client;
//! use emsmdb::session::Session;
//! use emsmdb::{MessageDraft, WellKnownFolder};
//!
//! fn main() -> emsmdb::error::Result<()> {
//!     let session = Session::connect(("mail.example.com", 7225))?;
//!     let mut client = Client::new(session);
//!
//!     let store = client.open_msg_store("jdoe")?.into_payload()?;
//!     let outbox = client
//!         .get_default_folder(store, WellKnownFolder::Outbox)?
//!         .into_payload()?;
//!     let folder = client.open_folder(store, outbox)?.into_payload()?;
//!
//!     let message = client.create_message(folder)?.into_payload()?;
//!     let draft = MessageDraft {
//!         subject: Some("Hello".into()),
//!         body: Some("first message".into()),
//!         recipients: vec!["jdoe@example.com".into()],
//!     };
//!     client.set_properties(message, &draft)?.into_payload()?;
//!     client.save_changes(folder, message)?.into_payload()?;
//!     client.submit_message(message)?.into_payload()?;
//!
//!     client.release(message)?;
//!     client.release(folder)?;
//!     client.release(store)?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod session;
pub mod wire;

mod handle;
mod status;
mod types;

pub use crate::client::Client;
pub use crate::handle::{HandleTable, ObjectHandle, ObjectKind};
pub use crate::session::{Canceller, Session, SessionState, SetReadTimeout};
pub use crate::status::{OpResult, OperationResult, Status};
pub use crate::types::*;

#[cfg(any(test, feature = "test_helpers"))]
pub mod testing;

#[cfg(test)]
mod mock_stream;
