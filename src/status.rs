use std::fmt;

use crate::error::{Error, Result};

/// A 32-bit protocol status code returned by the server for every operation.
///
/// Status codes are values, not exceptions: many operations have expected
/// non-success outcomes (see [`Client::abort_submit`]), so the dispatcher
/// hands the code back inside an [`OperationResult`] and leaves the policy
/// decision to the caller.
///
/// [`Client::abort_submit`]: crate::client::Client::abort_submit
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u32);

impl Status {
    /// The operation fully applied server-side.
    pub const SUCCESS: Status = Status(0x0000_0000);
    /// Generic server-side failure.
    pub const CALL_FAILED: Status = Status(0x8000_4005);
    /// The server does not support the requested variant of the operation.
    pub const NO_SUPPORT: Status = Status(0x8004_0102);
    /// The referenced object does not exist on the server.
    pub const NOT_FOUND: Status = Status(0x8004_010F);
    /// The mailbox logon was rejected.
    pub const LOGON_FAILED: Status = Status(0x8004_0111);
    /// `AbortSubmit` lost the race: the message is already in delivery.
    pub const UNABLE_TO_ABORT: Status = Status(0x8004_0114);
    /// `AbortSubmit` lost the race: the message was already handed to the
    /// transport before the abort arrived.
    pub const MESSAGE_PROCESSED: Status = Status(0x8004_0601);

    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }

    fn name(self) -> Option<&'static str> {
        match self {
            Status::SUCCESS => Some("Success"),
            Status::CALL_FAILED => Some("CallFailed"),
            Status::NO_SUPPORT => Some("NoSupport"),
            Status::NOT_FOUND => Some("NotFound"),
            Status::LOGON_FAILED => Some("LogonFailed"),
            Status::UNABLE_TO_ABORT => Some("UnableToAbort"),
            Status::MESSAGE_PROCESSED => Some("MessageProcessed"),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{:#010x} ({})", self.0, name),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({})", self)
    }
}

/// Outcome of one dispatched operation: the server status plus, on success,
/// the operation-specific payload.
///
/// Never partially valid: the payload is present exactly when the status is
/// [`Status::SUCCESS`].
#[derive(Debug)]
pub struct OperationResult<P = ()> {
    status: Status,
    payload: Option<P>,
}

impl<P> OperationResult<P> {
    pub(crate) fn success(payload: P) -> OperationResult<P> {
        OperationResult {
            status: Status::SUCCESS,
            payload: Some(payload),
        }
    }

    pub(crate) fn failure(status: Status) -> OperationResult<P> {
        debug_assert!(!status.is_success());
        OperationResult {
            status,
            payload: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn payload(&self) -> Option<&P> {
        self.payload.as_ref()
    }

    /// Unwraps the payload, turning a non-success status into
    /// [`Error::Status`] for callers that treat it as fatal.
    pub fn into_payload(self) -> Result<P> {
        match self.payload {
            Some(payload) => Ok(payload),
            None => Err(Error::Status(self.status)),
        }
    }
}

/// Shorthand for what every dispatcher operation returns: `Err` only for
/// client-side fatal errors, `Ok` for anything the server had a say in.
pub type OpResult<P = ()> = Result<OperationResult<P>>;
