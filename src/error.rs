use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::result;

use bufstream::IntoInnerError as BufError;
#[cfg(feature = "native-tls")]
use native_tls::Error as TlsError;
#[cfg(feature = "native-tls")]
use native_tls::HandshakeError as TlsHandshakeError;
#[cfg(feature = "native-tls")]
use std::net::TcpStream;

use crate::handle::ObjectHandle;
use crate::status::Status;
use crate::wire::DecodeError;

pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur in this client.
///
/// Protocol statuses are deliberately *not* here: a non-success status from
/// the server is data, returned through
/// [`OperationResult`](crate::status::OperationResult). `Error` covers the
/// client-side fatal kinds only: transport loss, malformed frames, and
/// caller lifecycle bugs. None of them is retried internally.
#[derive(Debug)]
pub enum Error {
    /// An `io::Error` while reading or writing the network stream.
    Io(IoError),
    /// An error from the `native_tls` library during the TLS handshake.
    #[cfg(feature = "native-tls")]
    TlsHandshake(TlsHandshakeError<TcpStream>),
    /// An error from the `native_tls` library while managing the socket.
    #[cfg(feature = "native-tls")]
    Tls(TlsError),
    /// The connection was terminated unexpectedly.
    ConnectionLost,
    /// The call deadline elapsed; the session is now degraded.
    Timeout,
    /// An in-flight call was cancelled by a [`Canceller`](crate::session::Canceller).
    Cancelled,
    /// The session refused the call; it must be reset after a timeout.
    Degraded,
    /// The session is closed. Terminal.
    Closed,
    /// The response frame could not be decoded.
    Malformed(DecodeError),
    /// A non-success status, surfaced by
    /// [`OperationResult::into_payload`](crate::status::OperationResult::into_payload).
    Status(Status),
    /// Use of a released handle, a foreign session's handle, or a handle of
    /// the wrong kind for the operation.
    InvalidHandle(ObjectHandle),
    /// An operation was invoked out of its required sequence.
    InvalidState(&'static str),
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Error {
        Error::Io(err)
    }
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Error {
        Error::Malformed(err)
    }
}

#[cfg(feature = "native-tls")]
impl From<TlsHandshakeError<TcpStream>> for Error {
    fn from(err: TlsHandshakeError<TcpStream>) -> Error {
        Error::TlsHandshake(err)
    }
}

#[cfg(feature = "native-tls")]
impl From<TlsError> for Error {
    fn from(err: TlsError) -> Error {
        Error::Tls(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => fmt::Display::fmt(e, f),
            #[cfg(feature = "native-tls")]
            Error::TlsHandshake(e) => fmt::Display::fmt(e, f),
            #[cfg(feature = "native-tls")]
            Error::Tls(e) => fmt::Display::fmt(e, f),
            Error::ConnectionLost => f.write_str("connection lost"),
            Error::Timeout => f.write_str("call timed out; session degraded"),
            Error::Cancelled => f.write_str("call cancelled"),
            Error::Degraded => f.write_str("session degraded; reset it before calling again"),
            Error::Closed => f.write_str("session closed"),
            Error::Malformed(e) => write!(f, "malformed response: {}", e),
            Error::Status(status) => write!(f, "server returned {}", status),
            Error::InvalidHandle(handle) => write!(f, "invalid handle {:?}", handle),
            Error::InvalidState(what) => write!(f, "invalid state: {}", what),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            #[cfg(feature = "native-tls")]
            Error::Tls(e) => Some(e),
            Error::Malformed(e) => Some(e),
            _ => None,
        }
    }
}
