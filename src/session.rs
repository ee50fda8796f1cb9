//! The session layer: one authenticated connection, one call in flight.
//!
//! A [`Session`] owns the byte-stream channel and multiplexes strictly
//! sequential request/response exchanges over it, matching each response to
//! its request by correlation ID. The `&mut self` receiver on [`Session::call`]
//! is the mutual-exclusion guard: a session can never have two calls in
//! flight. Independent sessions may run concurrently on separate threads.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bufstream::BufStream;
#[cfg(feature = "native-tls")]
use native_tls::{TlsConnector, TlsStream};

use crate::error::{Error, Result};
use crate::wire::{self, DecodeError, Opcode, Prop, PropValue, Request, Response};

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

/// Lifecycle of a session.
///
/// A timed-out call leaves the session `Degraded`: the response that never
/// arrived could still be sitting in the channel, so further calls are
/// refused until [`Session::reset`]. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Degraded,
    Closed,
}

/// Must be implemented for a transport in order for a `Session` using that
/// transport to support call deadlines.
///
/// See also `std::net::TcpStream::set_read_timeout`.
pub trait SetReadTimeout {
    /// Set the timeout for subsequent reads to the given one.
    ///
    /// If `timeout` is `None`, the read timeout should be removed.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;
}

impl SetReadTimeout for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        TcpStream::set_read_timeout(self, timeout).map_err(Error::Io)
    }
}

#[cfg(feature = "native-tls")]
impl SetReadTimeout for TlsStream<TcpStream> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.get_ref().set_read_timeout(timeout).map_err(Error::Io)
    }
}

/// Stream to interface with the server. One request/response exchange at a
/// time; no pipelining.
#[derive(Debug)]
pub struct Session<T: Read + Write> {
    stream: BufStream<T>,
    id: u32,
    corr_id: u32,
    cookie: Option<Vec<u8>>,
    state: SessionState,
    cancelled: Arc<AtomicBool>,
    pub debug: bool,
}

/// Cancels an in-flight [`Session::call`] from another thread.
///
/// Cancelling shuts the socket down, which unblocks the waiting caller with
/// [`Error::Cancelled`] and closes the session for good.
#[derive(Debug)]
pub struct Canceller {
    flag: Arc<AtomicBool>,
    sock: TcpStream,
}

impl Canceller {
    pub fn cancel(&self) -> Result<()> {
        self.flag.store(true, Ordering::SeqCst);
        match self.sock.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Session<TcpStream> {
    /// Connects to the server over plain TCP.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Session<TcpStream>> {
        let stream = TcpStream::connect(addr)?;
        Ok(Session::new(stream))
    }

    /// A handle that can cancel this session's in-flight call from another
    /// thread.
    pub fn canceller(&self) -> Result<Canceller> {
        Ok(Canceller {
            flag: Arc::clone(&self.cancelled),
            sock: self.stream.get_ref().try_clone()?,
        })
    }
}

#[cfg(feature = "native-tls")]
impl Session<TlsStream<TcpStream>> {
    /// Connects to the server over TLS.
    ///
    /// Use the domain parameter for SNI and hostname verification.
    pub fn secure_connect<A: ToSocketAddrs>(
        addr: A,
        domain: &str,
        connector: &TlsConnector,
    ) -> Result<Session<TlsStream<TcpStream>>> {
        let stream = TcpStream::connect(addr)?;
        let stream = connector.connect(domain, stream)?;
        Ok(Session::new(stream))
    }

    /// A handle that can cancel this session's in-flight call from another
    /// thread.
    pub fn canceller(&self) -> Result<Canceller> {
        Ok(Canceller {
            flag: Arc::clone(&self.cancelled),
            sock: self.stream.get_ref().get_ref().try_clone()?,
        })
    }
}

impl<T: Read + Write> Session<T> {
    /// Creates a session over an already-established channel.
    ///
    /// The channel is assumed to be authenticated and secured by whoever
    /// supplied it; the session only frames requests and responses on it.
    pub fn new(stream: T) -> Session<T> {
        Session {
            stream: BufStream::new(stream),
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            corr_id: 0,
            cookie: None,
            state: SessionState::Active,
            cancelled: Arc::new(AtomicBool::new(false)),
            debug: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Process-unique identity of this session; handles embed it.
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn set_cookie(&mut self, cookie: Vec<u8>) {
        self.cookie = Some(cookie);
    }

    /// Returns a degraded session to service.
    ///
    /// Only meaningful after a timeout; a closed session stays closed.
    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            SessionState::Active | SessionState::Degraded => {
                self.state = SessionState::Active;
                Ok(())
            }
            SessionState::Closed => Err(Error::Closed),
        }
    }

    /// Closes the session. Terminal; any later call fails with
    /// [`Error::Closed`].
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Issues one request and blocks until its response arrives.
    ///
    /// The response must echo the request's correlation ID and opcode;
    /// anything else means the channel has lost framing and the session is
    /// closed. After logon the server context cookie rides along on every
    /// request.
    pub fn call(&mut self, opcode: Opcode, mut props: Vec<Prop>) -> Result<Response> {
        match self.state {
            SessionState::Active => {}
            SessionState::Degraded => return Err(Error::Degraded),
            SessionState::Closed => return Err(Error::Closed),
        }
        if let Some(cookie) = &self.cookie {
            props.push(Prop::new(
                wire::tags::SESSION_COOKIE,
                PropValue::Binary(cookie.clone()),
            ));
        }
        self.corr_id += 1;
        let request = Request {
            opcode,
            corr_id: self.corr_id,
            props,
        };
        if self.debug {
            print!("C: {} #{}\n", opcode, self.corr_id);
        }
        let buf = wire::encode_request(&request);
        self.write_frame(&buf)?;
        let response = self.read_response()?;
        if response.corr_id != self.corr_id {
            self.state = SessionState::Closed;
            return Err(Error::Malformed(DecodeError::CorrelationMismatch {
                sent: self.corr_id,
                received: response.corr_id,
            }));
        }
        if response.opcode != opcode {
            self.state = SessionState::Closed;
            return Err(Error::Malformed(DecodeError::OpcodeMismatch {
                sent: opcode,
                received: response.opcode,
            }));
        }
        if self.debug {
            print!("S: {} #{} {}\n", response.opcode, response.corr_id, response.status);
        }
        Ok(response)
    }

    fn write_frame(&mut self, buf: &[u8]) -> Result<()> {
        if let Err(e) = self.stream.write_all(buf) {
            return Err(self.fail_io(e));
        }
        if let Err(e) = self.stream.flush() {
            return Err(self.fail_io(e));
        }
        Ok(())
    }

    fn read_response(&mut self) -> Result<Response> {
        let mut header = [0; wire::HEADER_LEN];
        self.read_full(&mut header)?;
        let len = wire::payload_len(&header)?;
        let mut frame = Vec::with_capacity(wire::HEADER_LEN + len);
        frame.extend_from_slice(&header);
        frame.resize(wire::HEADER_LEN + len, 0);
        self.read_full(&mut frame[wire::HEADER_LEN..])?;
        Ok(wire::decode_response(&frame)?)
    }

    fn read_full(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_io(e)),
        }
    }

    fn fail_io(&mut self, e: io::Error) -> Error {
        if self.cancelled.load(Ordering::SeqCst) {
            self.state = SessionState::Closed;
            return Error::Cancelled;
        }
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                self.state = SessionState::Degraded;
                Error::Timeout
            }
            io::ErrorKind::UnexpectedEof => {
                self.state = SessionState::Closed;
                Error::ConnectionLost
            }
            _ => {
                self.state = SessionState::Closed;
                Error::Io(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn written(&self) -> &T {
        self.stream.get_ref()
    }
}

impl<T: SetReadTimeout + Read + Write> Session<T> {
    /// Bounds the wait for any single response.
    ///
    /// When the deadline elapses the call fails with [`Error::Timeout`] and
    /// the session degrades; see [`Session::reset`].
    pub fn set_call_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream.get_mut().set_read_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_stream::MockStream;
    use crate::status::Status;
    use crate::testing::ResponseBuilder;
    use crate::wire::tags;

    #[test]
    fn call_round_trip() {
        let reply = ResponseBuilder::new(Opcode::SetSpooler, 1).build();
        let mut session = Session::new(MockStream::new(reply));
        let response = session
            .call(Opcode::SetSpooler, vec![Prop::new(tags::STORE_ID, PropValue::Id(0x10))])
            .unwrap();
        assert_eq!(response.status, Status::SUCCESS);
        assert_eq!(session.state(), SessionState::Active);

        let written = wire::decode_request(&session.written().written_buf).unwrap();
        assert_eq!(written.opcode, Opcode::SetSpooler);
        assert_eq!(written.corr_id, 1);
        assert_eq!(written.id_value(tags::STORE_ID), Some(0x10));
    }

    #[test]
    fn cookie_rides_along_once_set() {
        let reply = ResponseBuilder::new(Opcode::SetSpooler, 1).build();
        let mut session = Session::new(MockStream::new(reply));
        session.set_cookie(vec![0xAA, 0xBB]);
        session.call(Opcode::SetSpooler, Vec::new()).unwrap();

        let written = wire::decode_request(&session.written().written_buf).unwrap();
        assert_eq!(written.binary(tags::SESSION_COOKIE), Some(&[0xAA, 0xBB][..]));
    }

    #[test]
    fn correlation_mismatch_closes_session() {
        let reply = ResponseBuilder::new(Opcode::SetSpooler, 9).build();
        let mut session = Session::new(MockStream::new(reply));
        match session.call(Opcode::SetSpooler, Vec::new()) {
            Err(Error::Malformed(DecodeError::CorrelationMismatch { sent: 1, received: 9 })) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.call(Opcode::SetSpooler, Vec::new()),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn opcode_mismatch_closes_session() {
        let reply = ResponseBuilder::new(Opcode::SubmitMessage, 1).build();
        let mut session = Session::new(MockStream::new(reply));
        match session.call(Opcode::SetSpooler, Vec::new()) {
            Err(Error::Malformed(DecodeError::OpcodeMismatch { .. })) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn call_survives_fragmented_reads() {
        let reply = ResponseBuilder::new(Opcode::SetSpooler, 1).build();
        let mut session = Session::new(MockStream::new(reply).with_delay());
        let response = session.call(Opcode::SetSpooler, Vec::new()).unwrap();
        assert_eq!(response.status, Status::SUCCESS);
    }

    #[test]
    fn io_error_closes_session() {
        let mut session = Session::new(MockStream::default().with_err());
        assert!(matches!(
            session.call(Opcode::SetSpooler, Vec::new()),
            Err(Error::Io(_))
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn eof_is_connection_lost() {
        let mut session = Session::new(MockStream::default().with_eof());
        assert!(matches!(
            session.call(Opcode::SetSpooler, Vec::new()),
            Err(Error::ConnectionLost)
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn timeout_degrades_until_reset() {
        let stream = MockStream::default().with_err_kind(io::ErrorKind::WouldBlock);
        let mut session = Session::new(stream);
        assert!(matches!(
            session.call(Opcode::SetSpooler, Vec::new()),
            Err(Error::Timeout)
        ));
        assert_eq!(session.state(), SessionState::Degraded);
        assert!(matches!(
            session.call(Opcode::SetSpooler, Vec::new()),
            Err(Error::Degraded)
        ));
        session.reset().unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn closed_session_cannot_reset() {
        let mut session = Session::new(MockStream::default().with_eof());
        let _ = session.call(Opcode::SetSpooler, Vec::new());
        assert!(matches!(session.reset(), Err(Error::Closed)));
    }

    #[test]
    fn short_declared_payload_is_malformed() {
        let mut reply = ResponseBuilder::new(Opcode::Logon, 1)
            .prop(tags::STORE_ID, PropValue::Id(0x10))
            .build();
        // Chop the tail and shrink the declared length with it, so the
        // damage lands in the property block rather than the stream read.
        reply.truncate(reply.len() - 2);
        let cut = (reply.len() - wire::HEADER_LEN) as u32;
        reply[6..10].copy_from_slice(&cut.to_le_bytes());
        let mut session = Session::new(MockStream::new(reply));
        assert!(matches!(
            session.call(Opcode::Logon, Vec::new()),
            Err(Error::Malformed(DecodeError::Truncated))
        ));
    }

    #[test]
    fn oversized_payload_is_malformed() {
        let mut reply = ResponseBuilder::new(Opcode::Logon, 1).build();
        reply[6..10].copy_from_slice(&(wire::MAX_PAYLOAD + 1).to_le_bytes());
        let mut session = Session::new(MockStream::new(reply));
        assert!(matches!(
            session.call(Opcode::Logon, Vec::new()),
            Err(Error::Malformed(DecodeError::OversizedPayload(_)))
        ));
    }
}
