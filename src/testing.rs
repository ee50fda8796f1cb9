//! Enable the `test_helpers` feature to expose helpers for building wire
//! response frames when testing code that uses this crate, or when writing a
//! protocol fake.
//!
//! ```toml
//! [dev-dependencies]
//! # mirror your dependency's configuration and add test_helpers
//! emsmdb = { version = "0.1", features = ["test_helpers"] }
//! ```

use crate::status::Status;
use crate::wire::{self, Opcode, Prop, PropValue, Request, Response};

/// Builds one encoded response frame.
#[derive(Debug)]
pub struct ResponseBuilder {
    opcode: Opcode,
    corr_id: u32,
    status: Status,
    props: Vec<Prop>,
}

impl ResponseBuilder {
    /// A success response to the call carrying `corr_id`.
    pub fn new(opcode: Opcode, corr_id: u32) -> ResponseBuilder {
        ResponseBuilder {
            opcode,
            corr_id,
            status: Status::SUCCESS,
            props: Vec::new(),
        }
    }

    pub fn status(mut self, status: Status) -> ResponseBuilder {
        self.status = status;
        self
    }

    pub fn prop(mut self, id: u16, value: PropValue) -> ResponseBuilder {
        self.props.push(Prop::new(id, value));
        self
    }

    pub fn build(self) -> Vec<u8> {
        wire::encode_response(&Response {
            opcode: self.opcode,
            corr_id: self.corr_id,
            status: self.status,
            props: self.props,
        })
    }
}

/// Concatenates prebuilt frames into one stream buffer.
pub fn stream(frames: &[Vec<u8>]) -> Vec<u8> {
    frames.concat()
}

/// Splits a written byte stream back into the requests it carries, in order.
///
/// Panics on undecodable input; this is test support, not a codec.
pub fn decode_written(mut buf: &[u8]) -> Vec<Request> {
    let mut requests = Vec::new();
    while !buf.is_empty() {
        let header: &[u8; wire::HEADER_LEN] = buf[..wire::HEADER_LEN]
            .try_into()
            .expect("short frame header");
        let len = wire::payload_len(header).expect("bad frame header");
        let (frame, rest) = buf.split_at(wire::HEADER_LEN + len);
        requests.push(wire::decode_request(frame).expect("bad request frame"));
        buf = rest;
    }
    requests
}
