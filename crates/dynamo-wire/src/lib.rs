//! Binary wire protocol: `[1-byte tag | 4-byte big-endian length | payload]`.
//!
//! [`Frame`] handles the length-prefixed framing; [`Message`] handles the
//! twelve payload shapes named by the tag table, each postcard-encoded.
//! Decoding is incremental and partial-frame tolerant, matching the shape of
//! a connection's read loop: `Frame::decode` consumes bytes from a
//! `BytesMut` only once a complete frame is available, and returns `Ok(None)`
//! otherwise so the caller can wait for more data.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dynamo_types::{Context, Hostname, Key, KeyHash, MembershipOp, Timestamp, View};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the frame header: 1-byte tag + 4-byte big-endian length.
pub const FRAME_HEADER_SIZE: usize = 5;

pub const TAG_CLIENT_COMMAND: u8 = 0x00;
pub const TAG_MEMBERSHIP_PREPARE: u8 = 0x01;
pub const TAG_MEMBERSHIP_OK: u8 = 0xFF;
pub const TAG_MEMBERSHIP_COMMIT: u8 = 0x10;
pub const TAG_GET_FILE: u8 = 0x07;
pub const TAG_STORE_FILE: u8 = 0x08;
pub const TAG_STORE_FILE_RESPONSE: u8 = 0x70;
pub const TAG_GET_FILE_RESPONSE: u8 = 0x80;
pub const TAG_FORWARDED_REQ: u8 = 0x0A;
pub const TAG_RESPONSE_FOR_FORWARD: u8 = 0x0B;
pub const TAG_HANDOFF: u8 = 0x0C;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame payload exceeds maximum size ({0} bytes)")]
    PayloadTooLarge(usize),
    #[error("unknown message tag: {0:#04x}")]
    UnknownTag(u8),
    #[error("postcard encode error: {0}")]
    Encode(#[from] postcard::Error),
    #[error("message tag {0:#04x} does not match expected payload shape")]
    TagMismatch(u8),
}

pub type WireResult<T> = Result<T, WireError>;

/// Largest payload this implementation will decode, guarding against a
/// corrupt or hostile length prefix causing an unbounded allocation.
const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// A decoded but not-yet-interpreted wire frame: a tag plus its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet contain a full frame. On
    /// success, the consumed bytes are removed from `buf`.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let tag = buf[0];
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if len > MAX_PAYLOAD_BYTES {
            return Err(WireError::PayloadTooLarge(len));
        }
        if buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }
        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(len).freeze();
        Ok(Some(Frame { tag, payload }))
    }

    /// Appends this frame's wire representation to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }
}

/// Request to add (1) or remove (2) a member, carried by `0x01`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPrepare {
    pub view: View,
    pub request_id: u64,
    pub op: MembershipOp,
    pub host: Hostname,
}

/// Unconditional vote for a prepare, carried by `0xFF`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipOk {
    pub view: View,
    pub request_id: u64,
}

/// Authoritative membership change, carried by `0x10`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipCommit {
    pub view: View,
    pub op: MembershipOp,
    pub hosts: Vec<Hostname>,
}

/// A replica-side read, carried by `0x07`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFile {
    pub key: Key,
    pub corr_id: Timestamp,
}

/// A replica-side write, carried by `0x08`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    pub key: Key,
    pub value: String,
    pub context: Context,
    pub corr_id: Timestamp,
}

/// Acknowledgement of a `StoreFile`, carried by `0x70`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFileResponse {
    pub corr_id: Timestamp,
    pub key: Key,
    pub context: Context,
    pub value: String,
}

/// Reply to a `GetFile`: every locally stored (context, value) row for the
/// key, undeduplicated — the coordinator is responsible for calling
/// `sortData` across all replicas' rows, per §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFileResponse {
    pub corr_id: Timestamp,
    pub key: Key,
    pub rows: Vec<(Context, String)>,
}

/// The operation a `ForwardedReq` asks its recipient to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ForwardedOp {
    Get { key: Key },
    Put { key: Key, value: String, context: Context },
}

/// A peer forwarding a client operation it could not (or should not)
/// service itself, carried by `0x0A`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardedReq {
    pub corr_id: Timestamp,
    pub op: ForwardedOp,
}

/// A free-form reply to a `ForwardedReq`, carried by `0x0B`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseForForward {
    pub corr_id: Timestamp,
    pub body: String,
}

/// A hinted-handoff write, wrapping the original `StoreFile` together with
/// the set of hosts it was ultimately intended for, carried by `0x0C`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    pub store: StoreFile,
    pub target_hosts: Vec<Hostname>,
}

/// Every message shape that can cross the wire, keyed by the tag table in
/// SPEC_FULL.md §4.1. A closed enumeration with exhaustive matching, per the
/// design note preferring a tagged-variant type over a runtime dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    ClientCommand(String),
    MembershipPrepare(MembershipPrepare),
    MembershipOk(MembershipOk),
    MembershipCommit(MembershipCommit),
    GetFile(GetFile),
    StoreFile(StoreFile),
    StoreFileResponse(StoreFileResponse),
    GetFileResponse(GetFileResponse),
    ForwardedReq(ForwardedReq),
    ResponseForForward(ResponseForForward),
    Handoff(Handoff),
}

impl Message {
    pub fn tag(&self) -> u8 {
        match self {
            Message::ClientCommand(_) => TAG_CLIENT_COMMAND,
            Message::MembershipPrepare(_) => TAG_MEMBERSHIP_PREPARE,
            Message::MembershipOk(_) => TAG_MEMBERSHIP_OK,
            Message::MembershipCommit(_) => TAG_MEMBERSHIP_COMMIT,
            Message::GetFile(_) => TAG_GET_FILE,
            Message::StoreFile(_) => TAG_STORE_FILE,
            Message::StoreFileResponse(_) => TAG_STORE_FILE_RESPONSE,
            Message::GetFileResponse(_) => TAG_GET_FILE_RESPONSE,
            Message::ForwardedReq(_) => TAG_FORWARDED_REQ,
            Message::ResponseForForward(_) => TAG_RESPONSE_FOR_FORWARD,
            Message::Handoff(_) => TAG_HANDOFF,
        }
    }

    /// Encodes this message into a wire frame.
    pub fn to_frame(&self) -> WireResult<Frame> {
        let tag = self.tag();
        let payload = match self {
            Message::ClientCommand(text) => Bytes::from(text.clone().into_bytes()),
            Message::MembershipPrepare(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::MembershipOk(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::MembershipCommit(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::GetFile(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::StoreFile(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::StoreFileResponse(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::GetFileResponse(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::ForwardedReq(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::ResponseForForward(m) => Bytes::from(postcard::to_allocvec(m)?),
            Message::Handoff(m) => Bytes::from(postcard::to_allocvec(m)?),
        };
        Ok(Frame { tag, payload })
    }

    /// Decodes a message from a frame, dispatching on `frame.tag`.
    pub fn from_frame(frame: &Frame) -> WireResult<Message> {
        Ok(match frame.tag {
            TAG_CLIENT_COMMAND => Message::ClientCommand(
                String::from_utf8_lossy(&frame.payload).into_owned(),
            ),
            TAG_MEMBERSHIP_PREPARE => {
                Message::MembershipPrepare(postcard::from_bytes(&frame.payload)?)
            }
            TAG_MEMBERSHIP_OK => Message::MembershipOk(postcard::from_bytes(&frame.payload)?),
            TAG_MEMBERSHIP_COMMIT => {
                Message::MembershipCommit(postcard::from_bytes(&frame.payload)?)
            }
            TAG_GET_FILE => Message::GetFile(postcard::from_bytes(&frame.payload)?),
            TAG_STORE_FILE => Message::StoreFile(postcard::from_bytes(&frame.payload)?),
            TAG_STORE_FILE_RESPONSE => {
                Message::StoreFileResponse(postcard::from_bytes(&frame.payload)?)
            }
            TAG_GET_FILE_RESPONSE => {
                Message::GetFileResponse(postcard::from_bytes(&frame.payload)?)
            }
            TAG_FORWARDED_REQ => Message::ForwardedReq(postcard::from_bytes(&frame.payload)?),
            TAG_RESPONSE_FOR_FORWARD => {
                Message::ResponseForForward(postcard::from_bytes(&frame.payload)?)
            }
            TAG_HANDOFF => Message::Handoff(postcard::from_bytes(&frame.payload)?),
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

/// Convenience used by the ring and coordinator: a message's `KeyHash`, if
/// it carries one.
pub fn key_hash_of(message: &Message) -> Option<KeyHash> {
    match message {
        Message::GetFile(m) => Some(m.key.hash()),
        Message::StoreFile(m) => Some(m.key.hash()),
        Message::ForwardedReq(m) => match &m.op {
            ForwardedOp::Get { key } | ForwardedOp::Put { key, .. } => Some(key.hash()),
        },
        Message::Handoff(m) => Some(m.store.key.hash()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let frame = message.to_frame().unwrap();
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);

        let decoded = Frame::decode(&mut buf).unwrap().expect("a full frame");
        assert!(buf.is_empty());
        assert_eq!(decoded.tag, frame.tag);

        let round_tripped = Message::from_frame(&decoded).unwrap();
        assert_eq!(round_tripped.tag(), message.tag());
    }

    #[test]
    fn client_command_round_trips() {
        roundtrip(Message::ClientCommand("get k".to_string()));
    }

    #[test]
    fn store_file_round_trips() {
        roundtrip(Message::StoreFile(StoreFile {
            key: Key::new("k"),
            value: "v1".to_string(),
            context: Context::new(),
            corr_id: Timestamp::now(),
        }));
    }

    #[test]
    fn membership_prepare_round_trips() {
        roundtrip(Message::MembershipPrepare(MembershipPrepare {
            view: View(0),
            request_id: 1,
            op: MembershipOp::Add,
            host: Hostname::from("b"),
        }));
    }

    #[test]
    fn handoff_round_trips() {
        roundtrip(Message::Handoff(Handoff {
            store: StoreFile {
                key: Key::new("k"),
                value: "v1".to_string(),
                context: Context::new(),
                corr_id: Timestamp::now(),
            },
            target_hosts: vec![Hostname::from("b")],
        }));
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let message = Message::ClientCommand("put k {} v".to_string());
        let frame = message.to_frame().unwrap();
        let mut full = BytesMut::new();
        frame.encode(&mut full);

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(Frame::decode(&mut partial).unwrap().is_none());
        // No bytes should have been consumed on a partial decode.
        assert_eq!(partial.len(), full.len() - 1);
    }

    #[test]
    fn decode_rejects_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u8(TAG_CLIENT_COMMAND);
        buf.put_u32(u32::MAX);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(WireError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let frame = Frame {
            tag: 0xEE,
            payload: Bytes::new(),
        };
        assert!(matches!(
            Message::from_frame(&frame),
            Err(WireError::UnknownTag(0xEE))
        ));
    }

    #[test]
    fn two_frames_back_to_back_decode_independently() {
        let a = Message::ClientCommand("get a".to_string()).to_frame().unwrap();
        let b = Message::ClientCommand("get b".to_string()).to_frame().unwrap();
        let mut buf = BytesMut::new();
        a.encode(&mut buf);
        b.encode(&mut buf);

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        assert!(buf.is_empty());
    }
}

