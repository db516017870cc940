// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Message-level protocol: request bodies in, sealed packets out, and the
//! reverse for whatever the server sends.
//!
//! [`Plain`] only exists to create the authorization key. Everything after
//! that goes through [`Encrypted`], which cannot be built without a key.
//! Both borrow the [`SessionInfo`] on every call, so that its owner can
//! start a new session whenever it needs to.
//!
//! [`SessionInfo`]: crate::SessionInfo
mod encrypted;
mod plain;

use crate::MsgId;
use crate::manual_tl::{Message, MessageContainer};
pub use encrypted::{Builder, Encrypted, Finalized};
use mtkit_crypto as crypto;
use mtkit_tl_types as tl;
use mtkit_tl_types::mtproto;
pub use plain::Plain;
use std::fmt;

/// The body of a successful response to a request.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub msg_id: MsgId,
    pub body: Vec<u8>,
}

/// The server answered the request with an error.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResultError {
    pub msg_id: MsgId,
    pub error: mtproto::RpcError,
}

/// The server refused to process one of our messages.
#[derive(Clone, Debug, PartialEq)]
pub struct BadMessage {
    pub msg_id: MsgId,
    pub code: i32,
    /// Set when the message was refused over its salt.
    pub new_salt: Option<i64>,
}

/// The answer to one of our messages arrived, but could not be read.
#[derive(Clone, Debug, PartialEq)]
pub struct DeserializationFailure {
    pub msg_id: MsgId,
    pub error: DeserializeError,
}

/// Everything one incoming message can turn into.
#[derive(Clone, Debug, PartialEq)]
pub enum Deserialization {
    RpcResult(RpcResult),
    RpcError(RpcResultError),
    BadMessage(BadMessage),
    /// The server confirmed it got these messages.
    Ack(Vec<MsgId>),
    /// Anything we sent before `first_msg_id` may never be answered.
    NewSession(mtproto::NewSessionCreated),
    FutureSalts(mtproto::FutureSalts),
    Pong(mtproto::Pong),
    /// `msgs_state_req`: the server wants to know what happened to `msg_ids`.
    StateRequest { msg_id: MsgId, msg_ids: Vec<MsgId> },
    /// The server answered with `answer_msg_id` but we never acknowledged it.
    DetailedInfo {
        answer_msg_id: MsgId,
        msg_id: Option<MsgId>,
    },
    /// `msg_resend_req`.
    ResendRequest(Vec<MsgId>),
    /// A message no request of ours asked for.
    Update(Vec<u8>),
    Failure(DeserializationFailure),
}

/// Codes from <https://core.telegram.org/mtproto/service_messages_about_messages>.
const BAD_MESSAGE_CODES: &[(i32, &str)] = &[
    (16, "message id too low, the clock is probably behind"),
    (17, "message id too high, the clock is probably ahead"),
    (18, "message id with the wrong lower bits"),
    (19, "container reused the id of an earlier message"),
    (20, "message is too old to be processed"),
    (32, "sequence number too low"),
    (33, "sequence number too high"),
    (34, "content-unrelated message with an odd sequence number"),
    (35, "content-related message with an even sequence number"),
    (48, "wrong server salt"),
    (64, "invalid container"),
];

impl BadMessage {
    pub fn description(&self) -> &'static str {
        BAD_MESSAGE_CODES
            .iter()
            .find(|(code, _)| *code == self.code)
            .map_or("unknown bad message code", |(_, text)| text)
    }

    /// The message only needs a new identifier (and maybe a new salt) to go
    /// through.
    pub fn retryable(&self) -> bool {
        matches!(self.code, 16 | 17 | 48)
    }

    /// The sequence numbers are out of sync, so only a fresh session helps.
    pub fn needs_new_session(&self) -> bool {
        matches!(self.code, 32 | 33)
    }

    pub fn fatal(&self) -> bool {
        !(self.retryable() || self.needs_new_session())
    }
}

/// Why a body could not be added to the outgoing packet.
#[derive(Clone, Debug, PartialEq)]
pub enum PushError {
    /// The packet is full. The body can go in the next one.
    ContainerFull,
    /// TL serializes everything to a multiple of four bytes.
    NotPadded { len: usize },
    /// Not even an empty packet could hold the body.
    TooLarge { len: usize, max_len: usize },
}

impl std::error::Error for PushError {}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContainerFull => write!(f, "no room left in the packet"),
            Self::NotPadded { len } => {
                write!(f, "body of {len} bytes is not a multiple of 4")
            }
            Self::TooLarge { len, max_len } => {
                write!(f, "body of {len} bytes exceeds the {max_len} byte limit")
            }
        }
    }
}

/// The largest body a single message may carry.
pub const MAX_BODY_LEN: usize = MessageContainer::MAXIMUM_SIZE - Message::SIZE_OVERHEAD;

/// Whether `body` could ever be sent, no matter how empty the packet.
pub fn check_body(body: &[u8]) -> Result<(), PushError> {
    let len = body.len();
    if len % 4 != 0 {
        Err(PushError::NotPadded { len })
    } else if len > MAX_BODY_LEN {
        Err(PushError::TooLarge {
            len,
            max_len: MAX_BODY_LEN,
        })
    } else {
        Ok(())
    }
}

/// Why an incoming packet, or part of it, was rejected.
#[derive(Clone, Debug, PartialEq)]
pub enum DeserializeError {
    /// The packet was sealed with another key.
    BadAuthKey { got: i64, expected: i64 },
    BadSessionId { got: i64, expected: i64 },
    /// Even, repeated or otherwise impossible server message identifier.
    BadMessageId { got: i64 },
    /// The identifier is out of the window allowed around our clock.
    StaleMessageId { got: i64 },
    NegativeMessageLength { got: i32 },
    TooLongMessageLength { got: usize, max_length: usize },
    /// Ran out of bytes.
    MessageBufferTooSmall,
    DecompressionFailed,
    UnexpectedConstructor { id: u32 },
    MalformedData { reason: &'static str },
    DecryptionError(crypto::Error),
    /// A bare negative status code in place of a packet (`-404` means the
    /// key is unknown to the server).
    TransportError { code: i32 },
}

impl std::error::Error for DeserializeError {}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadAuthKey { got, expected } => {
                write!(f, "auth key id {got} does not match ours ({expected})")
            }
            Self::BadSessionId { got, expected } => {
                write!(f, "session id {got} does not match ours ({expected})")
            }
            Self::BadMessageId { got } => write!(f, "invalid server message id {got}"),
            Self::StaleMessageId { got } => {
                write!(f, "server message id {got} is outside the time window")
            }
            Self::NegativeMessageLength { got } => write!(f, "message length {got} is negative"),
            Self::TooLongMessageLength { got, max_length } => {
                write!(f, "message length {got} is over the {max_length} bytes left")
            }
            Self::MessageBufferTooSmall => write!(f, "message ended early"),
            Self::DecompressionFailed => write!(f, "gzip data could not be inflated"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor {id:08x}"),
            Self::MalformedData { reason } => write!(f, "malformed message: {reason}"),
            Self::DecryptionError(error) => write!(f, "decryption failed: {error}"),
            Self::TransportError { code } => write!(f, "server sent status {}", -code),
        }
    }
}

impl From<tl::deserialize::Error> for DeserializeError {
    fn from(error: tl::deserialize::Error) -> Self {
        match error {
            tl::deserialize::Error::UnexpectedEof => Self::MessageBufferTooSmall,
            tl::deserialize::Error::UnexpectedConstructor { id } => {
                Self::UnexpectedConstructor { id }
            }
            tl::deserialize::Error::MalformedData { reason } => Self::MalformedData { reason },
        }
    }
}

impl From<crypto::Error> for DeserializeError {
    fn from(error: crypto::Error) -> Self {
        Self::DecryptionError(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bad(code: i32) -> BadMessage {
        BadMessage {
            msg_id: MsgId(0),
            code,
            new_salt: None,
        }
    }

    #[test]
    fn bad_message_classification() {
        for code in [16, 17, 48] {
            assert!(bad(code).retryable());
            assert!(!bad(code).fatal());
        }
        for code in [32, 33] {
            assert!(bad(code).needs_new_session());
            assert!(!bad(code).fatal());
        }
        for code in [18, 19, 20, 34, 35, 64] {
            assert!(bad(code).fatal());
        }
        assert_eq!(bad(48).description(), "wrong server salt");
        assert_eq!(bad(99).description(), "unknown bad message code");
    }

    #[test]
    fn bodies_are_checked_before_pushing() {
        assert_eq!(check_body(b"Hey!"), Ok(()));
        assert_eq!(check_body(&[1, 2, 3]), Err(PushError::NotPadded { len: 3 }));
        assert_eq!(
            check_body(&vec![0; MAX_BODY_LEN + 4]),
            Err(PushError::TooLarge {
                len: MAX_BODY_LEN + 4,
                max_len: MAX_BODY_LEN
            })
        );
    }
}
