// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Implementation of the several [MTProto transports]. This layer is
//! responsible for taking serialized messages from the MTP and packing them
//! in a format that can be sent over a stream, such as TCP.
//!
//! Every transport is sans-IO: packing works in-place on a [`DequeBuffer`],
//! and unpacking only reports where the next frame lies within whatever
//! bytes have been read so far.
//!
//! [MTProto transports]: https://core.telegram.org/mtproto#mtproto-transport
mod abridged;
mod full;
mod intermediate;
mod obfuscated;

pub use abridged::Abridged;
pub use full::Full;
pub use intermediate::{Intermediate, PaddedIntermediate};
use mtkit_crypto::DequeBuffer;
pub use obfuscated::Obfuscated;
use std::fmt;

/// Negative lengths closer to zero than this are transport errors, which
/// behave like HTTP status codes. Anything else is a quick acknowledgement.
const MAX_TRANSPORT_STATUS: i32 = 1000;

/// The error type reported by the different transports when something is wrong.
///
/// Certain transports will only produce certain variants of this error.
///
/// Unless the variant is `MissingBytes`, the connection should not continue.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Not enough bytes are provided.
    MissingBytes,

    /// The length is either too short or too long to represent a valid packet.
    BadLen { got: i32 },

    /// The sequence number received does not match the expected value.
    BadSeq { expected: u32, got: u32 },

    /// The checksum of the packet does not match its expected value.
    BadCrc { expected: u32, got: u32 },

    /// A negative length was received, indicating a [transport-level error].
    /// The absolute value of this length behaves like an [HTTP status code]:
    ///
    /// * 404, if the authorization key used was not found, meaning that the
    ///   server is not aware of the key used by the client, so it cannot be
    ///   used to securely communicate with it.
    ///
    /// * 429, if too many transport connections are established to the same
    ///   IP address in a too-short lapse of time.
    ///
    /// [transport-level error]: https://core.telegram.org/mtproto/mtproto-transports#transport-errors
    /// [HTTP status code]: https://developer.mozilla.org/en-US/docs/Web/HTTP/Status
    BadStatus { status: u32 },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error: ")?;
        match self {
            Error::MissingBytes => write!(f, "need more bytes"),
            Error::BadLen { got } => write!(f, "bad len (got {got})"),
            Error::BadSeq { expected, got } => {
                write!(f, "bad seq (expected {expected}, got {got})")
            }
            Error::BadCrc { expected, got } => {
                write!(f, "bad crc (expected {expected}, got {got})")
            }
            Error::BadStatus { status } => {
                write!(f, "bad status (negative length -{status})")
            }
        }
    }
}

/// Where the payload of an unpacked frame lies within the input buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct UnpackedOffset {
    pub data_start: usize,
    pub data_end: usize,
    pub next_offset: usize,
}

/// A single frame read from the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Unpacked {
    /// A regular packet whose payload is at the given offset.
    Payload(UnpackedOffset),

    /// The server confirmed the receipt of a packet sent with a quick-ack
    /// request. The token matches the one returned when encrypting it.
    QuickAck { token: u32, next_offset: usize },
}

impl Unpacked {
    /// How many bytes of the input this frame took.
    pub fn next_offset(&self) -> usize {
        match self {
            Self::Payload(offset) => offset.next_offset,
            Self::QuickAck { next_offset, .. } => *next_offset,
        }
    }
}

/// The trait used by the transports to create instances of themselves.
pub trait Transport {
    /// Packs the input buffer in-place.
    ///
    /// When `quick_ack` is set, the server is asked to confirm the receipt
    /// of the packet as soon as it is read.
    ///
    /// Panics if `buffer.len()` is not divisible by 4.
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>, quick_ack: bool);

    /// Unpacks the input buffer in-place.
    ///
    /// Subsequent calls to `unpack` should be made with the same buffer,
    /// with the data up to the previous [`Unpacked::next_offset`] removed.
    fn unpack(&mut self, buffer: &mut [u8]) -> Result<Unpacked, Error>;

    /// Reset the state, as if a new instance was just created.
    fn reset(&mut self);
}

/// The trait used by the obfuscated transport to get the transport tags.
pub trait Tagged {
    /// Gets the transport tag for use in the obfuscated transport and
    /// changes the internal state to avoid sending the tag again.
    fn init_tag(&mut self) -> [u8; 4];
}

/// Interpret a negative length read from a 4-byte little-endian header,
/// which is either a transport error or a quick acknowledgement.
fn unpack_negative_len(len: i32) -> Result<Unpacked, Error> {
    debug_assert!(len < 0);
    if len > -MAX_TRANSPORT_STATUS {
        Err(Error::BadStatus {
            status: len.unsigned_abs(),
        })
    } else {
        Ok(Unpacked::QuickAck {
            token: len as u32,
            next_offset: 4,
        })
    }
}
