// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The envelopes messages travel in, which the schema cannot express as
//! plain constructors: their bodies are arbitrary objects whose length is
//! only known from the framing around them.
use crate::mtp;
use flate2::Compression;
use flate2::write::{GzDecoder, GzEncoder};
use mtkit_tl_types::deserialize::{Buffer, Error, Result};
use mtkit_tl_types::{Deserializable, Identifiable, Serializable};
use std::io::Write;

fn check_constructor<T: Identifiable>(buf: Buffer) -> Result<()> {
    match u32::deserialize(buf)? {
        id if id == T::CONSTRUCTOR_ID => Ok(()),
        id => Err(Error::UnexpectedConstructor { id }),
    }
}

/// Read an `int` used as a length, which can be neither negative nor
/// larger than `max`.
fn read_len(buf: Buffer, max: usize, reason: &'static str) -> Result<usize> {
    let len = i32::deserialize(buf)?;
    match usize::try_from(len) {
        Ok(len) if len <= max => Ok(len),
        _ => Err(Error::MalformedData { reason }),
    }
}

/// `message msg_id:long seqno:int bytes:int body:Object`, the unit both
/// sides exchange. Containers hold several of them.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    /// Bytes taken by everything but the body.
    pub const SIZE_OVERHEAD: usize = 8 + 4 + 4;

    pub fn constructor_id(&self) -> Result<u32> {
        u32::from_bytes(&self.body)
    }

    /// Content-related messages have odd sequence numbers, and the other
    /// side must acknowledge them.
    pub fn requires_ack(&self) -> bool {
        self.seq_no & 1 == 1
    }
}

impl Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl Deserializable for Message {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let msg_id = i64::deserialize(buf)?;
        let seq_no = i32::deserialize(buf)?;
        let len = read_len(buf, MessageContainer::MAXIMUM_SIZE, "bad message length")?;
        Ok(Self {
            msg_id,
            seq_no,
            body: buf.take(len)?.to_vec(),
        })
    }
}

/// `rpc_result#f35c6d01 req_msg_id:long result:Object`. The result runs
/// until the end of the message.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub req_msg_id: i64,
    pub result: Vec<u8>,
}

impl RpcResult {
    pub fn inner_constructor(&self) -> Result<u32> {
        u32::from_bytes(&self.result)
    }
}

impl Identifiable for RpcResult {
    const CONSTRUCTOR_ID: u32 = 0xf35c6d01;
}

impl Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        buf.extend(self.result.iter().copied());
    }
}

impl Deserializable for RpcResult {
    fn deserialize(buf: Buffer) -> Result<Self> {
        check_constructor::<Self>(buf)?;
        let req_msg_id = i64::deserialize(buf)?;
        let mut result = Vec::with_capacity(buf.remaining());
        buf.read_to_end(&mut result);
        Ok(Self { req_msg_id, result })
    }
}

/// `msg_container#73f1f8dc messages:vector<message>`, with bare messages
/// and no vector constructor.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageContainer {
    pub messages: Vec<Message>,
}

impl MessageContainer {
    /// Constructor and message count.
    pub const SIZE_OVERHEAD: usize = 4 + 4;

    /// The largest payload a container may carry. The server closes the
    /// connection when it gets a bigger one.
    pub const MAXIMUM_SIZE: usize = 1_044_456 - Self::SIZE_OVERHEAD;

    /// The most messages sent in one container. More may be accepted, but
    /// past some count the server answers with bad message code 64.
    pub const MAXIMUM_LENGTH: usize = 100;
}

impl Identifiable for MessageContainer {
    const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;
}

impl Serializable for MessageContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        for message in &self.messages {
            message.serialize(buf);
        }
    }
}

impl Deserializable for MessageContainer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        check_constructor::<Self>(buf)?;
        // Each message needs at least its header, which bounds the count.
        let max_len = buf.remaining().saturating_sub(4) / Message::SIZE_OVERHEAD;
        let len = read_len(buf, max_len, "bad container length")?;
        let messages = (0..len)
            .map(|_| Message::deserialize(buf))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { messages })
    }
}

/// `msg_copy#e06046b2 orig_message:Message`, a container of one.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageCopy {
    pub orig_message: Message,
}

impl Identifiable for MessageCopy {
    const CONSTRUCTOR_ID: u32 = 0xe06046b2;
}

impl Deserializable for MessageCopy {
    fn deserialize(buf: Buffer) -> Result<Self> {
        check_constructor::<Self>(buf)?;
        let orig_message = Message::deserialize(buf)?;
        Ok(Self { orig_message })
    }
}

/// `gzip_packed#3072cfa1 packed_data:string`, which stands in for the
/// object it compresses.
#[derive(Clone, Debug, PartialEq)]
pub struct GzipPacked {
    pub packed_data: Vec<u8>,
}

impl GzipPacked {
    pub fn compress(data: &[u8]) -> Self {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        // Writing into memory cannot fail.
        encoder
            .write_all(data)
            .expect("in-memory gzip compression failed");
        Self {
            packed_data: encoder
                .finish()
                .expect("in-memory gzip compression failed"),
        }
    }

    pub fn decompress(&self) -> std::result::Result<Vec<u8>, mtp::DeserializeError> {
        let mut decoder = GzDecoder::new(Vec::new());
        decoder
            .write_all(&self.packed_data)
            .and_then(|()| decoder.finish())
            .map_err(|_| mtp::DeserializeError::DecompressionFailed)
    }
}

impl Identifiable for GzipPacked {
    const CONSTRUCTOR_ID: u32 = 0x3072cfa1;
}

impl Serializable for GzipPacked {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.packed_data.serialize(buf);
    }
}

impl Deserializable for GzipPacked {
    fn deserialize(buf: Buffer) -> Result<Self> {
        check_constructor::<Self>(buf)?;
        let packed_data = Vec::<u8>::deserialize(buf)?;
        Ok(Self { packed_data })
    }
}
