// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Tagged, Transport, Unpacked, UnpackedOffset, unpack_negative_len};
use getrandom::getrandom;
use mtkit_crypto::DequeBuffer;

const TAG: [u8; 4] = [0xee; 4];
const PADDED_TAG: [u8; 4] = [0xdd; 4];
const QUICK_ACK_BIT: u32 = 0x8000_0000;

/// A light MTProto transport protocol available that guarantees data padded
/// to 4 bytes. This is an implementation of the [intermediate transport].
///
/// * Overhead: small.
/// * Minimum envelope length: 4 bytes.
/// * Maximum envelope length: 4 bytes.
///
/// It serializes the input payload as follows:
///
/// ```text
/// +----+----...----+
/// | len|  payload  |
/// +----+----...----+
///  ^^^^ 4 bytes
/// ```
///
/// [intermediate transport]: https://core.telegram.org/mtproto/mtproto-transports#intermediate
pub struct Intermediate {
    init: bool,
}

/// The [padded intermediate transport], which appends between 0 and 15
/// random bytes to every packet so that packet sizes reveal less.
///
/// The receiving end has to know where the actual data ends on its own,
/// which encrypted messages allow.
///
/// [padded intermediate transport]: https://core.telegram.org/mtproto/mtproto-transports#padded-intermediate
pub struct PaddedIntermediate {
    init: bool,
}

fn pack_len(buffer: &mut DequeBuffer<u8>, quick_ack: bool) {
    let mut len = buffer.len() as u32;
    if quick_ack {
        len |= QUICK_ACK_BIT;
    }
    buffer.extend_front(&len.to_le_bytes());
}

fn unpack(buffer: &[u8]) -> Result<Unpacked, Error> {
    if buffer.len() < 4 {
        return Err(Error::MissingBytes);
    }

    let mut len = [0; 4];
    len.copy_from_slice(&buffer[..4]);
    let len = i32::from_le_bytes(len);
    if len < 0 {
        return unpack_negative_len(len);
    }

    let len = len as usize;
    if buffer.len() < 4 + len {
        return Err(Error::MissingBytes);
    }

    if len <= 4 {
        if len == 4 {
            let mut data = [0; 4];
            data.copy_from_slice(&buffer[4..8]);
            let data = i32::from_le_bytes(data);
            return Err(Error::BadStatus {
                status: data.unsigned_abs(),
            });
        }
        return Err(Error::BadLen { got: len as i32 });
    }

    Ok(Unpacked::Payload(UnpackedOffset {
        data_start: 4,
        data_end: 4 + len,
        next_offset: 4 + len,
    }))
}

#[allow(clippy::new_without_default)]
impl Intermediate {
    pub fn new() -> Self {
        Self { init: false }
    }
}

impl Transport for Intermediate {
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>, quick_ack: bool) {
        assert_eq!(buffer.len() % 4, 0);

        pack_len(buffer, quick_ack);

        if !self.init {
            buffer.extend_front(&TAG);
            self.init = true;
        }
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<Unpacked, Error> {
        unpack(buffer)
    }

    fn reset(&mut self) {
        self.init = false;
    }
}

impl Tagged for Intermediate {
    fn init_tag(&mut self) -> [u8; 4] {
        self.init = true;
        TAG
    }
}

#[allow(clippy::new_without_default)]
impl PaddedIntermediate {
    pub fn new() -> Self {
        Self { init: false }
    }
}

impl Transport for PaddedIntermediate {
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>, quick_ack: bool) {
        assert_eq!(buffer.len() % 4, 0);

        let mut padding = [0; 16];
        getrandom(&mut padding).expect("failed to generate a secure padding");
        let padding_len = (padding[0] & 0x0f) as usize;
        buffer.extend(&padding[1..1 + padding_len.min(15)]);

        pack_len(buffer, quick_ack);

        if !self.init {
            buffer.extend_front(&PADDED_TAG);
            self.init = true;
        }
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<Unpacked, Error> {
        unpack(buffer)
    }

    fn reset(&mut self) {
        self.init = false;
    }
}

impl Tagged for PaddedIntermediate {
    fn init_tag(&mut self) -> [u8; 4] {
        self.init = true;
        PADDED_TAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a new intermediate transport, and `n` bytes of input data for it.
    fn setup_pack(n: usize) -> (Intermediate, DequeBuffer<u8>) {
        let mut buffer = DequeBuffer::with_capacity(n, 8);
        buffer.extend((0..n).map(|x| (x & 0xff) as u8));
        (Intermediate::new(), buffer)
    }

    fn payload(unpacked: Unpacked) -> UnpackedOffset {
        match unpacked {
            Unpacked::Payload(offset) => offset,
            Unpacked::QuickAck { .. } => panic!("expected payload, got {unpacked:?}"),
        }
    }

    #[test]
    fn pack_empty() {
        let (mut transport, mut buffer) = setup_pack(0);
        transport.pack(&mut buffer, false);
        assert_eq!(&buffer[..], &[0xee, 0xee, 0xee, 0xee, 0, 0, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn pack_non_padded() {
        let (mut transport, mut buffer) = setup_pack(7);
        transport.pack(&mut buffer, false);
    }

    #[test]
    fn pack_normal() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer, false);
        assert_eq!(&buffer[..8], &[0xee, 0xee, 0xee, 0xee, 128, 0, 0, 0]);
        assert_eq!(&buffer[8..], &orig[..]);
    }

    #[test]
    fn pack_with_quick_ack() {
        let (mut transport, mut buffer) = setup_pack(128);
        transport.pack(&mut buffer, true);
        assert_eq!(&buffer[4..8], &[128, 0, 0, 0x80]);
    }

    #[test]
    fn unpack_small() {
        let mut transport = Intermediate::new();
        let mut buffer = [1];
        assert_eq!(transport.unpack(&mut buffer), Err(Error::MissingBytes));
    }

    #[test]
    fn unpack_incomplete() {
        let (mut transport, mut buffer) = setup_pack(128);
        transport.pack(&mut buffer, false);
        let last = buffer.len() - 1;
        assert_eq!(
            transport.unpack(&mut buffer[4..last]),
            Err(Error::MissingBytes)
        );
    }

    #[test]
    fn unpack_normal() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer, false);
        let packed = &mut buffer[4..]; // init bytes
        let offset = payload(transport.unpack(packed).unwrap());
        assert_eq!(&packed[offset.data_start..offset.data_end], &orig[..]);
    }

    #[test]
    fn unpack_two_at_once() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();

        let mut two_buffer = Vec::new();
        transport.pack(&mut buffer, false);
        two_buffer.extend(&buffer[4..]); // init bytes
        let single_size = two_buffer.len();

        buffer = orig.clone();
        transport.pack(&mut buffer, false);
        two_buffer.extend(&buffer[..]);

        let offset = payload(transport.unpack(&mut two_buffer).unwrap());
        assert_eq!(&two_buffer[offset.data_start..offset.data_end], &orig[..]);
        assert_eq!(offset.next_offset, single_size);

        let rest = &mut two_buffer[offset.next_offset..];
        let offset = payload(transport.unpack(rest).unwrap());
        assert_eq!(&rest[offset.data_start..offset.data_end], &orig[..]);
    }

    #[test]
    fn unpack_bad_status() {
        let mut transport = Intermediate::new();
        let mut buffer = Vec::new();
        buffer.extend(4_i32.to_le_bytes());
        buffer.extend((-404_i32).to_le_bytes());

        assert_eq!(
            transport.unpack(&mut buffer),
            Err(Error::BadStatus { status: 404 })
        );
    }

    #[test]
    fn unpack_quick_ack() {
        let mut transport = Intermediate::new();
        let mut buffer = 0x8765_4321u32.to_le_bytes();

        assert_eq!(
            transport.unpack(&mut buffer),
            Ok(Unpacked::QuickAck {
                token: 0x8765_4321,
                next_offset: 4
            })
        );
    }

    #[test]
    fn padded_keeps_data_in_front() {
        let mut transport = PaddedIntermediate::new();
        let orig = (0..64).collect::<Vec<u8>>();
        for _ in 0..16 {
            let mut buffer = DequeBuffer::with_capacity(64, 8);
            buffer.extend(&orig);
            transport.pack(&mut buffer, false);
            transport.reset();

            assert_eq!(&buffer[..4], &[0xdd; 4]);
            let packed = &mut buffer[4..];
            let offset = payload(transport.unpack(packed).unwrap());
            let data = &packed[offset.data_start..offset.data_end];
            assert!((64..64 + 16).contains(&data.len()));
            assert_eq!(&data[..64], &orig[..]);
        }
    }
}
