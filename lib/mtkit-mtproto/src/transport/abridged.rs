// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Tagged, Transport, Unpacked, UnpackedOffset};
use mtkit_crypto::DequeBuffer;

const TAG: u8 = 0xef;
const QUICK_ACK_BIT: u8 = 0x80;

/// The lightest MTProto transport protocol available. This is an
/// implementation of the [abridged transport].
///
/// * Overhead: very small.
/// * Minimum envelope length: 1 byte.
/// * Maximum envelope length: 4 bytes.
///
/// It serializes the input payload as follows, if the length is small enough:
///
/// ```text
/// +-+----...----+
/// |L|  payload  |
/// +-+----...----+
///  ^ 1 byte
/// ```
///
/// Otherwise:
///
/// ```text
/// +----+----...----+
/// | len|  payload  |
/// +----+----...----+
///  ^^^^ 4 bytes
/// ```
///
/// Quick acknowledgements come back as 4 big-endian bytes with the most
/// significant bit set.
///
/// [abridged transport]: https://core.telegram.org/mtproto/mtproto-transports#abridged
pub struct Abridged {
    init: bool,
}

#[allow(clippy::new_without_default)]
impl Abridged {
    pub fn new() -> Self {
        Self { init: false }
    }
}

impl Transport for Abridged {
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>, quick_ack: bool) {
        let len = buffer.len();
        assert_eq!(len % 4, 0);

        let ack = if quick_ack { QUICK_ACK_BIT } else { 0 };
        let len = len / 4;
        if len < 127 {
            buffer.extend_front(&[len as u8 | ack]);
        } else {
            let mut header = (0x7f | ((len as u32) << 8)).to_le_bytes();
            header[0] |= ack;
            buffer.extend_front(&header);
        }

        if !self.init {
            buffer.extend_front(&[TAG]);
            self.init = true;
        }
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<Unpacked, Error> {
        if buffer.is_empty() {
            return Err(Error::MissingBytes);
        }

        if buffer[0] & QUICK_ACK_BIT != 0 {
            if buffer.len() < 4 {
                return Err(Error::MissingBytes);
            }
            let mut token = [0; 4];
            token.copy_from_slice(&buffer[..4]);
            return Ok(Unpacked::QuickAck {
                token: u32::from_be_bytes(token),
                next_offset: 4,
            });
        }

        let header_len;
        let len = buffer[0];
        let len = if len < 127 {
            header_len = 1;
            len as usize
        } else {
            if buffer.len() < 4 {
                return Err(Error::MissingBytes);
            }

            header_len = 4;
            let mut len = [0; 4];
            len.copy_from_slice(&buffer[..4]);
            (u32::from_le_bytes(len) >> 8) as usize
        };

        let len = len * 4;
        if buffer.len() < header_len + len {
            return Err(Error::MissingBytes);
        }

        if header_len == 1 && len == 4 {
            let mut data = [0; 4];
            data.copy_from_slice(&buffer[1..5]);
            let data = i32::from_le_bytes(data);
            if data < 0 {
                return Err(Error::BadStatus {
                    status: data.unsigned_abs(),
                });
            }
        }

        Ok(Unpacked::Payload(UnpackedOffset {
            data_start: header_len,
            data_end: header_len + len,
            next_offset: header_len + len,
        }))
    }

    fn reset(&mut self) {
        self.init = false;
    }
}

impl Tagged for Abridged {
    fn init_tag(&mut self) -> [u8; 4] {
        self.init = true;
        [TAG; 4]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a new abridged transport, and `n` bytes of input data for it.
    fn setup_pack(n: usize) -> (Abridged, DequeBuffer<u8>) {
        let mut buffer = DequeBuffer::with_capacity(n, 8);
        buffer.extend((0..n).map(|x| (x & 0xff) as u8));
        (Abridged::new(), buffer)
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
        assert_eq!(&buffer[..], &[0xef, 0]);
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
        assert_eq!(&buffer[..2], &[0xef, 32]);
        assert_eq!(&buffer[2..], &orig[..]);
    }

    #[test]
    fn pack_large() {
        let (mut transport, mut buffer) = setup_pack(1024);
        let orig = buffer.clone();
        transport.pack(&mut buffer, false);
        assert_eq!(&buffer[..5], &[0xef, 127, 0, 1, 0]);
        assert_eq!(&buffer[5..], &orig[..]);
    }

    #[test]
    fn pack_with_quick_ack() {
        let (mut transport, mut buffer) = setup_pack(128);
        transport.pack(&mut buffer, true);
        assert_eq!(&buffer[..2], &[0xef, 32 | 0x80]);

        let (mut transport, mut buffer) = setup_pack(1024);
        transport.pack(&mut buffer, true);
        assert_eq!(&buffer[..5], &[0xef, 0xff, 0, 1, 0]);
    }

    #[test]
    fn unpack_small() {
        let mut transport = Abridged::new();
        let mut buffer = [1];
        assert_eq!(transport.unpack(&mut buffer), Err(Error::MissingBytes));
    }

    #[test]
    fn unpack_normal() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer, false);
        let packed = &mut buffer[1..]; // init byte
        let offset = payload(transport.unpack(packed).unwrap());
        assert_eq!(&packed[offset.data_start..offset.data_end], &orig[..]);
    }

    #[test]
    fn unpack_two_at_once() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();

        let mut two_buffer = Vec::new();
        transport.pack(&mut buffer, false);
        two_buffer.extend(&buffer[1..]); // init byte
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
    fn unpack_large() {
        let (mut transport, mut buffer) = setup_pack(1024);
        let orig = buffer.clone();
        transport.pack(&mut buffer, false);
        let packed = &mut buffer[1..]; // init byte
        let offset = payload(transport.unpack(packed).unwrap());
        assert_eq!(&packed[offset.data_start..offset.data_end], &orig[..]);
    }

    #[test]
    fn unpack_bad_status() {
        let mut transport = Abridged::new();
        let mut buffer = vec![1u8];
        buffer.extend((-404_i32).to_le_bytes());

        assert_eq!(
            transport.unpack(&mut buffer),
            Err(Error::BadStatus { status: 404 })
        );
    }

    #[test]
    fn unpack_quick_ack() {
        let mut transport = Abridged::new();
        let mut buffer = vec![0x81, 0x02, 0x03, 0x04, 0x01];

        assert_eq!(
            transport.unpack(&mut buffer),
            Ok(Unpacked::QuickAck {
                token: 0x8102_0304,
                next_offset: 4
            })
        );
    }

    #[test]
    fn tagged_skips_the_init_byte() {
        let (mut transport, mut buffer) = setup_pack(4);
        assert_eq!(transport.init_tag(), [0xef; 4]);
        transport.pack(&mut buffer, false);
        assert_eq!(&buffer[..], &[1, 0, 1, 2, 3]);
    }
}
