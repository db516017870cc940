// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Transport, Unpacked, UnpackedOffset, unpack_negative_len};
use bytes::Buf;
use crc32fast::Hasher;
use mtkit_crypto::DequeBuffer;

const QUICK_ACK_BIT: u32 = 0x8000_0000;

/// The basic MTProto transport protocol. This is an implementation of the
/// [full transport].
///
/// * Overhead: medium
/// * Minimum envelope length: 12 bytes.
/// * Maximum envelope length: 12 bytes.
///
/// It serializes the input payload as follows:
///
/// ```text
/// +----+----+----...----+----+
/// | len| seq|  payload  | crc|
/// +----+----+----...----+----+
///  ^^^^ 4 bytes
/// ```
///
/// [full transport]: https://core.telegram.org/mtproto/mtproto-transports#full
pub struct Full {
    send_seq: u32,
    recv_seq: u32,
}

#[allow(clippy::new_without_default)]
impl Full {
    pub fn new() -> Self {
        Self {
            send_seq: 0,
            recv_seq: 0,
        }
    }
}

impl Transport for Full {
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>, quick_ack: bool) {
        assert_eq!(buffer.len() % 4, 0);

        // payload len + length itself (4 bytes) + send counter (4 bytes) + crc32 (4 bytes)
        let mut len = buffer.len() as u32 + 4 + 4 + 4;
        if quick_ack {
            len |= QUICK_ACK_BIT;
        }

        buffer.extend_front(&self.send_seq.to_le_bytes());
        buffer.extend_front(&len.to_le_bytes());

        let crc = {
            let mut hasher = Hasher::new();
            hasher.update(buffer.as_ref());
            hasher.finalize()
        };
        buffer.extend(crc.to_le_bytes());

        self.send_seq += 1;
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<Unpacked, Error> {
        // Need 4 bytes for the initial length
        if buffer.len() < 4 {
            return Err(Error::MissingBytes);
        }

        let total_len = buffer.len();
        let needle = &mut &buffer[..];

        // payload len
        let len = needle.get_i32_le();
        if len < 0 {
            return unpack_negative_len(len);
        }
        if len < 12 {
            return Err(Error::BadLen { got: len });
        }

        let len = len as usize;
        if total_len < len {
            return Err(Error::MissingBytes);
        }

        // receive counter
        let seq = needle.get_u32_le();
        if seq != self.recv_seq {
            return Err(Error::BadSeq {
                expected: self.recv_seq,
                got: seq,
            });
        }

        // skip payload for now
        needle.advance(len - 12);

        // crc32
        let crc = needle.get_u32_le();

        let valid_crc = {
            let mut hasher = Hasher::new();
            hasher.update(&buffer[..len - 4]);
            hasher.finalize()
        };
        if crc != valid_crc {
            return Err(Error::BadCrc {
                expected: valid_crc,
                got: crc,
            });
        }

        self.recv_seq += 1;
        Ok(Unpacked::Payload(UnpackedOffset {
            data_start: 8,
            data_end: len - 4,
            next_offset: len,
        }))
    }

    fn reset(&mut self) {
        log::info!("resetting sending and receiving counter");
        self.send_seq = 0;
        self.recv_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a new full transport, and `n` bytes of input data for it.
    fn setup_pack(n: u32) -> (Full, DequeBuffer<u8>) {
        let mut buffer = DequeBuffer::with_capacity(n as usize, 8);
        buffer.extend((0..n).map(|x| (x & 0xff) as u8));
        (Full::new(), buffer)
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

        assert_eq!(&buffer[..], &[12, 0, 0, 0, 0, 0, 0, 0, 38, 202, 141, 50]);
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

        assert_eq!(&buffer[..4], &[140, 0, 0, 0]);
        assert_eq!(&buffer[4..8], &[0, 0, 0, 0]);
        assert_eq!(&buffer[8..8 + orig.len()], &orig[..]);
        assert_eq!(&buffer[8 + orig.len()..], &[134, 115, 149, 55]);
    }

    #[test]
    fn pack_twice() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer, false);
        buffer = orig.clone();
        transport.pack(&mut buffer, false);

        assert_eq!(&buffer[..4], &[140, 0, 0, 0]);
        assert_eq!(&buffer[4..8], &[1, 0, 0, 0]);
        assert_eq!(&buffer[8..8 + orig.len()], &orig[..]);
        assert_eq!(&buffer[8 + orig.len()..], &[150, 9, 240, 74]);
    }

    #[test]
    fn pack_with_quick_ack() {
        let (mut transport, mut buffer) = setup_pack(128);
        transport.pack(&mut buffer, true);

        assert_eq!(&buffer[..4], &[140, 0, 0, 0x80]);
    }

    #[test]
    fn unpack_small() {
        let mut transport = Full::new();
        let mut buffer = [0, 1, 2];
        assert_eq!(transport.unpack(&mut buffer), Err(Error::MissingBytes));
    }

    #[test]
    fn unpack_normal() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer, false);

        let mut transport = Full::new();
        let offset = payload(transport.unpack(buffer.as_mut()).unwrap());
        assert_eq!(&buffer[offset.data_start..offset.data_end], &orig[..]);
        assert_eq!(offset.next_offset, buffer.len());
    }

    #[test]
    fn unpack_twice() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();

        transport.pack(&mut buffer, false);
        let offset = payload(transport.unpack(buffer.as_mut()).unwrap());
        assert_eq!(&buffer[offset.data_start..offset.data_end], &orig[..]);

        buffer = orig.clone();
        transport.pack(&mut buffer, false);
        let offset = payload(transport.unpack(buffer.as_mut()).unwrap());
        assert_eq!(&buffer[offset.data_start..offset.data_end], &orig[..]);
    }

    #[test]
    fn unpack_bad_crc() {
        let (mut transport, mut buffer) = setup_pack(128);
        transport.pack(&mut buffer, false);

        let last = buffer.len() - 1;
        buffer[last] ^= 0xff;

        let mut transport = Full::new();
        assert_eq!(
            transport.unpack(buffer.as_mut()),
            Err(Error::BadCrc {
                expected: 932541318,
                got: 3365237638,
            })
        );
    }

    #[test]
    fn unpack_bad_seq() {
        let (mut transport, mut buffer) = setup_pack(128);
        let orig = buffer.clone();
        transport.pack(&mut buffer, false);
        buffer = orig;
        transport.pack(&mut buffer, false);

        let mut transport = Full::new();
        assert_eq!(
            transport.unpack(buffer.as_mut()),
            Err(Error::BadSeq {
                expected: 0,
                got: 1,
            })
        );
    }

    #[test]
    fn unpack_bad_status() {
        let mut transport = Full::new();
        let mut buffer = (-429_i32).to_le_bytes();
        assert_eq!(
            transport.unpack(&mut buffer),
            Err(Error::BadStatus { status: 429 })
        );
    }

    #[test]
    fn unpack_quick_ack() {
        let mut transport = Full::new();
        let mut buffer = 0x8000_abcdu32.to_le_bytes();
        assert_eq!(
            transport.unpack(&mut buffer),
            Ok(Unpacked::QuickAck {
                token: 0x8000_abcd,
                next_offset: 4
            })
        );
    }
}
