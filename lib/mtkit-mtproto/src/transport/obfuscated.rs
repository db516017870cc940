// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Error, Tagged, Transport, Unpacked};
use log::debug;
use mtkit_crypto::{DequeBuffer, ObfuscatedCipher};

/// An obfuscation protocol made by Telegram to avoid ISP blocks.
///
/// It is simply a wrapper around another transport, which encrypts the data
/// using AES-256-CTR with a randomly generated key that is then sent at the
/// beginning of the connection.
///
/// Obfuscated transport can only be used with "tagged" transports, which
/// provide a way to get the obfuscated tag that is used in the encryption.
/// See the linked documentation for more information.
///
/// [Transport Obfuscation](https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation)
pub struct Obfuscated<T: Transport + Tagged> {
    inner: T,
    head: Option<[u8; 64]>,
    decrypt_tail: usize,
    cipher: ObfuscatedCipher,
}

const FORBIDDEN_FIRST_INTS: [[u8; 4]; 7] = [
    [b'H', b'E', b'A', b'D'], // HTTP HEAD
    [b'P', b'O', b'S', b'T'], // HTTP POST
    [b'G', b'E', b'T', b' '], // HTTP GET
    [b'O', b'P', b'T', b'I'], // HTTP OPTIONS
    [0x16, 0x03, 0x01, 0x02], // TLS handshake
    [0xdd, 0xdd, 0xdd, 0xdd], // Padded Intermediate
    [0xee, 0xee, 0xee, 0xee], // Intermediate
];

fn is_valid_init(init: &[u8; 64]) -> bool {
    init[0] != 0xef // Abridged
        && init[4..8] != [0; 4] // Full
        && !FORBIDDEN_FIRST_INTS.iter().any(|start| start == &init[..4])
}

impl<T: Transport + Tagged> Obfuscated<T> {
    fn generate_keys(inner: &mut T) -> ([u8; 64], ObfuscatedCipher) {
        let mut init = [0; 64];
        while !is_valid_init(&init) {
            getrandom::getrandom(&mut init).expect("failed to generate obfuscation keys");
        }

        init[56..60].copy_from_slice(&inner.init_tag());

        let mut cipher = ObfuscatedCipher::new(&init);

        let mut encrypted_init = init;
        cipher.encrypt(&mut encrypted_init);
        init[56..64].copy_from_slice(&encrypted_init[56..64]);

        (init, cipher)
    }

    pub fn new(mut inner: T) -> Self {
        let (init, cipher) = Self::generate_keys(&mut inner);

        Self {
            inner,
            head: Some(init),
            decrypt_tail: 0,
            cipher,
        }
    }
}

impl<T: Transport + Tagged> Transport for Obfuscated<T> {
    fn pack(&mut self, buffer: &mut DequeBuffer<u8>, quick_ack: bool) {
        self.inner.pack(buffer, quick_ack);
        self.cipher.encrypt(buffer.as_mut());
        if let Some(head) = self.head.take() {
            buffer.extend_front(&head);
        }
    }

    fn unpack(&mut self, buffer: &mut [u8]) -> Result<Unpacked, Error> {
        // Callers must only ever drop bytes that were already unpacked.
        debug_assert!(buffer.len() >= self.decrypt_tail);
        let tail = self.decrypt_tail.min(buffer.len());

        self.cipher.decrypt(&mut buffer[tail..]);
        self.decrypt_tail = buffer.len();

        let unpacked = self.inner.unpack(buffer)?;
        self.decrypt_tail -= unpacked.next_offset();
        Ok(unpacked)
    }

    fn reset(&mut self) {
        self.inner.reset();
        debug!("regenerating keys for obfuscated transport");

        let (init, cipher) = Self::generate_keys(&mut self.inner);
        self.head = Some(init);
        self.decrypt_tail = 0;
        self.cipher = cipher;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Intermediate, UnpackedOffset};

    fn payload(unpacked: Unpacked) -> UnpackedOffset {
        match unpacked {
            Unpacked::Payload(offset) => offset,
            Unpacked::QuickAck { .. } => panic!("expected payload, got {unpacked:?}"),
        }
    }

    #[test]
    fn forbidden_starts_are_rejected() {
        let mut init = [1; 64];
        assert!(is_valid_init(&init));

        init[..4].copy_from_slice(b"POST");
        assert!(!is_valid_init(&init));

        init[..4].copy_from_slice(&[0xef, 1, 1, 1]);
        assert!(!is_valid_init(&init));

        init[..4].copy_from_slice(&[1; 4]);
        init[4..8].copy_from_slice(&[0; 4]);
        assert!(!is_valid_init(&init));
    }

    #[test]
    fn head_is_sent_once() {
        let mut transport = Obfuscated::new(Intermediate::new());

        let mut buffer = DequeBuffer::with_capacity(16, 0);
        buffer.extend([0u8; 16]);
        transport.pack(&mut buffer, false);
        assert_eq!(buffer.len(), 64 + 4 + 16);
        assert!(is_valid_init(&buffer[..64].try_into().unwrap()));

        let mut buffer = DequeBuffer::with_capacity(16, 0);
        buffer.extend([0u8; 16]);
        transport.pack(&mut buffer, false);
        assert_eq!(buffer.len(), 4 + 16);
    }

    #[test]
    fn unpack_across_partial_reads() {
        // The peer keys its streams from the reversed head, and skips
        // the 64 bytes we spent encrypting it.
        let mut sender = Obfuscated::new(Intermediate::new());
        let mut reversed = sender.head.unwrap();
        reversed.reverse();
        let mut cipher = ObfuscatedCipher::new(&reversed);
        cipher.decrypt(&mut [0u8; 64]);
        let mut receiver = Obfuscated {
            inner: Intermediate::new(),
            head: None,
            decrypt_tail: 0,
            cipher,
        };

        let orig = (0..32).collect::<Vec<u8>>();
        let mut stream = Vec::new();
        for _ in 0..2 {
            let mut buffer = DequeBuffer::with_capacity(32, 0);
            buffer.extend(&orig);
            sender.pack(&mut buffer, false);
            stream.extend(&buffer[..]);
        }
        let mut stream = stream[64..].to_vec();

        let mut partial = stream[..10].to_vec();
        assert_eq!(receiver.unpack(&mut partial), Err(Error::MissingBytes));

        partial.extend(&stream[10..]);
        stream = partial;
        let offset = payload(receiver.unpack(&mut stream).unwrap());
        assert_eq!(&stream[offset.data_start..offset.data_end], &orig[..]);

        stream.drain(..offset.next_offset);
        let offset = payload(receiver.unpack(&mut stream).unwrap());
        assert_eq!(&stream[offset.data_start..offset.data_end], &orig[..]);
    }
}
