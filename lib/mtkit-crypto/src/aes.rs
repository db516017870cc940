// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! AES-256 in the block modes used by MTProto.
//!
//! IGE protects every message body and the handshake answers, CBC is used
//! by some file and secret-chat helpers and CTR drives the obfuscated
//! transport. All the block-mode functions work in place and reject buffers
//! whose length is not a multiple of the block size.
use crate::Error;
use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};

const BLOCK: usize = 16;

fn check_blocks(buffer: &[u8]) -> Result<(), Error> {
    if buffer.len() % BLOCK == 0 {
        Ok(())
    } else {
        Err(Error::InvalidArgument {
            reason: "buffer length is not a multiple of the AES block size",
        })
    }
}

/// Encrypt the buffer in place using AES-256-IGE.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) -> Result<(), Error> {
    let mut iv = *iv;
    ige_encrypt_mut_iv(buffer, key, &mut iv)
}

/// Decrypt the buffer in place using AES-256-IGE.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) -> Result<(), Error> {
    let mut iv = *iv;
    ige_decrypt_mut_iv(buffer, key, &mut iv)
}

/// Like [`ige_encrypt`], but leaves `iv` in the state needed to keep the
/// chain going on a later call.
pub fn ige_encrypt_mut_iv(
    buffer: &mut [u8],
    key: &[u8; 32],
    iv: &mut [u8; 32],
) -> Result<(), Error> {
    check_blocks(buffer)?;
    ige_encrypt_unchecked(buffer, key, iv);
    Ok(())
}

/// Like [`ige_decrypt`], but leaves `iv` in the state needed to keep the
/// chain going on a later call.
pub fn ige_decrypt_mut_iv(
    buffer: &mut [u8],
    key: &[u8; 32],
    iv: &mut [u8; 32],
) -> Result<(), Error> {
    check_blocks(buffer)?;
    ige_decrypt_unchecked(buffer, key, iv);
    Ok(())
}

// The first half of `iv` holds the previous ciphertext block, the second
// half the previous plaintext block.
pub(crate) fn ige_encrypt_unchecked(buffer: &mut [u8], key: &[u8; 32], iv: &mut [u8; 32]) {
    debug_assert_eq!(buffer.len() % BLOCK, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));

    for block in buffer.chunks_exact_mut(BLOCK) {
        let mut plain = [0u8; BLOCK];
        plain.copy_from_slice(block);

        block.iter_mut().zip(&iv[..BLOCK]).for_each(|(b, v)| *b ^= v);
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        block.iter_mut().zip(&iv[BLOCK..]).for_each(|(b, v)| *b ^= v);

        iv[..BLOCK].copy_from_slice(block);
        iv[BLOCK..].copy_from_slice(&plain);
    }
}

pub(crate) fn ige_decrypt_unchecked(buffer: &mut [u8], key: &[u8; 32], iv: &mut [u8; 32]) {
    debug_assert_eq!(buffer.len() % BLOCK, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));

    for block in buffer.chunks_exact_mut(BLOCK) {
        let mut encrypted = [0u8; BLOCK];
        encrypted.copy_from_slice(block);

        block.iter_mut().zip(&iv[BLOCK..]).for_each(|(b, v)| *b ^= v);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        block.iter_mut().zip(&iv[..BLOCK]).for_each(|(b, v)| *b ^= v);

        iv[..BLOCK].copy_from_slice(&encrypted);
        iv[BLOCK..].copy_from_slice(block);
    }
}

/// Encrypt the buffer in place using AES-256-CBC. `iv` ends up holding the
/// last ciphertext block.
pub fn cbc_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &mut [u8; 16]) -> Result<(), Error> {
    check_blocks(buffer)?;
    let cipher = Aes256::new(GenericArray::from_slice(key));

    for block in buffer.chunks_exact_mut(BLOCK) {
        block.iter_mut().zip(iv.iter()).for_each(|(b, v)| *b ^= v);
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        iv.copy_from_slice(block);
    }
    Ok(())
}

/// Decrypt the buffer in place using AES-256-CBC. `iv` ends up holding the
/// last ciphertext block.
pub fn cbc_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &mut [u8; 16]) -> Result<(), Error> {
    check_blocks(buffer)?;
    let cipher = Aes256::new(GenericArray::from_slice(key));

    for block in buffer.chunks_exact_mut(BLOCK) {
        let mut encrypted = [0u8; BLOCK];
        encrypted.copy_from_slice(block);

        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        block.iter_mut().zip(iv.iter()).for_each(|(b, v)| *b ^= v);
        *iv = encrypted;
    }
    Ok(())
}

/// AES-256 in counter mode, with a big-endian 128-bit counter.
///
/// The keystream position is kept between calls, so a stream may be fed in
/// arbitrarily sized pieces.
pub struct AesCtr {
    inner: ctr::Ctr128BE<Aes256>,
}

impl AesCtr {
    pub fn new(key: &[u8; 32], iv: &[u8; 16]) -> Self {
        Self {
            inner: ctr::Ctr128BE::<Aes256>::new(
                GenericArray::from_slice(key),
                GenericArray::from_slice(iv),
            ),
        }
    }

    /// XOR the buffer with the next bytes of the keystream. Encryption and
    /// decryption are the same operation.
    pub fn apply(&mut self, buffer: &mut [u8]) {
        self.inner.apply_keystream(buffer);
    }
}
