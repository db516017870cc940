// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![deny(unsafe_code)]

//! Cryptographic primitives used by MTProto 2.0.
//!
//! Everything here is a pure function over byte buffers (plus the small
//! stateful CTR stream ciphers). The actual block ciphers, hashes and big
//! integer arithmetic come from RustCrypto and `num-bigint`.

pub mod aes;
mod auth_key;
mod deque_buffer;
pub mod dh;
pub mod factorize;
mod obfuscated;
pub mod rsa;
mod sha;

pub use auth_key::AuthKey;
pub use deque_buffer::DequeBuffer;
use getrandom::getrandom;
pub use obfuscated::ObfuscatedCipher;
use std::fmt;

#[doc(hidden)]
pub use ::sha1 as sha1_impl;
#[doc(hidden)]
pub use ::sha2 as sha2_impl;

/// The ways in which the primitives in this crate can fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// An input had a length (or value) the operation cannot work with.
    InvalidArgument { reason: &'static str },

    /// The ciphertext is either too small or not padded correctly.
    InvalidBuffer,

    /// The server replied with the ID of a different authorization key.
    AuthKeyMismatch,

    /// The key of the message did not match our expectations.
    MessageKeyMismatch,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Error::InvalidBuffer => write!(f, "invalid ciphertext buffer length"),
            Error::AuthKeyMismatch => write!(f, "server authkey mismatches with ours"),
            Error::MessageKeyMismatch => write!(f, "server msgkey mismatches with ours"),
        }
    }
}

/// The party that produced (and encrypted) a message.
///
/// The key derivation differs slightly depending on the direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    // "where x = 0 for messages from client to server and x = 8 for those
    // from server to client"
    fn x(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }
}

/// Calculate the key and IV based on the [MTProto 2.0 algorithm].
///
/// [MTProto 2.0 algorithm]: https://core.telegram.org/mtproto/description#defining-aes-key-and-initialization-vector
fn calc_key(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let x = side.x();

    // sha256_a = SHA256 (msg_key + substr (auth_key, x, 36))
    let sha256_a = sha256!(msg_key, &auth_key.data[x..x + 36]);

    // sha256_b = SHA256 (substr (auth_key, 40+x, 36) + msg_key)
    let sha256_b = sha256!(&auth_key.data[40 + x..40 + x + 36], msg_key);

    // aes_key = substr (sha256_a, 0, 8) + substr (sha256_b, 8, 16) + substr (sha256_a, 24, 8)
    let mut aes_key = [0; 32];
    aes_key[..8].copy_from_slice(&sha256_a[..8]);
    aes_key[8..24].copy_from_slice(&sha256_b[8..24]);
    aes_key[24..].copy_from_slice(&sha256_a[24..]);

    // aes_iv = substr (sha256_b, 0, 8) + substr (sha256_a, 8, 16) + substr (sha256_b, 24, 8)
    let mut aes_iv = [0; 32];
    aes_iv[..8].copy_from_slice(&sha256_b[..8]);
    aes_iv[8..24].copy_from_slice(&sha256_a[8..24]);
    aes_iv[24..].copy_from_slice(&sha256_b[24..]);

    (aes_key, aes_iv)
}

// msg_key_large = SHA256 (substr (auth_key, 88+x, 32) + plaintext + random_padding)
fn calc_msg_key_large(auth_key: &AuthKey, padded_plaintext: &[u8], side: Side) -> [u8; 32] {
    let x = side.x();
    sha256!(&auth_key.data[88 + x..88 + x + 32], padded_plaintext)
}

// msg_key = substr (msg_key_large, 8, 16)
fn calc_msg_key(auth_key: &AuthKey, padded_plaintext: &[u8], side: Side) -> [u8; 16] {
    let msg_key_large = calc_msg_key_large(auth_key, padded_plaintext, side);
    let mut msg_key = [0; 16];
    msg_key.copy_from_slice(&msg_key_large[8..24]);
    msg_key
}

/// The token the server will answer with when asked to quickly
/// acknowledge the client message with the given padded plaintext.
///
/// It is the first 32 bits of `msg_key_large`, with the most significant
/// bit set.
pub fn calc_quick_ack_token(auth_key: &AuthKey, padded_plaintext: &[u8]) -> u32 {
    let msg_key_large = calc_msg_key_large(auth_key, padded_plaintext, Side::Client);
    let mut token = [0; 4];
    token.copy_from_slice(&msg_key_large[..4]);
    u32::from_le_bytes(token) | 0x8000_0000
}

/// Determines the padding length needed for a plaintext of a certain length,
/// according to the following citation:
///
/// > Note that MTProto 2.0 requires from 12 to 1024 bytes of padding
/// > [...] the resulting message length be divisible by 16 bytes
fn determine_padding_v2_length(len: usize) -> usize {
    16 + (16 - (len % 16))
}

// Inner body of `encrypt_data_v2`, separated for testing purposes.
fn do_encrypt_data_v2(buffer: &mut DequeBuffer<u8>, auth_key: &AuthKey, side: Side) -> u32 {
    let msg_key_large = calc_msg_key_large(auth_key, buffer.as_ref(), side);
    let mut msg_key = [0; 16];
    msg_key.copy_from_slice(&msg_key_large[8..24]);
    let mut quick_ack = [0; 4];
    quick_ack.copy_from_slice(&msg_key_large[..4]);

    let (key, mut iv) = calc_key(auth_key, &msg_key, side);
    aes::ige_encrypt_unchecked(buffer.as_mut(), &key, &mut iv);

    buffer.extend_front(&msg_key);
    buffer.extend_front(&auth_key.key_id);
    u32::from_le_bytes(quick_ack) | 0x8000_0000
}

/// Encrypts the plaintext in `buffer` in place as a message sent by the
/// client, prepending the key identifier and the message key.
///
/// Returns the token the server uses to quickly acknowledge the message.
pub fn encrypt_data_v2(buffer: &mut DequeBuffer<u8>, auth_key: &AuthKey) -> u32 {
    encrypt_data_v2_as(buffer, auth_key, Side::Client)
}

/// Like [`encrypt_data_v2`], but as if the message was produced by `side`.
pub fn encrypt_data_v2_as(buffer: &mut DequeBuffer<u8>, auth_key: &AuthKey, side: Side) -> u32 {
    let mut random_padding = [0; 32];
    getrandom(&mut random_padding).expect("failed to generate a secure padding");
    let padding_len = determine_padding_v2_length(buffer.len());
    buffer.extend(&random_padding[..padding_len]);

    do_encrypt_data_v2(buffer, auth_key, side)
}

/// Decrypts a message sent by the server, returning the padded plaintext.
pub fn decrypt_data_v2(ciphertext: &[u8], auth_key: &AuthKey) -> Result<Vec<u8>, Error> {
    decrypt_data_v2_as(ciphertext, auth_key, Side::Server)
}

/// Like [`decrypt_data_v2`], but for a message produced by `side`.
pub fn decrypt_data_v2_as(
    ciphertext: &[u8],
    auth_key: &AuthKey,
    side: Side,
) -> Result<Vec<u8>, Error> {
    if ciphertext.len() < 24 || (ciphertext.len() - 24) % 16 != 0 {
        return Err(Error::InvalidBuffer);
    }

    if ciphertext[..8] != auth_key.key_id {
        return Err(Error::AuthKeyMismatch);
    }

    let mut msg_key = [0; 16];
    msg_key.copy_from_slice(&ciphertext[8..24]);

    let (key, mut iv) = calc_key(auth_key, &msg_key, side);
    let mut plaintext = ciphertext[24..].to_vec();
    aes::ige_decrypt_unchecked(&mut plaintext, &key, &mut iv);

    if calc_msg_key(auth_key, &plaintext, side) != msg_key {
        return Err(Error::MessageKeyMismatch);
    }

    Ok(plaintext)
}

/// Generate the AES key and initialization vector from the server nonce
/// and the new client nonce. This is done after the DH exchange.
pub fn generate_key_data_from_nonce(
    server_nonce: &[u8; 16],
    new_nonce: &[u8; 32],
) -> ([u8; 32], [u8; 32]) {
    let hash1 = sha1!(new_nonce, server_nonce);
    let hash2 = sha1!(server_nonce, new_nonce);
    let hash3 = sha1!(new_nonce, new_nonce);

    // key = hash1 + hash2[:12]
    let mut key = [0; 32];
    key[..20].copy_from_slice(&hash1);
    key[20..].copy_from_slice(&hash2[..12]);

    // iv = hash2[12:20] + hash3 + new_nonce[:4]
    let mut iv = [0; 32];
    iv[..8].copy_from_slice(&hash2[12..]);
    iv[8..28].copy_from_slice(&hash3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth_key() -> AuthKey {
        let mut buffer = [0u8; 256];
        buffer.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8);
        AuthKey::from_bytes(buffer)
    }

    #[test]
    fn encrypt_client_data_v2() {
        let mut buffer = DequeBuffer::with_capacity(0, 0);
        buffer.extend(b"Hello, world! This data should remain secure!");
        for _ in 0..determine_padding_v2_length(buffer.len()) {
            buffer.push(0);
        }

        let expected = vec![
            50, 209, 88, 110, 164, 87, 223, 200, 168, 23, 41, 212, 109, 181, 64, 25, 162, 191, 215,
            247, 68, 249, 185, 108, 79, 113, 108, 253, 196, 71, 125, 178, 162, 193, 95, 109, 219,
            133, 35, 95, 185, 85, 47, 29, 132, 7, 198, 170, 234, 0, 204, 132, 76, 90, 27, 246, 172,
            68, 183, 155, 94, 220, 42, 35, 134, 139, 61, 96, 115, 165, 144, 153, 44, 15, 41, 117,
            36, 61, 86, 62, 161, 128, 210, 24, 238, 117, 124, 154,
        ];

        do_encrypt_data_v2(&mut buffer, &test_auth_key(), Side::Client);
        assert_eq!(buffer.as_ref(), expected);
    }

    #[test]
    fn server_can_read_client_messages() {
        let auth_key = test_auth_key();
        let mut buffer = DequeBuffer::with_capacity(64, 24);
        buffer.extend(b"ping");
        encrypt_data_v2(&mut buffer, &auth_key);

        let plaintext = decrypt_data_v2_as(buffer.as_ref(), &auth_key, Side::Client).unwrap();
        assert!(plaintext.starts_with(b"ping"));
        assert_eq!(plaintext.len() % 16, 0);

        // Reading it as if the server sent it must fail the integrity check.
        assert_eq!(
            decrypt_data_v2(buffer.as_ref(), &auth_key),
            Err(Error::MessageKeyMismatch)
        );
    }

    #[test]
    fn decrypt_rejects_foreign_or_short_data() {
        let auth_key = test_auth_key();
        assert_eq!(
            decrypt_data_v2(&[0; 20], &auth_key),
            Err(Error::InvalidBuffer)
        );
        assert_eq!(
            decrypt_data_v2(&[0; 24 + 16], &auth_key),
            Err(Error::AuthKeyMismatch)
        );
    }

    #[test]
    fn key_from_nonce() {
        let mut server_nonce = [0u8; 16];
        server_nonce.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8);
        let mut new_nonce = [0u8; 32];
        new_nonce.iter_mut().enumerate().for_each(|(i, x)| *x = i as u8);

        let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
        assert_eq!(
            key,
            [
                7, 88, 241, 83, 59, 97, 93, 36, 246, 232, 169, 74, 111, 203, 238, 10, 85, 234, 171,
                34, 23, 215, 41, 92, 169, 33, 61, 26, 45, 125, 22, 166
            ]
        );
        assert_eq!(
            iv,
            [
                90, 132, 16, 142, 152, 5, 101, 108, 232, 100, 7, 14, 22, 110, 98, 24, 246, 120, 62,
                133, 17, 71, 26, 90, 183, 128, 44, 242, 0, 1, 2, 3
            ]
        );
    }
}
