// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::sha1;
use std::fmt;

/// A Telegram [authorization key]: the 2048-bit secret shared with one
/// datacenter after the Diffie-Hellman exchange.
///
/// Two keys compare equal when their identifiers do.
///
/// [authorization key]: https://core.telegram.org/mtproto/auth_key
#[derive(Clone)]
pub struct AuthKey {
    pub(crate) data: [u8; 256],
    pub(crate) aux_hash: [u8; 8],
    pub(crate) key_id: [u8; 8],
}

impl AuthKey {
    /// Wraps the raw key material, deriving its identifier and auxiliary hash.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let digest = sha1!(&data);
        let mut aux_hash = [0; 8];
        let mut key_id = [0; 8];
        aux_hash.copy_from_slice(&digest[..8]);
        key_id.copy_from_slice(&digest[12..]);

        Self {
            data,
            aux_hash,
            key_id,
        }
    }

    /// The raw key material, as needed to persist the key.
    pub fn to_bytes(&self) -> [u8; 256] {
        self.data
    }

    /// The 64 lower-order bits of the SHA-1 of the key, as they appear on
    /// the wire in front of every encrypted message.
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// The key identifier as the signed integer TL uses.
    pub fn id(&self) -> i64 {
        i64::from_le_bytes(self.key_id)
    }

    /// `new_nonce_hash{number}` as sent in the `dh_gen_*` answers, where
    /// `number` is 1 for `ok`, 2 for `retry` and 3 for `fail`.
    pub fn calc_new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let digest = sha1!(new_nonce, [number], &self.aux_hash);
        let mut result = [0; 16];
        result.copy_from_slice(&digest[4..]);
        result
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_id == other.key_id
    }
}

impl Eq for AuthKey {}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthKey")
            .field("key_id", &self.id())
            .finish_non_exhaustive()
    }
}
