// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtkit_crypto::AuthKey;
use mtkit_tl_types::deserialize::{Buffer, Error, Result};
use mtkit_tl_types::mtproto::FutureSalt;
use mtkit_tl_types::{Deserializable, Serializable};

/// How long the salt obtained while generating an authorization key is
/// assumed to be valid for, in seconds.
const INITIAL_SALT_VALIDITY: i64 = 30 * 60;

/// A server salt along with the range of message identifiers it may be
/// used for (`first_valid_message_id` inclusive, `last_valid_message_id`
/// exclusive).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatacenterSaltInfo {
    pub salt: i64,
    pub first_valid_message_id: i64,
    pub last_valid_message_id: i64,
}

/// Everything needed to talk to a datacenter securely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatacenterAuthInfo {
    auth_key: AuthKey,
    salts: Vec<DatacenterSaltInfo>,
}

/// The smallest message identifier that can be produced at `timestamp`.
pub fn message_id_for_timestamp(timestamp: i64) -> i64 {
    timestamp << 32
}

impl DatacenterSaltInfo {
    /// The salt that comes out of the authorization key exchange.
    pub fn initial(salt: i64, now: i64) -> Self {
        Self {
            salt,
            first_valid_message_id: message_id_for_timestamp(now),
            last_valid_message_id: message_id_for_timestamp(now + INITIAL_SALT_VALIDITY),
        }
    }

    pub fn contains(&self, message_id: i64) -> bool {
        self.first_valid_message_id <= message_id && message_id < self.last_valid_message_id
    }
}

impl From<&FutureSalt> for DatacenterSaltInfo {
    fn from(salt: &FutureSalt) -> Self {
        Self {
            salt: salt.salt,
            first_valid_message_id: message_id_for_timestamp(salt.valid_since as i64),
            last_valid_message_id: message_id_for_timestamp(salt.valid_until as i64),
        }
    }
}

impl Serializable for DatacenterSaltInfo {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.salt.serialize(buf);
        self.first_valid_message_id.serialize(buf);
        self.last_valid_message_id.serialize(buf);
    }
}

impl Deserializable for DatacenterSaltInfo {
    fn deserialize(buf: Buffer) -> Result<Self> {
        Ok(Self {
            salt: i64::deserialize(buf)?,
            first_valid_message_id: i64::deserialize(buf)?,
            last_valid_message_id: i64::deserialize(buf)?,
        })
    }
}

fn serialize_key(key: &AuthKey, buf: &mut impl Extend<u8>) {
    key.to_bytes().as_slice().serialize(buf);
}

fn deserialize_key(buf: Buffer) -> Result<AuthKey> {
    let data = Vec::<u8>::deserialize(buf)?;
    let data = <[u8; 256]>::try_from(data).map_err(|_| Error::MalformedData {
        reason: "authorization key must be 256 bytes long",
    })?;
    Ok(AuthKey::from_bytes(data))
}

impl DatacenterAuthInfo {
    pub fn new(auth_key: AuthKey, salts: Vec<DatacenterSaltInfo>) -> Self {
        let mut info = Self {
            auth_key,
            salts: Vec::new(),
        };
        info.merge_salts(salts);
        info
    }

    pub fn auth_key(&self) -> &AuthKey {
        &self.auth_key
    }

    pub fn salts(&self) -> &[DatacenterSaltInfo] {
        &self.salts
    }

    /// The salt to use for a message with the given identifier, or `None`
    /// if no known salt is valid for it.
    pub fn salt_for_message_id(&self, message_id: i64) -> Option<i64> {
        self.salts
            .iter()
            .find(|s| s.contains(message_id))
            .map(|s| s.salt)
    }

    /// The salt to use for a message sent at `timestamp` (server time,
    /// in seconds).
    pub fn salt_for_timestamp(&self, timestamp: i64) -> Option<i64> {
        self.salt_for_message_id(message_id_for_timestamp(timestamp))
    }

    /// Add new salts, replacing the window of any salt already known.
    ///
    /// The set stays sorted by the start of each window.
    pub fn merge_salts(&mut self, salts: impl IntoIterator<Item = DatacenterSaltInfo>) {
        for salt in salts {
            match self.salts.iter_mut().find(|s| s.salt == salt.salt) {
                Some(known) => *known = salt,
                None => self.salts.push(salt),
            }
        }
        self.salts.sort_by_key(|s| s.first_valid_message_id);
    }

    /// Forget a salt the server no longer accepts.
    pub fn remove_salt(&mut self, salt: i64) {
        self.salts.retain(|s| s.salt != salt);
    }

    /// Forget salts whose window ends before `message_id`.
    pub fn prune_salts(&mut self, message_id: i64) {
        self.salts.retain(|s| s.last_valid_message_id > message_id);
    }

    /// How many salts remain usable from `message_id` on.
    pub fn remaining_salts(&self, message_id: i64) -> usize {
        self.salts
            .iter()
            .filter(|s| s.last_valid_message_id > message_id)
            .count()
    }
}

impl Serializable for DatacenterAuthInfo {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        serialize_key(&self.auth_key, buf);
        self.salts.serialize(buf);
    }
}

impl Deserializable for DatacenterAuthInfo {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let auth_key = deserialize_key(buf)?;
        let salts = Vec::<DatacenterSaltInfo>::deserialize(buf)?;
        Ok(Self::new(auth_key, salts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> AuthKey {
        AuthKey::from_bytes([byte; 256])
    }

    fn salt(salt: i64, from: i64, until: i64) -> DatacenterSaltInfo {
        DatacenterSaltInfo {
            salt,
            first_valid_message_id: message_id_for_timestamp(from),
            last_valid_message_id: message_id_for_timestamp(until),
        }
    }

    #[test]
    fn salt_windows() {
        let info = DatacenterAuthInfo::new(key(1), vec![salt(1, 0, 100), salt(2, 100, 200)]);

        assert_eq!(info.salt_for_timestamp(99), Some(1));
        assert_eq!(info.salt_for_timestamp(100), Some(2));
        assert_eq!(info.salt_for_timestamp(101), Some(2));
        assert_eq!(info.salt_for_timestamp(200), None);
        assert_eq!(info.salt_for_timestamp(-1), None);
    }

    #[test]
    fn salt_for_message_id_within_second() {
        let info = DatacenterAuthInfo::new(key(1), vec![salt(7, 10, 11)]);
        let id = message_id_for_timestamp(10) | 0x7fff_fffc;

        assert_eq!(info.salt_for_message_id(id), Some(7));
        assert_eq!(info.salt_for_message_id(message_id_for_timestamp(11)), None);
    }

    #[test]
    fn merge_replaces_and_sorts() {
        let mut info = DatacenterAuthInfo::new(key(1), vec![salt(2, 100, 200)]);
        info.merge_salts(vec![salt(1, 0, 100), salt(2, 100, 300)]);

        assert_eq!(info.salts(), &[salt(1, 0, 100), salt(2, 100, 300)]);
    }

    #[test]
    fn prune_drops_expired() {
        let mut info = DatacenterAuthInfo::new(key(1), vec![salt(1, 0, 100), salt(2, 100, 200)]);
        assert_eq!(info.remaining_salts(message_id_for_timestamp(150)), 1);

        info.prune_salts(message_id_for_timestamp(100));
        assert_eq!(info.salts(), &[salt(2, 100, 200)]);
    }

    #[test]
    fn rejected_salt_is_removed() {
        let mut info = DatacenterAuthInfo::new(key(1), vec![salt(1, 0, 100), salt(2, 50, 150)]);
        assert_eq!(info.salt_for_timestamp(60), Some(1));

        info.remove_salt(1);
        assert_eq!(info.salt_for_timestamp(60), Some(2));
    }

    #[test]
    fn future_salt_window() {
        let info = DatacenterSaltInfo::from(&FutureSalt {
            valid_since: 5,
            valid_until: 6,
            salt: 3,
        });
        assert!(info.contains(message_id_for_timestamp(5)));
        assert!(!info.contains(message_id_for_timestamp(6)));
    }

    #[test]
    fn auth_info_serializes_key_and_salts() {
        let info = DatacenterAuthInfo::new(
            key(3),
            vec![DatacenterSaltInfo::initial(9, 1000), salt(8, 0, 1000)],
        );
        let bytes = info.to_bytes();
        // Length-prefixed key, then the vector of salts.
        assert_eq!(bytes.len(), 4 + 256 + 8 + 2 * 24);

        let restored = DatacenterAuthInfo::from_bytes(&bytes).unwrap();
        assert_eq!(restored, info);
        assert_eq!(restored.salts()[0].salt, 8);
    }

    #[test]
    fn short_key_is_malformed() {
        let mut bytes = Vec::new();
        vec![0u8; 128].serialize(&mut bytes);
        Vec::<DatacenterSaltInfo>::new().serialize(&mut bytes);

        assert!(matches!(
            DatacenterAuthInfo::from_bytes(&bytes),
            Err(Error::MalformedData { .. })
        ));
    }
}
