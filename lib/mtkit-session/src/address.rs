// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtkit_tl_types::deserialize::{Buffer, Error, Result};
use mtkit_tl_types::{DatacenterOption, Deserializable, Serializable};
use std::fmt;

const FLAG_MEDIA_ONLY: u32 = 1 << 0;
const FLAG_CDN: u32 = 1 << 1;
const FLAG_PREFER_FOR_MEDIA: u32 = 1 << 2;
const FLAG_IPV6: u32 = 1 << 3;

const PROD: &[(i32, &str)] = &[
    (1, "149.154.175.50"),
    (2, "149.154.167.51"),
    (3, "149.154.175.100"),
    (4, "149.154.167.91"),
    (5, "91.108.56.130"),
    (203, "91.105.192.100"),
];

const TEST: &[(i32, &str)] = &[
    (1, "149.154.175.10"),
    (2, "149.154.167.40"),
    (3, "149.154.175.117"),
];

/// One network address a datacenter can be reached at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatacenterAddress {
    pub host: String,
    pub port: u16,
    pub ipv6: bool,
    /// Only file transfers should go through this address.
    pub media_only: bool,
    pub cdn: bool,
    pub prefer_for_media: bool,
}

/// The ordered candidate addresses of a single datacenter.
///
/// Connections try them in order, moving on to the next one when the
/// current address fails.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatacenterAddressSet {
    addresses: Vec<DatacenterAddress>,
}

impl DatacenterAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            ipv6: host.contains(':'),
            host,
            port,
            media_only: false,
            cdn: false,
            prefer_for_media: false,
        }
    }

    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.media_only {
            flags |= FLAG_MEDIA_ONLY;
        }
        if self.cdn {
            flags |= FLAG_CDN;
        }
        if self.prefer_for_media {
            flags |= FLAG_PREFER_FOR_MEDIA;
        }
        if self.ipv6 {
            flags |= FLAG_IPV6;
        }
        flags
    }
}

impl fmt::Display for DatacenterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ipv6 {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<DatacenterOption> for DatacenterAddress {
    fn from(option: DatacenterOption) -> Self {
        Self {
            host: option.host,
            port: option.port,
            ipv6: option.ipv6,
            media_only: option.media_only,
            cdn: option.cdn,
            prefer_for_media: option.media_only,
        }
    }
}

impl Serializable for DatacenterAddress {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.host.serialize(buf);
        (self.port as i32).serialize(buf);
        self.flags().serialize(buf);
    }
}

impl Deserializable for DatacenterAddress {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let host = String::deserialize(buf)?;
        let port = u16::try_from(i32::deserialize(buf)?).map_err(|_| Error::MalformedData {
            reason: "port out of range",
        })?;
        let flags = u32::deserialize(buf)?;
        Ok(Self {
            host,
            port,
            ipv6: flags & FLAG_IPV6 != 0,
            media_only: flags & FLAG_MEDIA_ONLY != 0,
            cdn: flags & FLAG_CDN != 0,
            prefer_for_media: flags & FLAG_PREFER_FOR_MEDIA != 0,
        })
    }
}

impl DatacenterAddressSet {
    pub fn new(addresses: Vec<DatacenterAddress>) -> Self {
        Self { addresses }
    }

    /// The built-in address of a datacenter, if it is a well-known one.
    pub fn known(dc_id: i32, test_mode: bool) -> Option<Self> {
        let table = if test_mode { TEST } else { PROD };
        let port = if test_mode { 80 } else { 443 };
        table
            .iter()
            .find(|(id, _)| *id == dc_id)
            .map(|(_, ip)| Self::new(vec![DatacenterAddress::new(*ip, port)]))
    }

    /// Every built-in datacenter along with its address set.
    pub fn known_all(test_mode: bool) -> impl Iterator<Item = (i32, Self)> {
        let table = if test_mode { TEST } else { PROD };
        table
            .iter()
            .filter_map(move |(id, _)| Self::known(*id, test_mode).map(|set| (*id, set)))
    }

    /// Group the options listed by the server per datacenter, keeping
    /// their relative order.
    pub fn from_options(options: Vec<DatacenterOption>) -> Vec<(i32, Self)> {
        let mut sets: Vec<(i32, Self)> = Vec::new();
        for option in options {
            let id = option.id;
            let address = DatacenterAddress::from(option);
            match sets.iter_mut().find(|(dc_id, _)| *dc_id == id) {
                Some((_, set)) => set.addresses.push(address),
                None => sets.push((id, Self::new(vec![address]))),
            }
        }
        sets
    }

    pub fn first(&self) -> Option<&DatacenterAddress> {
        self.addresses.first()
    }

    pub fn get(&self, index: usize) -> Option<&DatacenterAddress> {
        self.addresses.get(index)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatacenterAddress> {
        self.addresses.iter()
    }

    /// A copy of the set with only the addresses suitable for the kind of
    /// traffic requested. Falls back to every address if none match.
    pub fn for_media(&self, media: bool) -> Self {
        let filtered = self
            .addresses
            .iter()
            .filter(|a| !a.cdn && a.media_only == media)
            .cloned()
            .collect::<Vec<_>>();

        if filtered.is_empty() {
            self.clone()
        } else {
            Self::new(filtered)
        }
    }
}

impl Serializable for DatacenterAddressSet {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.addresses.serialize(buf);
    }
}

impl Deserializable for DatacenterAddressSet {
    fn deserialize(buf: Buffer) -> Result<Self> {
        Ok(Self::new(Vec::deserialize(buf)?))
    }
}
