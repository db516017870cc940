// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::DeserializeError;

/// One network address of a datacenter, as reported by the API schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatacenterOption {
    pub id: i32,
    pub host: String,
    pub port: u16,
    pub ipv6: bool,
    pub media_only: bool,
    pub cdn: bool,
}

/// The client description sent along the first request of every session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionParams {
    pub api_id: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_pack: String,
    pub lang_code: String,
}

/// The bridge between the protocol core and a concrete API schema.
///
/// The core never needs to know what the API requests look like, except
/// for the couple of calls every client has to make. Whoever owns the
/// generated schema implements this trait once.
pub trait Serialization: Send + Sync {
    /// The API layer the schema was generated for.
    fn layer(&self) -> i32;

    /// A serialized request whose answer lists every known datacenter
    /// address (`help.getConfig` in the official schema).
    fn datacenter_address_list_request(&self) -> Vec<u8>;

    /// Parse the answer to [`Serialization::datacenter_address_list_request`].
    fn parse_datacenter_address_list(
        &self,
        response: &[u8],
    ) -> Result<Vec<DatacenterOption>, DeserializeError>;

    /// Wrap the first request sent in a new session so that it also
    /// describes the client and selects the API layer (`invokeWithLayer`
    /// plus `initConnection` in the official schema).
    fn wrap_initial_request(&self, params: &ConnectionParams, request: Vec<u8>) -> Vec<u8>;
}
