// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtkit_tl_types::mtproto::{self, FutureSalt, FutureSalts, ResPq, ServerDhInnerData};
use mtkit_tl_types::{
    ConnectionParams, DatacenterOption, Deserializable, DeserializeError, InputStream, RawVec,
    RemoteCall, Serializable, Serialization,
};

#[test]
fn composite_values_round_trip() {
    let res_pq = ResPq {
        nonce: [1; 16],
        server_nonce: [2; 16],
        pq: vec![0x17, 0xed, 0x48, 0x94, 0x1a, 0x08, 0xf9, 0x81],
        server_public_key_fingerprints: vec![-3414540481677951611, 42],
    };
    let bytes = res_pq.to_bytes();
    assert_eq!(
        <mtproto::ReqPqMulti as RemoteCall>::Return::from_bytes(&bytes),
        Ok(res_pq)
    );

    let salts = FutureSalts {
        req_msg_id: 1,
        now: 2,
        salts: RawVec(vec![FutureSalt {
            valid_since: 3,
            valid_until: 4,
            salt: 5,
        }]),
    };
    assert_eq!(FutureSalts::from_bytes(&salts.to_bytes()), Ok(salts));

    let long = "x".repeat(300);
    for text in ["", "a", "çà", long.as_str()] {
        assert_eq!(String::from_bytes(&text.to_string().to_bytes()).as_deref(), Ok(text));
    }
}

#[test]
fn every_truncation_of_an_object_fails() {
    let inner = ServerDhInnerData {
        nonce: [3; 16],
        server_nonce: [4; 16],
        g: 3,
        dh_prime: vec![0xc7; 256],
        g_a: vec![0x11; 256],
        server_time: 1_600_000_000,
    };
    let bytes = inner.to_bytes();
    for cut in 0..bytes.len() {
        assert!(ServerDhInnerData::from_bytes(&bytes[..cut]).is_err(), "cut {cut}");
    }

    // Trailing padding is left for the caller to inspect.
    let mut padded = bytes.clone();
    padded.extend([0; 12]);
    let mut stream = InputStream::from_slice(&padded);
    assert_eq!(ServerDhInnerData::deserialize(&mut stream), Ok(inner));
    assert_eq!(stream.pos(), bytes.len());
    assert_eq!(stream.remaining(), 12);
}

/// A made-up schema where the address list is a vector of
/// `(id, host, port)` triples.
struct TestSchema;

impl Serialization for TestSchema {
    fn layer(&self) -> i32 {
        1
    }

    fn datacenter_address_list_request(&self) -> Vec<u8> {
        0xc4f9186bu32.to_bytes()
    }

    fn parse_datacenter_address_list(
        &self,
        response: &[u8],
    ) -> Result<Vec<DatacenterOption>, DeserializeError> {
        let mut stream = InputStream::from_slice(response);
        let count = i32::deserialize(&mut stream)?;
        (0..count)
            .map(|_| {
                Ok(DatacenterOption {
                    id: i32::deserialize(&mut stream)?,
                    host: String::deserialize(&mut stream)?,
                    port: i32::deserialize(&mut stream)? as u16,
                    ipv6: false,
                    media_only: false,
                    cdn: false,
                })
            })
            .collect()
    }

    fn wrap_initial_request(&self, params: &ConnectionParams, request: Vec<u8>) -> Vec<u8> {
        let mut buffer = params.api_id.to_bytes();
        buffer.extend(request);
        buffer
    }
}

#[test]
fn schema_plugs_in_through_the_trait() {
    let schema: Box<dyn Serialization> = Box::new(TestSchema);

    let mut response = 1i32.to_bytes();
    response.extend(2i32.to_bytes());
    response.extend("149.154.167.50".to_string().to_bytes());
    response.extend(443i32.to_bytes());

    let options = schema.parse_datacenter_address_list(&response).unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].id, 2);
    assert_eq!(options[0].host, "149.154.167.50");
    assert_eq!(options[0].port, 443);

    assert!(
        schema
            .parse_datacenter_address_list(&response[..response.len() - 1])
            .is_err()
    );
}
