// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtkit_crypto::{AuthKey, DequeBuffer, Side, decrypt_data_v2_as, encrypt_data_v2_as};
use mtkit_mtproto::manual_tl::{Message, RpcResult};
use mtkit_mtproto::mtp::{self, Deserialization, Encrypted, Plain};
use mtkit_mtproto::transport::{Full, Intermediate, Transport, Unpacked};
use mtkit_mtproto::{MsgId, SessionInfo, authentication};
use mtkit_tl_types::{Deserializable, InputStream, Serializable};
use std::time::{SystemTime, UNIX_EPOCH};

const SESSION_ID: i64 = 0x0102_0304_0506_0708;
const SALT: i64 = 0x1111_2222;

fn auth_key() -> [u8; 256] {
    let mut key = [0; 256];
    key.iter_mut()
        .enumerate()
        .for_each(|(i, x)| *x = (i * 7) as u8);
    key
}

fn unpack_one(transport: &mut impl Transport, stream: &mut [u8]) -> (Unpacked, Vec<u8>) {
    let unpacked = transport.unpack(stream).unwrap();
    let data = match &unpacked {
        Unpacked::Payload(offset) => stream[offset.data_start..offset.data_end].to_vec(),
        Unpacked::QuickAck { .. } => Vec::new(),
    };
    (unpacked, data)
}

#[test]
fn client_request_reaches_server() {
    let mut client = Encrypted::build()
        .compression_threshold(None)
        .finish(auth_key());
    let mut session = SessionInfo::with_session_id(SESSION_ID, 0);
    let mut transport = Intermediate::new();

    let mut buffer = DequeBuffer::with_capacity(0, 0);
    let msg_id = client
        .push(&mut session, &mut buffer, b"Hey!", true)
        .unwrap();
    let finalized = client.finalize(&mut session, SALT, &mut buffer).unwrap();
    assert_eq!(finalized.msg_id, msg_id);
    let token = finalized.quick_ack_token.unwrap();
    transport.pack(&mut buffer, true);

    // Server side.
    // The first packet starts with the transport tag, which isn't a frame.
    let mut server_transport = Intermediate::new();
    assert_eq!(&buffer[..4], [0xee; 4]);
    let mut stream = buffer[4..].to_vec();
    let (_, payload) = unpack_one(&mut server_transport, &mut stream);
    let plaintext =
        decrypt_data_v2_as(&payload, &AuthKey::from_bytes(auth_key()), Side::Client).unwrap();

    let mut input = InputStream::from_slice(&plaintext);
    assert_eq!(i64::deserialize(&mut input).unwrap(), SALT);
    assert_eq!(i64::deserialize(&mut input).unwrap(), SESSION_ID);
    let message = Message::deserialize(&mut input).unwrap();
    assert_eq!(message.msg_id, msg_id.0);
    assert_eq!(message.seq_no, 1);
    assert_eq!(message.body, b"Hey!");

    // The server confirms the receipt with the token we were given.
    let mut ack = token.to_le_bytes();
    assert_eq!(
        transport.unpack(&mut ack),
        Ok(Unpacked::QuickAck {
            token,
            next_offset: 4
        })
    );
}

#[test]
fn server_response_reaches_client() {
    let mut client = Encrypted::build().finish(auth_key());
    let mut session = SessionInfo::with_session_id(SESSION_ID, 0);
    let mut transport = Full::new();

    let mut buffer = DequeBuffer::with_capacity(0, 0);
    let msg_id = client
        .push(&mut session, &mut buffer, b"Hey!", true)
        .unwrap();
    client.finalize(&mut session, SALT, &mut buffer).unwrap();

    // Server side.
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let message = Message {
        msg_id: (now << 32) | 1,
        seq_no: 1,
        body: RpcResult {
            req_msg_id: msg_id.0,
            result: b"Bye!".to_vec(),
        }
        .to_bytes(),
    };
    let mut buffer = DequeBuffer::with_capacity(0, 0);
    buffer.extend(SALT.to_le_bytes());
    buffer.extend(SESSION_ID.to_le_bytes());
    buffer.extend(message.to_bytes());
    encrypt_data_v2_as(&mut buffer, &AuthKey::from_bytes(auth_key()), Side::Server);
    let mut server_transport = Full::new();
    server_transport.pack(&mut buffer, false);

    // Client side, reading the response one byte short first.
    let mut stream = buffer[..].to_vec();
    let len = stream.len();
    assert_eq!(
        transport.unpack(&mut stream[..len - 1]),
        Err(mtkit_mtproto::transport::Error::MissingBytes)
    );
    let (_, payload) = unpack_one(&mut transport, &mut stream);
    let results = client.deserialize(&mut session, &payload).unwrap();

    assert_eq!(
        results,
        vec![Deserialization::RpcResult(mtp::RpcResult {
            msg_id,
            body: b"Bye!".to_vec()
        })]
    );
    assert!(session.unacknowledged().is_empty());

    // The response must be acknowledged with the next packet.
    let mut buffer = DequeBuffer::with_capacity(0, 0);
    let finalized = client.finalize(&mut session, SALT, &mut buffer).unwrap();
    assert_eq!(finalized.quick_ack_token, None);
    assert_eq!(finalized.msg_ids.len(), 1);
}

#[test]
fn handshake_request_is_plain() {
    let mut plain = Plain::new();
    let mut session = SessionInfo::new(0);
    let mut transport = Intermediate::new();

    let (request, _) = authentication::step1().unwrap();
    let mut buffer = DequeBuffer::with_capacity(request.len(), 32);
    buffer.extend(&request);
    let msg_id = plain.serialize(&mut session, &mut buffer);
    transport.pack(&mut buffer, false);

    // tag + len + auth_key_id + msg_id + len + body
    assert_eq!(buffer.len(), 4 + 4 + 8 + 8 + 4 + request.len());
    assert_eq!(&buffer[..4], [0xee; 4]);
    assert_eq!(&buffer[8..16], [0; 8]);
    assert_eq!(&buffer[16..24], msg_id.0.to_le_bytes());
    assert_ne!(msg_id, MsgId(0));
}
