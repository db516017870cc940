// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::DeserializeError;
use crate::{MsgId, SessionInfo};
use mtkit_crypto::DequeBuffer;
use mtkit_tl_types::{Deserializable, InputStream};

/// An implementation of the [Mobile Transport Protocol] for plaintext
/// (unencrypted) messages.
///
/// The reason to separate the plaintext and encrypted implementations
/// for serializing messages is that, even though they are similar, the
/// benefits outweight some minor code reuse.
///
/// This way, the encryption key for [`Encrypted`] is mandatory so errors
/// for trying to encrypt data without a key are completely eliminated.
///
/// Also, the plaintext part of the protocol does not need to deal with
/// the complexity of the full protocol once encrypted messages are used,
/// so being able to keep a simpler implementation separate is a bonus.
///
/// [Mobile Transport Protocol]: https://core.telegram.org/mtproto
/// [`Encrypted`]: super::Encrypted
#[non_exhaustive]
pub struct Plain;

#[allow(clippy::new_without_default)]
impl Plain {
    pub fn new() -> Self {
        Self
    }

    /// Wraps the request body in `buffer` into a plain message (also known
    /// as [unencrypted messages]) in-place.
    ///
    /// Plain messages may be used for requests that don't require an
    /// authorization key to be present, such as those needed to generate
    /// the authorization key itself.
    ///
    /// [unencrypted messages]: https://core.telegram.org/mtproto/description#unencrypted-message
    pub fn serialize(&mut self, session: &mut SessionInfo, buffer: &mut DequeBuffer<u8>) -> MsgId {
        let msg_id = session.generate_msg_id();

        let len = buffer.len() as i32;
        buffer.extend_front(&len.to_le_bytes()); // message_data_length
        buffer.extend_front(&msg_id.0.to_le_bytes()); // message_id
        buffer.extend_front(&0i64.to_le_bytes()); // auth_key_id = 0

        msg_id
    }

    /// Validates that the returned data is a correct plain message, and
    /// if it is, the method returns the inner contents of the message.
    pub fn deserialize(&self, payload: &[u8]) -> Result<Vec<u8>, DeserializeError> {
        crate::utils::check_message_buffer(payload)?;

        let mut buf = InputStream::from_slice(payload);
        let auth_key_id = i64::deserialize(&mut buf)?;
        if auth_key_id != 0 {
            return Err(DeserializeError::BadAuthKey {
                got: auth_key_id,
                expected: 0,
            });
        }

        let msg_id = i64::deserialize(&mut buf)?;
        // We can't validate it's close to our system time because our sytem
        // time may be wrong at this point (it only matters once encrypted
        // communication begins). However, we can validate the following:
        //
        // > server message identifiers modulo 4 yield 1 if
        // > the message is a response to a client message
        // https://core.telegram.org/mtproto/description#message-identifier-msg-id
        if msg_id <= 0 || (msg_id % 4) != 1 {
            return Err(DeserializeError::BadMessageId { got: msg_id });
        }

        let len = i32::deserialize(&mut buf)?;
        if len <= 0 {
            return Err(DeserializeError::NegativeMessageLength { got: len });
        }
        if (20 + len) as usize > payload.len() {
            return Err(DeserializeError::TooLongMessageLength {
                got: len as usize,
                max_length: payload.len() - 20,
            });
        }

        Ok(payload[20..20 + len as usize].into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_message(msg_id: i64, body: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend(0i64.to_le_bytes());
        payload.extend(msg_id.to_le_bytes());
        payload.extend((body.len() as i32).to_le_bytes());
        payload.extend(body);
        payload
    }

    #[test]
    fn serialize_prepends_header() {
        let mut mtp = Plain::new();
        let mut session = SessionInfo::with_session_id(1, 0);
        let mut buffer = DequeBuffer::with_capacity(4, 20);
        buffer.extend(b"Hey!");

        let msg_id = mtp.serialize(&mut session, &mut buffer);
        assert_eq!(buffer.len(), 24);
        assert_eq!(&buffer[..8], &[0; 8]);
        assert_eq!(&buffer[8..16], &msg_id.0.to_le_bytes());
        assert_eq!(&buffer[16..20], &[4, 0, 0, 0]);
        assert_eq!(&buffer[20..], b"Hey!");

        let mut buffer = DequeBuffer::with_capacity(4, 20);
        buffer.extend(b"Hey!");
        assert!(mtp.serialize(&mut session, &mut buffer).0 > msg_id.0);
    }

    #[test]
    fn deserialize_returns_body() {
        let mtp = Plain::new();
        let payload = server_message(0x1234_0001, b"body");
        assert_eq!(mtp.deserialize(&payload), Ok(b"body".to_vec()));
    }

    #[test]
    fn deserialize_rejects_bad_fields() {
        let mtp = Plain::new();

        let mut payload = server_message(0x1234_0001, b"body");
        payload[0] = 1;
        assert_eq!(
            mtp.deserialize(&payload),
            Err(DeserializeError::BadAuthKey {
                got: 1,
                expected: 0
            })
        );

        let payload = server_message(0x1234_0003, b"body");
        assert_eq!(
            mtp.deserialize(&payload),
            Err(DeserializeError::BadMessageId { got: 0x1234_0003 })
        );

        let mut payload = server_message(0x1234_0001, b"body");
        payload.truncate(22);
        assert_eq!(
            mtp.deserialize(&payload),
            Err(DeserializeError::TooLongMessageLength {
                got: 4,
                max_length: 2
            })
        );
    }
}
