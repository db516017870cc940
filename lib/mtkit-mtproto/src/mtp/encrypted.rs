// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{
    BadMessage, Deserialization, DeserializationFailure, DeserializeError, PushError, RpcResult,
    RpcResultError, check_body,
};
use crate::manual_tl::{self, Message};
use crate::{MsgId, SessionInfo};
use log::{debug, info, trace, warn};
use mtkit_crypto::{AuthKey, DequeBuffer, decrypt_data_v2, encrypt_data_v2};
use mtkit_tl_types::mtproto;
use mtkit_tl_types::{Deserializable, Identifiable, InputStream, Serializable};
use std::mem;

/// The size of the plaintext header of every encrypted packet: the key
/// identifier (8 bytes) and the message key (16 bytes).
pub const ENCRYPTED_PACKET_HEADER_LEN: usize = 8 + 16;

/// The size of the message header for the container, `msg_id`, `seq_no`
/// and `size`, followed by the container header (`constructor`, `len`).
pub const MESSAGE_CONTAINER_HEADER_LEN: usize = (8 + 4 + 4) + (4 + 4);

/// A builder to configure [`Encrypted`] instances.
///
/// Use the [`Encrypted::build`] method to create builder instances.
pub struct Builder {
    compression_threshold: Option<usize>,
}

/// An implementation of the [Mobile Transport Protocol] for ciphertext
/// (encrypted) messages.
///
/// Messages are serialized straight into the caller's buffer with
/// [`Encrypted::push`], and sealed with [`Encrypted::finalize`].
///
/// [Mobile Transport Protocol]: https://core.telegram.org/mtproto/description
pub struct Encrypted {
    /// The authorization key to use to encrypt payload.
    auth_key: AuthKey,

    /// If present, the threshold in bytes at which a message will be
    /// considered large enough to attempt compressing it. Otherwise,
    /// outgoing messages will never be compressed.
    compression_threshold: Option<usize>,

    /// Identifiers of the messages pushed since the last `finalize`.
    pushed: Vec<MsgId>,

    /// Whether any of the messages pushed so far requires acknowledgement.
    content_related: bool,

    /// Temporary results of processing one incoming message.
    results: Vec<Deserialization>,
}

/// The outcome of sealing all pushed messages into a single packet.
#[derive(Clone, Debug, PartialEq)]
pub struct Finalized {
    /// The identifier of the outermost message, which is the container if
    /// more than one message was pushed.
    pub msg_id: MsgId,

    /// The identifiers of every message inside, in the order they were pushed.
    pub msg_ids: Vec<MsgId>,

    /// The token the server will use to confirm the receipt of the packet,
    /// present only if something in it required acknowledgement.
    pub quick_ack_token: Option<u32>,
}

impl Finalized {
    /// Whether the messages were wrapped in a container.
    pub fn is_container(&self) -> bool {
        self.msg_ids.len() > 1
    }
}

impl Builder {
    /// Configures the compression threshold for outgoing messages.
    pub fn compression_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Finishes the builder and returns the `Encrypted` instance with all
    /// the configuration changes applied.
    pub fn finish(self, auth_key: [u8; 256]) -> Encrypted {
        Encrypted {
            auth_key: AuthKey::from_bytes(auth_key),
            compression_threshold: self.compression_threshold,
            pushed: Vec::new(),
            content_related: false,
            results: Vec::new(),
        }
    }
}

impl Encrypted {
    /// Start building a new encrypted MTP.
    pub fn build() -> Builder {
        Builder {
            compression_threshold: crate::DEFAULT_COMPRESSION_THRESHOLD,
        }
    }

    /// The authorization key used for encryption and decryption.
    pub fn auth_key(&self) -> [u8; 256] {
        self.auth_key.to_bytes()
    }

    fn serialize_msg(
        &mut self,
        session: &mut SessionInfo,
        buffer: &mut DequeBuffer<u8>,
        body: &[u8],
        content_related: bool,
    ) -> MsgId {
        let msg_id = session.generate_msg_id();
        let seq_no = session.take_seq_no(content_related);

        buffer.extend(msg_id.0.to_le_bytes());
        buffer.extend(seq_no.to_le_bytes());
        buffer.extend((body.len() as i32).to_le_bytes());
        buffer.extend(body);

        if content_related {
            session.message_sent(msg_id);
            self.content_related = true;
        }
        self.pushed.push(msg_id);
        msg_id
    }

    /// Serializes pending acknowledgements, if there are any and they fit.
    fn push_acks(&mut self, session: &mut SessionInfo, buffer: &mut DequeBuffer<u8>) {
        if !session.has_scheduled_acks()
            || self.pushed.len() >= manual_tl::MessageContainer::MAXIMUM_LENGTH
        {
            return;
        }

        let body = mtproto::MsgsAck {
            msg_ids: session.take_scheduled_acks(),
        }
        .to_bytes();
        self.serialize_msg(session, buffer, &body, false);
    }

    /// Serializes one message into the input buffer, after any message
    /// pushed since the last call to [`Encrypted::finalize`], and returns
    /// the identifier it was given.
    ///
    /// Pending acknowledgements are pushed first, so they go out with
    /// whatever is being sent.
    ///
    /// Content-related bodies larger than the compression threshold are sent
    /// compressed if that makes them smaller.
    ///
    /// Fails with [`PushError::ContainerFull`] when the body has to wait for
    /// the next packet, or with the reason from [`check_body`] if it can
    /// never be sent.
    pub fn push(
        &mut self,
        session: &mut SessionInfo,
        buffer: &mut DequeBuffer<u8>,
        body: &[u8],
        content_related: bool,
    ) -> Result<MsgId, PushError> {
        check_body(body)?;
        self.push_acks(session, buffer);

        if self.pushed.len() >= manual_tl::MessageContainer::MAXIMUM_LENGTH {
            return Err(PushError::ContainerFull);
        }

        let mut body = body;
        let compressed;
        if let Some(threshold) = self.compression_threshold {
            if content_related && body.len() >= threshold {
                compressed = manual_tl::GzipPacked::compress(body).to_bytes();
                if compressed.len() < body.len() {
                    body = &compressed;
                }
            }
        }

        let new_size = buffer.len() + body.len() + Message::SIZE_OVERHEAD;
        if new_size >= manual_tl::MessageContainer::MAXIMUM_SIZE {
            return Err(PushError::ContainerFull);
        }

        Ok(self.serialize_msg(session, buffer, body, content_related))
    }

    /// `finalize`, but without encryption.
    fn finalize_plain(
        &mut self,
        session: &mut SessionInfo,
        salt: i64,
        buffer: &mut DequeBuffer<u8>,
    ) -> Option<MsgId> {
        // Even with nothing else to send, acknowledgements must go out.
        self.push_acks(session, buffer);

        let msg_id = match self.pushed.len() {
            0 => return None,
            1 => self.pushed[0],
            count => {
                // Give the container its message ID and sequence number. It
                // must be generated after the inner ones to be the greatest.
                let msg_id = session.generate_msg_id();
                let seq_no = session.take_seq_no(false);

                // + 8 because it has to include the constructor ID and length (4 bytes each).
                let len = (buffer.len() + manual_tl::MessageContainer::SIZE_OVERHEAD) as i32;

                let mut header = Vec::with_capacity(MESSAGE_CONTAINER_HEADER_LEN);
                msg_id.0.serialize(&mut header);
                seq_no.serialize(&mut header);
                len.serialize(&mut header);
                manual_tl::MessageContainer::CONSTRUCTOR_ID.serialize(&mut header);
                (count as i32).serialize(&mut header);
                buffer.extend_front(&header);
                msg_id
            }
        };

        buffer.extend_front(&session.session_id().to_le_bytes());
        buffer.extend_front(&salt.to_le_bytes());
        Some(msg_id)
    }

    /// Seals every message pushed so far (plus any pending acknowledgement)
    /// into a single encrypted packet, in-place.
    ///
    /// Note that even if there are no requests to serialize, the protocol may
    /// produce data that has to be sent after deserializing incoming messages.
    ///
    /// The buffer remains untouched if there is nothing to send, in which
    /// case `None` is returned.
    pub fn finalize(
        &mut self,
        session: &mut SessionInfo,
        salt: i64,
        buffer: &mut DequeBuffer<u8>,
    ) -> Option<Finalized> {
        let msg_id = self.finalize_plain(session, salt, buffer)?;
        let token = encrypt_data_v2(buffer, &self.auth_key);

        let content_related = mem::take(&mut self.content_related);
        Some(Finalized {
            msg_id,
            msg_ids: mem::take(&mut self.pushed),
            quick_ack_token: content_related.then_some(token),
        })
    }

    /// Processes an encrypted response from the server.
    ///
    /// Trailing bytes added by padded transports are ignored.
    pub fn deserialize(
        &mut self,
        session: &mut SessionInfo,
        payload: &[u8],
    ) -> Result<Vec<Deserialization>, DeserializeError> {
        crate::utils::check_message_buffer(payload)?;

        let len = if payload.len() > ENCRYPTED_PACKET_HEADER_LEN {
            let body = payload.len() - ENCRYPTED_PACKET_HEADER_LEN;
            ENCRYPTED_PACKET_HEADER_LEN + body - body % 16
        } else {
            payload.len()
        };
        let plaintext = decrypt_data_v2(&payload[..len], &self.auth_key)?;
        let mut buffer = InputStream::from_slice(&plaintext[..]);

        let _salt = i64::deserialize(&mut buffer)?;
        let session_id = i64::deserialize(&mut buffer)?;
        if session_id != session.session_id() {
            return Err(DeserializeError::BadSessionId {
                got: session_id,
                expected: session.session_id(),
            });
        }

        let message = Message::deserialize(&mut buffer)?;

        // For simplicity, and to avoid passing too much stuff around, the
        // processing result is stored in self. After processing is done,
        // that temporary state is cleaned and returned with `mem::take`.
        let result = self.process_message(session, message);
        let results = mem::take(&mut self.results);
        match result {
            Ok(()) => Ok(results),
            Err(e) if !results.is_empty() => {
                warn!("keeping {} results despite failure: {e}", results.len());
                Ok(results)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the message is a notification that the server ignored one of
    /// ours, which is needed to fix the clock when it is off.
    fn is_clock_notice(message: &Message) -> bool {
        match message.constructor_id() {
            Ok(mtproto::BadMsgNotification::CONSTRUCTOR_ID)
            | Ok(mtproto::BadServerSalt::CONSTRUCTOR_ID) => true,
            Ok(manual_tl::MessageContainer::CONSTRUCTOR_ID) => {
                manual_tl::MessageContainer::from_bytes(&message.body)
                    .map(|c| c.messages.iter().any(Self::is_clock_notice))
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    fn process_message(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        match session.validate_server_msg_id(message.msg_id) {
            Ok(()) => {}
            Err(DeserializeError::StaleMessageId { .. }) if Self::is_clock_notice(&message) => {
                // Our clock may be what's wrong, and this is how we'd learn it.
                debug!("accepting out-of-window notification {}", message.msg_id);
            }
            Err(e) => return Err(e),
        }

        if !session.register_received(message.msg_id) {
            debug!("ignoring duplicate message {}", message.msg_id);
            if message.requires_ack() {
                session.add_message_to_ack(MsgId(message.msg_id));
            }
            return Ok(());
        }

        if message.requires_ack() {
            session.add_message_to_ack(MsgId(message.msg_id));
        }

        self.dispatch(session, message)
    }

    fn dispatch(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        // Handle all the possible Service Messages:
        // * https://core.telegram.org/mtproto/service_messages
        // * https://core.telegram.org/mtproto/service_messages_about_messages
        //
        // The order of the `match` here is the same as the order in which the
        // items appear in the documentation (to make it easier to review).
        match message.constructor_id()? {
            // Response to an RPC query
            manual_tl::RpcResult::CONSTRUCTOR_ID => self.handle_rpc_result(session, message),

            // Service Messages about Messages
            // Acknowledgment of Receipt
            mtproto::MsgsAck::CONSTRUCTOR_ID => self.handle_ack(session, message),
            // Notice of Ignored Error Message
            mtproto::BadMsgNotification::CONSTRUCTOR_ID
            | mtproto::BadServerSalt::CONSTRUCTOR_ID => {
                self.handle_bad_notification(session, message)
            }
            // Request for Message Status Information
            mtproto::MsgsStateReq::CONSTRUCTOR_ID => self.handle_state_req(message),
            // Informational Message regarding Status of Messages
            mtproto::MsgsStateInfo::CONSTRUCTOR_ID => self.handle_state_info(message),
            // Voluntary Communication of Status of Messages
            mtproto::MsgsAllInfo::CONSTRUCTOR_ID => self.handle_msg_all(message),
            // Extended Voluntary Communication of Status of One Message
            mtproto::MsgDetailedInfo::CONSTRUCTOR_ID
            | mtproto::MsgNewDetailedInfo::CONSTRUCTOR_ID => {
                self.handle_detailed_info(session, message)
            }
            // Explicit Request to Re-Send Messages
            mtproto::MsgResendReq::CONSTRUCTOR_ID => self.handle_msg_resend(message),

            // Request for several future salts
            mtproto::FutureSalts::CONSTRUCTOR_ID => self.handle_future_salts(session, message),
            // Ping Messages (PING/PONG)
            mtproto::Pong::CONSTRUCTOR_ID => self.handle_pong(session, message),
            // Request to Destroy Session
            mtproto::DestroySessionOk::CONSTRUCTOR_ID
            | mtproto::DestroySessionNone::CONSTRUCTOR_ID => self.handle_destroy_session(message),
            // New Session Creation Notification
            mtproto::NewSessionCreated::CONSTRUCTOR_ID => self.handle_new_session_created(message),
            // Containers (Simple Container)
            manual_tl::MessageContainer::CONSTRUCTOR_ID => self.handle_container(session, message),
            // Message Copies
            manual_tl::MessageCopy::CONSTRUCTOR_ID => self.handle_msg_copy(session, message),
            // Packed Object
            manual_tl::GzipPacked::CONSTRUCTOR_ID => self.handle_gzip_packed(session, message),
            _ => self.handle_update(message),
        }
    }

    /// **[Response to an RPC query]**
    ///
    /// A response to an RPC query is normally wrapped as follows:
    ///
    /// ```tl
    /// rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult;
    /// ```
    ///
    /// Here `req_msg_id` is the identifier of the message sent by the other
    /// party and containing an RPC query. This way, the recipient knows that
    /// the result is a response to the specific RPC query in question.
    ///
    /// At the same time, this response serves as acknowledgment of the other
    /// party's receipt of the `req_msg_id` message.
    ///
    /// **[RPC Error]**
    ///
    /// The result field returned in response to any RPC query may also
    /// contain an error message in the following format:
    ///
    /// ```tl
    /// rpc_error#2144ca19 error_code:int error_message:string = RpcError;
    /// ```
    ///
    /// **[Cancellation of an RPC Query]**
    ///
    /// The answers to `rpc_drop_answer` (`rpc_answer_unknown`,
    /// `rpc_answer_dropped_running` and `rpc_answer_dropped`) arrive wrapped
    /// in `rpc_result` too, and are delivered like any other result.
    ///
    /// [Response to an RPC query]: https://core.telegram.org/mtproto/service_messages#response-to-an-rpc-query
    /// [RPC Error]: https://core.telegram.org/mtproto/service_messages#rpc-error
    /// [Cancellation of an RPC Query]: https://core.telegram.org/mtproto/service_messages#cancellation-of-an-rpc-query
    fn handle_rpc_result(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let rpc_result = manual_tl::RpcResult::from_bytes(&message.body)?;
        let inner_constructor = rpc_result.inner_constructor();
        let manual_tl::RpcResult { req_msg_id, result } = rpc_result;
        let msg_id = MsgId(req_msg_id);
        session.messages_acknowledged(&[msg_id]);

        // Any error during a RPC result will be given to the caller,
        // which means this method itself is doing its job `Ok`.
        let inner_constructor = match inner_constructor {
            Ok(x) => x,
            Err(e) => {
                self.results
                    .push(Deserialization::Failure(DeserializationFailure {
                        msg_id,
                        error: e.into(),
                    }));
                return Ok(());
            }
        };

        let result = match inner_constructor {
            // RPC Error
            mtproto::RpcError::CONSTRUCTOR_ID => match mtproto::RpcError::from_bytes(&result) {
                Ok(error) => Deserialization::RpcError(RpcResultError { msg_id, error }),
                Err(e) => Deserialization::Failure(DeserializationFailure {
                    msg_id,
                    error: e.into(),
                }),
            },

            // Response to an RPC query
            // Telegram shouldn't send compressed errors (the overhead
            // would probably outweight the benefits) so we don't check
            // that the decompressed payload is an error or answer drop.
            manual_tl::GzipPacked::CONSTRUCTOR_ID => {
                match manual_tl::GzipPacked::from_bytes(&result)
                    .map_err(DeserializeError::from)
                    .and_then(|gzip| gzip.decompress())
                {
                    Ok(body) => Deserialization::RpcResult(RpcResult { msg_id, body }),
                    Err(error) => {
                        Deserialization::Failure(DeserializationFailure { msg_id, error })
                    }
                }
            }
            _ => Deserialization::RpcResult(RpcResult {
                msg_id,
                body: result,
            }),
        };

        self.results.push(result);
        Ok(())
    }

    /// **[Acknowledgment of Receipt]**
    ///
    /// Receipt of virtually all messages (with the exception of some purely
    /// service ones as well as the plain-text messages used in the protocol
    /// for creating an authorization key) must be acknowledged.
    ///
    /// ```tl
    /// msgs_ack#62d6b459 msg_ids:Vector long = MsgsAck;
    /// ```
    ///
    /// A server usually acknowledges the receipt of a message from a client
    /// (normally, an RPC query) using an RPC response. If a response is a
    /// long time coming, a server may first send a receipt acknowledgment,
    /// and somewhat later, the RPC response itself.
    ///
    /// [Acknowledgment of Receipt]: https://core.telegram.org/mtproto/service_messages_about_messages#acknowledgment-of-receipt
    fn handle_ack(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let ack = mtproto::MsgsAck::from_bytes(&message.body)?;
        let msg_ids = ack.msg_ids.into_iter().map(MsgId).collect::<Vec<_>>();
        session.messages_acknowledged(&msg_ids);
        self.results.push(Deserialization::Ack(msg_ids));
        Ok(())
    }

    /// **[Notice of Ignored Error Message]**
    ///
    /// In certain cases, a server may notify a client that its incoming
    /// message was ignored for whatever reason. Note that such a notification
    /// cannot be generated unless a message is correctly decoded by the
    /// server.
    ///
    /// ```tl
    /// bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int error_code:int = BadMsgNotification;
    /// bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int error_code:int new_server_salt:long = BadMsgNotification;
    /// ```
    ///
    /// Here, `error_code` can also take on the following values:
    ///
    /// * 16: `msg_id` too low (most likely, client time is wrong; it would
    ///   be worthwhile to synchronize it using msg_id notifications and re-
    ///   send the original message with the “correct” msg_id or wrap it in a
    ///   container with a new msg_id if the original message had waited too
    ///   long on the client to be transmitted)
    /// * 17: `msg_id` too high (similar to the previous case, the client time
    ///   has to be synchronized, and the message re-sent with the correct
    ///   `msg_id`)
    /// * 18: incorrect two lower order `msg_id` bits (the server expects
    ///   client message `msg_id` to be divisible by 4)
    /// * 19: container `msg_id` is the same as `msg_id` of a previously
    ///   received message (this must never happen)
    /// * 20: message too old, and it cannot be verified whether the server
    ///   has received a message with this `msg_id` or not
    /// * 32: `msg_seqno` too low (the server has already received a message
    ///   with a lower `msg_id` but with either a higher or an equal and odd
    ///   `seqno`)
    /// * 33: `msg_seqno` too high (similarly, there is a message with a
    ///   higher `msg_id` but with either a lower or an equal and odd `seqno`)
    /// * 34: an even `msg_seqno` expected (irrelevant message), but odd
    ///   received
    /// * 35: odd `msg_seqno` expected (relevant message), but even received
    /// * 48: incorrect server salt (in this case, the `bad_server_salt`
    ///   response is received with the correct salt, and the message is to be
    ///   re-sent with it)
    /// * 64: invalid container.
    ///
    /// Notifications of an ignored message do not require acknowledgment
    /// (i.e., are irrelevant).
    ///
    /// The time offset is corrected here. Adopting the new salt, resending,
    /// and starting a new session on sequence errors is up to the caller.
    ///
    /// [Notice of Ignored Error Message]: https://core.telegram.org/mtproto/service_messages_about_messages#notice-of-ignored-error-message
    fn handle_bad_notification(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let bad_msg = match mtproto::BadMsg::from_bytes(&message.body)? {
            mtproto::BadMsg::Notification(x) => BadMessage {
                msg_id: MsgId(x.bad_msg_id),
                code: x.error_code,
                new_salt: None,
            },
            mtproto::BadMsg::ServerSalt(x) => BadMessage {
                msg_id: MsgId(x.bad_msg_id),
                code: x.error_code,
                new_salt: Some(x.new_server_salt),
            },
        };

        info!(
            "server ignored message {:?} with code {}: {}",
            bad_msg.msg_id,
            bad_msg.code,
            bad_msg.description()
        );

        // The message will not be processed, so it is no longer pending.
        session.messages_acknowledged(&[bad_msg.msg_id]);
        if matches!(bad_msg.code, 16 | 17) {
            // Sent `msg_id` was too low or too high (our `time_offset` is wrong).
            session.correct_time_offset(message.msg_id);
        }

        self.results.push(Deserialization::BadMessage(bad_msg));
        Ok(())
    }

    /// **[Request for Message Status Information]**
    ///
    /// If either party has not received information on the status of its
    /// outgoing messages for a while, it may explicitly request it from the
    /// other party:
    ///
    /// ```tl
    /// msgs_state_req#da69fb52 msg_ids:Vector long = MsgsStateReq;
    /// ```
    ///
    /// [Request for Message Status Information]: https://core.telegram.org/mtproto/service_messages_about_messages#request-for-message-status-information
    fn handle_state_req(&mut self, message: Message) -> Result<(), DeserializeError> {
        let req = mtproto::MsgsStateReq::from_bytes(&message.body)?;
        self.results.push(Deserialization::StateRequest {
            msg_id: MsgId(message.msg_id),
            msg_ids: req.msg_ids.into_iter().map(MsgId).collect(),
        });
        Ok(())
    }

    /// **[Informational Message regarding Status of Messages]**
    ///
    /// ```tl
    /// msgs_state_info#04deb57d req_msg_id:long info:string = MsgsStateInfo;
    /// ```
    ///
    /// This response does not require an acknowledgment. It is an
    /// acknowledgment of the relevant `msgs_state_req`, in and of itself.
    ///
    /// [Informational Message regarding Status of Messages]: https://core.telegram.org/mtproto/service_messages_about_messages#informational-message-regarding-status-of-messages
    fn handle_state_info(&mut self, message: Message) -> Result<(), DeserializeError> {
        let info = mtproto::MsgsStateInfo::from_bytes(&message.body)?;
        debug!(
            "got status of {} messages for request {}",
            info.info.len(),
            info.req_msg_id
        );
        Ok(())
    }

    /// **[Voluntary Communication of Status of Messages]**
    ///
    /// ```tl
    /// msgs_all_info#8cc0d131 msg_ids:Vector long info:string = MsgsAllInfo;
    /// ```
    ///
    /// This message does not require an acknowledgment.
    ///
    /// [Voluntary Communication of Status of Messages]: https://core.telegram.org/mtproto/service_messages_about_messages#voluntary-communication-of-status-of-messages
    fn handle_msg_all(&mut self, message: Message) -> Result<(), DeserializeError> {
        let info = mtproto::MsgsAllInfo::from_bytes(&message.body)?;
        debug!("got voluntary status of {} messages", info.msg_ids.len());
        Ok(())
    }

    /// **[Extended Voluntary Communication of Status of One Message]**
    ///
    /// Normally used by the server to respond to the receipt of a duplicate
    /// `msg_id`, especially if a response to the message has already been
    /// generated and the response is large.
    ///
    /// ```tl
    /// msg_detailed_info#276d3ec6 msg_id:long answer_msg_id:long bytes:int status:int = MsgDetailedInfo;
    /// msg_new_detailed_info#809db6df answer_msg_id:long bytes:int status:int = MsgDetailedInfo;
    /// ```
    ///
    /// If the answer was received already, it is simply acknowledged.
    /// Otherwise, the caller is told so it can ask for it to be re-sent.
    ///
    /// [Extended Voluntary Communication of Status of One Message]: https://core.telegram.org/mtproto/service_messages_about_messages#extended-voluntary-communication-of-status-of-one-message
    fn handle_detailed_info(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let (answer_msg_id, msg_id) = match message.constructor_id()? {
            mtproto::MsgDetailedInfo::CONSTRUCTOR_ID => {
                let info = mtproto::MsgDetailedInfo::from_bytes(&message.body)?;
                (MsgId(info.answer_msg_id), Some(MsgId(info.msg_id)))
            }
            _ => {
                let info = mtproto::MsgNewDetailedInfo::from_bytes(&message.body)?;
                (MsgId(info.answer_msg_id), None)
            }
        };

        if let Some(msg_id) = msg_id {
            session.messages_acknowledged(&[msg_id]);
        }

        if session.was_received(answer_msg_id) {
            session.add_message_to_ack(answer_msg_id);
        } else {
            self.results.push(Deserialization::DetailedInfo {
                answer_msg_id,
                msg_id,
            });
        }
        Ok(())
    }

    /// **[Explicit Request to Re-Send Messages]**
    ///
    /// ```tl
    /// msg_resend_req#7d861a08 msg_ids:Vector long = MsgResendReq;
    /// ```
    ///
    /// The remote party immediately responds by re-sending the requested
    /// messages, normally using the same connection that was used to transmit
    /// the query.
    ///
    /// [Explicit Request to Re-Send Messages]: https://core.telegram.org/mtproto/service_messages_about_messages#explicit-request-to-re-send-messages
    fn handle_msg_resend(&mut self, message: Message) -> Result<(), DeserializeError> {
        let req = mtproto::MsgResendReq::from_bytes(&message.body)?;
        self.results.push(Deserialization::ResendRequest(
            req.msg_ids.into_iter().map(MsgId).collect(),
        ));
        Ok(())
    }

    /// **[Request for several future salts]**
    ///
    /// ```tl
    /// get_future_salts#b921bd04 num:int = FutureSalts;
    /// future_salt#0949d9dc valid_since:int valid_until:int salt:long = FutureSalt;
    /// future_salts#ae500895 req_msg_id:long now:int salts:vector future_salt = FutureSalts;
    /// ```
    ///
    /// The response serves as the acknowledgment of the query and does not
    /// require an acknowledgment itself.
    ///
    /// [Request for several future salts]: https://core.telegram.org/mtproto/service_messages#request-for-several-future-salts
    fn handle_future_salts(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let salts = mtproto::FutureSalts::from_bytes(&message.body)?;
        session.messages_acknowledged(&[MsgId(salts.req_msg_id)]);
        self.results.push(Deserialization::FutureSalts(salts));
        Ok(())
    }

    /// **[Ping Messages (PING/PONG)]**
    ///
    /// ```tl
    /// ping#7abe77ec ping_id:long = Pong;
    /// pong#347773c5 msg_id:long ping_id:long = Pong;
    /// ping_delay_disconnect#f3427b8c ping_id:long disconnect_delay:int = Pong;
    /// ```
    ///
    /// These messages do not require acknowledgments.
    ///
    /// [Ping Messages (PING/PONG)]: https://core.telegram.org/mtproto/service_messages#ping-messages-ping-pong
    fn handle_pong(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let pong = mtproto::Pong::from_bytes(&message.body)?;
        session.messages_acknowledged(&[MsgId(pong.msg_id)]);
        self.results.push(Deserialization::Pong(pong));
        Ok(())
    }

    /// **[Request to Destroy Session]**
    ///
    /// ```tl
    /// destroy_session#e7512126 session_id:long = DestroySessionRes;
    /// destroy_session_ok#e22045fc session_id:long = DestroySessionRes;
    /// destroy_session_none#62d350c9 session_id:long = DestroySessionRes;
    /// ```
    ///
    /// [Request to Destroy Session]: https://core.telegram.org/mtproto/service_messages#request-to-destroy-session
    fn handle_destroy_session(&mut self, message: Message) -> Result<(), DeserializeError> {
        match mtproto::DestroySessionRes::from_bytes(&message.body)? {
            mtproto::DestroySessionRes::Ok(x) => debug!("destroyed session {}", x.session_id),
            mtproto::DestroySessionRes::None(x) => debug!("no session {} to destroy", x.session_id),
        }
        Ok(())
    }

    /// **[New Session Creation Notification]**
    ///
    /// The server notifies the client that a new session (from the server's
    /// standpoint) had to be created to handle a client message.
    ///
    /// ```tl
    /// new_session_created#9ec20908 first_msg_id:long unique_id:long server_salt:long = NewSession
    /// ```
    ///
    /// This notification must be acknowledged by the client. It is necessary,
    /// for instance, for the client to understand that there is, in fact, a
    /// "gap" in the stream of long poll notifications received from the
    /// server.
    ///
    /// [New Session Creation Notification]: https://core.telegram.org/mtproto/service_messages#new-session-creation-notification
    fn handle_new_session_created(&mut self, message: Message) -> Result<(), DeserializeError> {
        let new_session = mtproto::NewSessionCreated::from_bytes(&message.body)?;
        info!("server created a new session: {:?}", new_session);
        self.results.push(Deserialization::NewSession(new_session));
        Ok(())
    }

    /// **[Simple Container]**
    ///
    /// ```tl
    /// msg_container#73f1f8dc messages:vector message = MessageContainer;
    /// ```
    ///
    /// All messages in a container must have `msg_id` lower than that of the
    /// container itself. A container does not require an acknowledgment and
    /// may not carry other simple containers.
    ///
    /// An inner message with an unusable identifier is dropped on its own,
    /// without discarding the rest.
    ///
    /// [Simple Container]: https://core.telegram.org/mtproto/service_messages#simple-container
    fn handle_container(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let container = manual_tl::MessageContainer::from_bytes(&message.body)?;
        for inner_message in container.messages {
            if matches!(
                inner_message.constructor_id(),
                Ok(manual_tl::MessageContainer::CONSTRUCTOR_ID)
            ) {
                warn!("ignoring nested container {}", inner_message.msg_id);
                continue;
            }
            // The id of a failed item is already registered, so a resend
            // would be ignored. Its siblings must still be delivered.
            let msg_id = inner_message.msg_id;
            if let Err(e) = self.process_message(session, inner_message) {
                warn!("dropping message {msg_id} inside container: {e}");
            }
        }

        Ok(())
    }

    /// **[Message Copies]**
    ///
    /// ```tl
    /// msg_copy#e06046b2 orig_message:Message = MessageCopy;
    /// ```
    ///
    /// Once received, the message is processed as if the wrapper were not
    /// there. However, if it is known for certain that the message
    /// `orig_message.msg_id` was received, then the new message is not
    /// processed (while at the same time, it and `orig_message.msg_id`
    /// are acknowledged).
    ///
    /// [Message Copies]: https://core.telegram.org/mtproto/service_messages#message-copies
    fn handle_msg_copy(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let copy = manual_tl::MessageCopy::from_bytes(&message.body)?;
        let orig = copy.orig_message;
        if !session.register_received(orig.msg_id) {
            session.add_message_to_ack(MsgId(orig.msg_id));
            return Ok(());
        }
        if orig.requires_ack() {
            session.add_message_to_ack(MsgId(orig.msg_id));
        }
        self.dispatch(session, orig)
    }

    /// **[Packed Object]**
    ///
    /// Used to replace any other object (or rather, a serialization thereof)
    /// with its archived (gzipped) representation:
    ///
    /// ```tl
    /// gzip_packed#3072cfa1 packed_data:string = Object;
    /// ```
    ///
    /// [Packed Object]: https://core.telegram.org/mtproto/service_messages#packed-object
    fn handle_gzip_packed(
        &mut self,
        session: &mut SessionInfo,
        message: Message,
    ) -> Result<(), DeserializeError> {
        let container = manual_tl::GzipPacked::from_bytes(&message.body)?;
        self.dispatch(
            session,
            Message {
                body: container.decompress()?,
                ..message
            },
        )
    }

    /// Anything else that's not Service Message will be `Updates`.
    ///
    /// Since we handle all the possible service messages, we can
    /// safely treat whatever message body we received as `Updates`.
    fn handle_update(&mut self, message: Message) -> Result<(), DeserializeError> {
        trace!("got update in message {}", message.msg_id);
        self.results.push(Deserialization::Update(message.body));
        Ok(())
    }
}
