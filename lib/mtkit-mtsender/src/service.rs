// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Message services are the pluggable producers and consumers of messages
//! that share a single [`crate::MtProto`] engine.
//!
//! Services run on the engine's task, so they never need locking. Anything
//! that reaches them from the outside has to go through a channel the
//! service owns, and wake the engine with
//! [`crate::MtProtoHandle::request_transport_transaction`] so that
//! [`MessageService::process_commands`] gets called.
use mtkit_mtproto::MsgId;
use mtkit_mtproto::mtp::{Deserialization, PushError};

/// Identifies a service registered in an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId(pub(crate) u64);

/// A single message a service wants to send.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    /// Whether the server has to acknowledge the message.
    pub content_related: bool,
    /// Whether this is a call to the API (and not a service message).
    ///
    /// The first of these in every connection is wrapped so that it also
    /// describes the client.
    pub rpc: bool,
}

/// The messages a service contributes to the next transaction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageTransaction {
    pub messages: Vec<OutgoingMessage>,
}

/// What the engine knows while a transaction is being assembled.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    /// Current time according to the server, in seconds.
    pub now: i64,
    pub session_id: i64,
    /// How many server salts are still usable.
    pub remaining_salts: usize,
}

impl OutgoingMessage {
    /// A content-related call to the API.
    pub fn rpc(body: Vec<u8>) -> Self {
        Self {
            body,
            content_related: true,
            rpc: true,
        }
    }

    /// A protocol message that is not an API call.
    pub fn service(body: Vec<u8>, content_related: bool) -> Self {
        Self {
            body,
            content_related,
            rpc: false,
        }
    }
}

impl MessageTransaction {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A producer and consumer of messages attached to an engine.
///
/// Every method but [`MessageService::prepare_transaction`] has an empty
/// default implementation.
pub trait MessageService: Send {
    /// Handle whatever arrived through the service's own channels.
    ///
    /// Called on the engine task before messages are collected, and every
    /// time the engine is woken up.
    fn process_commands(&mut self) {}

    /// Whether [`MessageService::prepare_transaction`] would return
    /// something right now.
    fn has_pending_messages(&self) -> bool {
        false
    }

    /// Collect the messages to send in the next transaction.
    fn prepare_transaction(&mut self, context: &ServiceContext) -> Option<MessageTransaction>;

    /// The identifiers given to the messages of the last prepared transaction,
    /// in the same order.
    ///
    /// If there are fewer identifiers than messages, the rest did not fit and
    /// were not sent.
    fn messages_assigned(&mut self, _msg_ids: &[MsgId]) {}

    /// The message at `index` of the last prepared transaction can never be
    /// sent, and must not be offered again.
    ///
    /// Called right before [`MessageService::messages_assigned`], which then
    /// gets exactly `index` identifiers.
    fn message_rejected(&mut self, _index: usize, _error: &PushError) {}

    /// Every message received from the server is shown to every service.
    fn received_message(&mut self, _message: &Deserialization) {}

    /// These messages may not have reached the server, and should be sent
    /// again (with a new identifier) if they are still needed.
    fn transactions_may_have_failed(&mut self, _msg_ids: &[MsgId]) {}

    /// The server started a new session. Messages before `first_msg_id`
    /// may have been lost.
    fn server_did_change_session(&mut self, _first_msg_id: MsgId) {}

    /// The engine started a new session. Previously assigned identifiers
    /// are now meaningless.
    fn session_reset(&mut self) {}

    /// The clock should be synchronized with the server again.
    fn time_resync_requested(&mut self) {}

    /// The service was removed from the engine, or the engine stopped.
    fn detached(&mut self) {}
}
