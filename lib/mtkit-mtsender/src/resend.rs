// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::service::{MessageService, MessageTransaction, OutgoingMessage, ServiceContext};
use log::debug;
use mtkit_mtproto::MsgId;
use mtkit_mtproto::mtp::Deserialization;
use mtkit_tl_types::Serializable;
use mtkit_tl_types::mtproto::MsgResendReq;

/// Asks the server to re-send answers it says it sent but never reached us.
#[derive(Default)]
pub struct ResendMessageService {
    /// Answers to ask for.
    pending: Vec<i64>,
    prepared: Vec<i64>,
    in_flight: Vec<(MsgId, Vec<i64>)>,
}

impl ResendMessageService {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, answer_msg_id: i64) {
        let known = self.pending.contains(&answer_msg_id)
            || self
                .in_flight
                .iter()
                .any(|(_, ids)| ids.contains(&answer_msg_id));
        if !known {
            self.pending.push(answer_msg_id);
        }
    }
}

impl MessageService for ResendMessageService {
    fn has_pending_messages(&self) -> bool {
        !self.pending.is_empty()
    }

    fn prepare_transaction(&mut self, _: &ServiceContext) -> Option<MessageTransaction> {
        if self.pending.is_empty() {
            return None;
        }

        self.prepared = std::mem::take(&mut self.pending);
        Some(MessageTransaction {
            messages: vec![OutgoingMessage::service(
                MsgResendReq {
                    msg_ids: self.prepared.clone(),
                }
                .to_bytes(),
                true,
            )],
        })
    }

    fn messages_assigned(&mut self, msg_ids: &[MsgId]) {
        let prepared = std::mem::take(&mut self.prepared);
        match msg_ids.first() {
            Some(&msg_id) => self.in_flight.push((msg_id, prepared)),
            None => self.pending.extend(prepared),
        }
    }

    fn received_message(&mut self, message: &Deserialization) {
        match message {
            Deserialization::DetailedInfo { answer_msg_id, .. } => {
                debug!("asking for the lost answer {:?}", answer_msg_id);
                self.add(answer_msg_id.0);
            }
            Deserialization::Ack(msg_ids) => {
                self.in_flight.retain(|(msg_id, _)| !msg_ids.contains(msg_id));
            }
            _ => {}
        }
    }

    fn transactions_may_have_failed(&mut self, msg_ids: &[MsgId]) {
        let (failed, kept) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition::<Vec<_>, _>(|(msg_id, _)| msg_ids.contains(msg_id));
        self.in_flight = kept;
        for (_, ids) in failed {
            self.pending.extend(ids);
        }
    }

    fn session_reset(&mut self) {
        // The answers belonged to the old session.
        self.pending.clear();
        self.in_flight.clear();
    }
}
