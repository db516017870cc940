// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::service::{MessageService, MessageTransaction, OutgoingMessage, ServiceContext};
use log::{debug, trace};
use mtkit_mtproto::MsgId;
use mtkit_mtproto::mtp::Deserialization;
use mtkit_tl_types::Serializable;
use mtkit_tl_types::mtproto::GetFutureSalts;

/// How many salts to ask for. Each one is valid for about half an hour.
const SALTS_TO_REQUEST: i32 = 32;

/// Ask for more salts once fewer than these are left.
const MIN_REMAINING_SALTS: usize = 2;

/// Keeps the clock and the salts in sync with the server.
///
/// The answer to `get_future_salts` carries the server's time, which the
/// engine uses to correct its own clock before storing the new salts.
pub struct TimeSyncMessageService {
    /// Whether the next transaction should ask for salts.
    needed: bool,
    prepared: bool,
    in_flight: Option<MsgId>,
}

impl TimeSyncMessageService {
    pub fn new() -> Self {
        Self {
            // Nothing tells how far off the clock is until the first answer.
            needed: true,
            prepared: false,
            in_flight: None,
        }
    }
}

impl Default for TimeSyncMessageService {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageService for TimeSyncMessageService {
    fn has_pending_messages(&self) -> bool {
        self.needed && self.in_flight.is_none()
    }

    fn prepare_transaction(&mut self, context: &ServiceContext) -> Option<MessageTransaction> {
        if context.remaining_salts < MIN_REMAINING_SALTS {
            self.needed = true;
        }
        if !self.needed || self.in_flight.is_some() {
            return None;
        }

        trace!(
            "requesting {} salts ({} left)",
            SALTS_TO_REQUEST, context.remaining_salts
        );
        self.prepared = true;
        Some(MessageTransaction {
            messages: vec![OutgoingMessage::service(
                GetFutureSalts {
                    num: SALTS_TO_REQUEST,
                }
                .to_bytes(),
                true,
            )],
        })
    }

    fn messages_assigned(&mut self, msg_ids: &[MsgId]) {
        if std::mem::take(&mut self.prepared) {
            self.in_flight = msg_ids.first().copied();
        }
    }

    fn received_message(&mut self, message: &Deserialization) {
        if let Deserialization::FutureSalts(salts) = message {
            if self.in_flight.map(|id| id.0) == Some(salts.req_msg_id) {
                debug!("got {} future salts", salts.salts.0.len());
                self.in_flight = None;
                self.needed = false;
            }
        }
    }

    fn transactions_may_have_failed(&mut self, msg_ids: &[MsgId]) {
        if self.in_flight.is_some_and(|id| msg_ids.contains(&id)) {
            self.in_flight = None;
        }
    }

    fn session_reset(&mut self) {
        self.in_flight = None;
    }

    fn time_resync_requested(&mut self) {
        self.needed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtkit_tl_types::RawVec;
    use mtkit_tl_types::mtproto::FutureSalts;

    fn context(remaining_salts: usize) -> ServiceContext {
        ServiceContext {
            now: 0,
            session_id: 0,
            remaining_salts,
        }
    }

    fn salts(req_msg_id: i64) -> Deserialization {
        Deserialization::FutureSalts(FutureSalts {
            req_msg_id,
            now: 0,
            salts: RawVec(Vec::new()),
        })
    }

    #[test]
    fn asks_once_until_answered() {
        let mut service = TimeSyncMessageService::new();
        assert!(service.has_pending_messages());
        assert!(service.prepare_transaction(&context(10)).is_some());
        service.messages_assigned(&[MsgId(4)]);

        assert!(!service.has_pending_messages());
        assert!(service.prepare_transaction(&context(10)).is_none());

        service.received_message(&salts(4));
        assert!(!service.has_pending_messages());
        assert!(service.prepare_transaction(&context(10)).is_none());
    }

    #[test]
    fn asks_again_when_running_out() {
        let mut service = TimeSyncMessageService::new();
        service.prepare_transaction(&context(10));
        service.messages_assigned(&[MsgId(4)]);
        service.received_message(&salts(4));

        assert!(service.prepare_transaction(&context(1)).is_some());
    }

    #[test]
    fn resync_and_failures_ask_again() {
        let mut service = TimeSyncMessageService::new();
        service.prepare_transaction(&context(10));
        service.messages_assigned(&[MsgId(4)]);
        service.transactions_may_have_failed(&[MsgId(4)]);
        assert!(service.has_pending_messages());

        service.prepare_transaction(&context(10));
        service.messages_assigned(&[MsgId(8)]);
        service.received_message(&salts(8));
        service.time_resync_requested();
        assert!(service.has_pending_messages());
    }
}
