// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::MsgId;
use crate::mtp::DeserializeError;
use crate::utils::unix_now;
use getrandom::getrandom;
use std::collections::BTreeSet;
use std::time::Duration;

/// How many of the identifiers received from the server are remembered in
/// order to detect duplicates.
const MAX_RECEIVED_IDS: usize = 1024;

/// How old a server message may be, in seconds, and still be accepted.
const MAX_SERVER_MSG_AGE: i64 = 300;

/// How far in the future a server message may be, in seconds.
const MAX_SERVER_MSG_DRIFT: i64 = 30;

/// The state that belongs to a single [session].
///
/// A session is identified by a random 64-bit number and carries its own
/// message identifiers and sequence numbers. Starting a new session is as
/// easy as creating a new instance (carrying over the time offset).
///
/// [session]: https://core.telegram.org/mtproto/description#session
#[derive(Debug)]
pub struct SessionInfo {
    /// The secure, random identifier for this session.
    session_id: i64,

    /// The current message sequence number.
    sequence: i32,

    /// The ID of the last message.
    last_msg_id: i64,

    /// The time offset from the server's time, in seconds.
    time_offset: i32,

    /// Content-related messages sent which have not been acknowledged yet.
    unacknowledged: BTreeSet<i64>,

    /// Identifiers recently received from the server.
    received: BTreeSet<i64>,

    /// Identifiers that need to be acknowledged to the server.
    ///
    /// A [Content-related Message] is "a message requiring an explicit
    /// acknowledgment. These include all the user and many service messages,
    /// virtually all with the exception of containers and acknowledgments."
    ///
    /// [Content-related Message]: https://core.telegram.org/mtproto/description#content-related-message
    pending_ack: Vec<i64>,
}

impl SessionInfo {
    /// Starts a new session with a random identifier.
    pub fn new(time_offset: i32) -> Self {
        let mut buffer = [0u8; 8];
        getrandom(&mut buffer).expect("failed to generate a secure session_id");
        Self::with_session_id(i64::from_le_bytes(buffer), time_offset)
    }

    /// Continues a session with a known identifier.
    pub fn with_session_id(session_id: i64, time_offset: i32) -> Self {
        Self {
            session_id,
            sequence: 0,
            last_msg_id: 0,
            time_offset,
            unacknowledged: BTreeSet::new(),
            received: BTreeSet::new(),
            pending_ack: Vec::new(),
        }
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// The difference between the server's clock and ours, in seconds.
    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    pub fn set_time_offset(&mut self, time_offset: i32) {
        self.time_offset = time_offset;
    }

    /// Correct our time offset based on a known valid message ID.
    pub fn correct_time_offset(&mut self, msg_id: i64) {
        self.correct_time_offset_at(msg_id, unix_now());
    }

    fn correct_time_offset_at(&mut self, msg_id: i64, now: Duration) {
        let correct = (msg_id >> 32) as i32;
        self.time_offset = correct - now.as_secs() as i32;
        log::debug!("corrected time offset to {}s", self.time_offset);
    }

    /// Generates a new unique message ID based on the current
    /// time (in ms) since epoch, applying a known time offset.
    pub fn generate_msg_id(&mut self) -> MsgId {
        self.generate_msg_id_at(unix_now())
    }

    pub(crate) fn generate_msg_id_at(&mut self, now: Duration) -> MsgId {
        let seconds = (now.as_secs() as i64 + self.time_offset as i64) as u64;
        let nanoseconds = now.subsec_nanos() as u64;
        let mut new_msg_id = ((seconds << 32) | (nanoseconds << 2)) as i64;

        if self.last_msg_id >= new_msg_id {
            new_msg_id = self.last_msg_id + 4;
        }

        self.last_msg_id = new_msg_id;
        MsgId(new_msg_id)
    }

    /// Generates the next sequence number depending on whether
    /// it should be for a content-related query or not.
    pub fn take_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            self.sequence += 2;
            self.sequence - 1
        } else {
            self.sequence
        }
    }

    /// Checks that the identifier of a server message could be genuine:
    ///
    /// > Server message identifiers modulo 4 yield 1 if the message is a
    /// > response to a client message, and 3 otherwise.
    ///
    /// It must also be close enough to the synchronized clock. Messages
    /// that fall outside the window are rejected, because they would make
    /// replays possible once the server forgot about them.
    pub(crate) fn validate_server_msg_id(&self, msg_id: i64) -> Result<(), DeserializeError> {
        self.validate_server_msg_id_at(msg_id, unix_now())
    }

    fn validate_server_msg_id_at(&self, msg_id: i64, now: Duration) -> Result<(), DeserializeError> {
        if msg_id <= 0 || !matches!(msg_id % 4, 1 | 3) {
            return Err(DeserializeError::BadMessageId { got: msg_id });
        }

        let server_time = msg_id >> 32;
        let now = now.as_secs() as i64 + self.time_offset as i64;
        if server_time < now - MAX_SERVER_MSG_AGE || server_time > now + MAX_SERVER_MSG_DRIFT {
            return Err(DeserializeError::StaleMessageId { got: msg_id });
        }

        Ok(())
    }

    /// Remembers a server message identifier.
    ///
    /// Returns `false` if it was seen before, in which case the message
    /// should not be processed again. Only a bounded amount of identifiers
    /// is remembered; anything older than all of them counts as seen.
    pub(crate) fn register_received(&mut self, msg_id: i64) -> bool {
        if self.received.len() >= MAX_RECEIVED_IDS {
            match self.received.first() {
                Some(&oldest) if msg_id < oldest => return false,
                _ => {}
            }
        }

        if !self.received.insert(msg_id) {
            return false;
        }

        while self.received.len() > MAX_RECEIVED_IDS {
            self.received.pop_first();
        }
        true
    }

    /// Whether the server message with this identifier was processed already.
    pub fn was_received(&self, msg_id: MsgId) -> bool {
        self.received.contains(&msg_id.0)
    }

    /// Schedules the acknowledgement of a content-related server message.
    pub fn add_message_to_ack(&mut self, msg_id: MsgId) {
        if !self.pending_ack.contains(&msg_id.0) {
            self.pending_ack.push(msg_id.0);
        }
    }

    pub fn has_scheduled_acks(&self) -> bool {
        !self.pending_ack.is_empty()
    }

    /// Takes every acknowledgement scheduled so far.
    pub fn take_scheduled_acks(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.pending_ack)
    }

    /// Records that a content-related message was sent and awaits for an
    /// acknowledgement.
    pub fn message_sent(&mut self, msg_id: MsgId) {
        self.unacknowledged.insert(msg_id.0);
    }

    /// Records that the server acknowledged the given messages.
    pub fn messages_acknowledged(&mut self, msg_ids: &[MsgId]) {
        for msg_id in msg_ids {
            self.unacknowledged.remove(&msg_id.0);
        }
    }

    /// Content-related messages which were sent but not acknowledged.
    pub fn unacknowledged(&self) -> Vec<MsgId> {
        self.unacknowledged.iter().copied().map(MsgId).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Duration = Duration::from_secs(1_700_000_000);

    fn server_msg_id(secs: u64, low: i64) -> i64 {
        ((secs << 32) as i64) | low
    }

    #[test]
    fn msg_ids_are_monotonic() {
        let mut session = SessionInfo::with_session_id(1, 0);
        let first = session.generate_msg_id_at(NOW);
        let second = session.generate_msg_id_at(NOW);
        let third = session.generate_msg_id_at(NOW - Duration::from_secs(5));

        assert_eq!(first.0 >> 32, NOW.as_secs() as i64);
        assert_eq!(first.0 % 4, 0);
        assert_eq!(second.0, first.0 + 4);
        assert_eq!(third.0, second.0 + 4);
    }

    #[test]
    fn msg_ids_apply_time_offset() {
        let mut session = SessionInfo::with_session_id(1, -10);
        let msg_id = session.generate_msg_id_at(NOW);
        assert_eq!(msg_id.0 >> 32, NOW.as_secs() as i64 - 10);
    }

    #[test]
    fn seq_no_parity() {
        let mut session = SessionInfo::with_session_id(1, 0);
        assert_eq!(session.take_seq_no(false), 0);
        assert_eq!(session.take_seq_no(true), 1);
        assert_eq!(session.take_seq_no(true), 3);
        assert_eq!(session.take_seq_no(false), 4);
        assert_eq!(session.take_seq_no(false), 4);
        assert_eq!(session.take_seq_no(true), 5);
    }

    #[test]
    fn time_offset_is_corrected() {
        let mut session = SessionInfo::with_session_id(1, 0);
        session.correct_time_offset_at(server_msg_id(NOW.as_secs() + 42, 1), NOW);
        assert_eq!(session.time_offset(), 42);
    }

    #[test]
    fn server_msg_id_parity() {
        let session = SessionInfo::with_session_id(1, 0);
        let secs = NOW.as_secs();
        assert!(session.validate_server_msg_id_at(server_msg_id(secs, 1), NOW).is_ok());
        assert!(session.validate_server_msg_id_at(server_msg_id(secs, 3), NOW).is_ok());
        assert_eq!(
            session.validate_server_msg_id_at(server_msg_id(secs, 4), NOW),
            Err(DeserializeError::BadMessageId {
                got: server_msg_id(secs, 4)
            })
        );
        assert_eq!(
            session.validate_server_msg_id_at(server_msg_id(secs, 2), NOW),
            Err(DeserializeError::BadMessageId {
                got: server_msg_id(secs, 2)
            })
        );
    }

    #[test]
    fn server_msg_id_window() {
        let session = SessionInfo::with_session_id(1, 0);
        let secs = NOW.as_secs();
        for ok in [secs - 300, secs, secs + 30] {
            assert!(session.validate_server_msg_id_at(server_msg_id(ok, 1), NOW).is_ok());
        }
        for bad in [secs - 301, secs + 31] {
            let msg_id = server_msg_id(bad, 1);
            assert_eq!(
                session.validate_server_msg_id_at(msg_id, NOW),
                Err(DeserializeError::StaleMessageId { got: msg_id })
            );
        }
    }

    #[test]
    fn server_msg_id_window_follows_offset() {
        let session = SessionInfo::with_session_id(1, 3600);
        let msg_id = server_msg_id(NOW.as_secs() + 3600, 1);
        assert!(session.validate_server_msg_id_at(msg_id, NOW).is_ok());
    }

    #[test]
    fn duplicates_are_detected() {
        let mut session = SessionInfo::with_session_id(1, 0);
        assert!(session.register_received(5));
        assert!(!session.register_received(5));
        assert!(session.was_received(MsgId(5)));
    }

    #[test]
    fn received_ids_are_bounded() {
        let mut session = SessionInfo::with_session_id(1, 0);
        for i in 0..MAX_RECEIVED_IDS as i64 + 10 {
            assert!(session.register_received(100 + i * 4));
        }
        assert_eq!(session.received.len(), MAX_RECEIVED_IDS);

        // Forgotten and older than anything remembered.
        assert!(!session.register_received(100));
        assert!(!session.register_received(1));
    }

    #[test]
    fn acks_are_scheduled_once() {
        let mut session = SessionInfo::with_session_id(1, 0);
        session.add_message_to_ack(MsgId(7));
        session.add_message_to_ack(MsgId(7));
        session.add_message_to_ack(MsgId(11));
        assert!(session.has_scheduled_acks());
        assert_eq!(session.take_scheduled_acks(), vec![7, 11]);
        assert!(!session.has_scheduled_acks());
    }

    #[test]
    fn unacknowledged_messages_are_tracked() {
        let mut session = SessionInfo::with_session_id(1, 0);
        session.message_sent(MsgId(8));
        session.message_sent(MsgId(4));
        assert_eq!(session.unacknowledged(), vec![MsgId(4), MsgId(8)]);

        session.messages_acknowledged(&[MsgId(4), MsgId(12)]);
        assert_eq!(session.unacknowledged(), vec![MsgId(8)]);
    }
}
