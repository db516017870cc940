// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The subset of `mtproto.tl` needed to create authorization keys and to
//! keep a session healthy.
//!
//! Byte-strings holding big numbers (`pq`, `p`, `q`, `dh_prime`, `g_a`...)
//! are kept as `Vec<u8>` in big-endian order.
#![allow(clippy::unreadable_literal)]
use crate::deserialize::{Buffer, Result};
use crate::{Deserializable, Identifiable, RawVec, RemoteCall, Serializable};

// Authorization key creation.

tl_function! {
    /// `req_pq_multi#be7e8ef1 nonce:int128 = ResPQ;`
    pub struct ReqPqMulti = 0xbe7e8ef1 {
        pub nonce: [u8; 16],
    } -> ResPq
}

tl_constructor! {
    /// `resPQ#05162463 nonce:int128 server_nonce:int128 pq:string
    /// server_public_key_fingerprints:Vector<long> = ResPQ;`
    pub struct ResPq = 0x05162463 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub pq: Vec<u8>,
        pub server_public_key_fingerprints: Vec<i64>,
    }
}

tl_constructor! {
    /// `p_q_inner_data#83c95aec pq:string p:string q:string nonce:int128
    /// server_nonce:int128 new_nonce:int256 = P_Q_inner_data;`
    pub struct PQInnerData = 0x83c95aec {
        pub pq: Vec<u8>,
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce: [u8; 32],
    }
}

tl_function! {
    /// `req_DH_params#d712e4be nonce:int128 server_nonce:int128 p:string
    /// q:string public_key_fingerprint:long encrypted_data:string
    /// = Server_DH_Params;`
    pub struct ReqDhParams = 0xd712e4be {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub p: Vec<u8>,
        pub q: Vec<u8>,
        pub public_key_fingerprint: i64,
        pub encrypted_data: Vec<u8>,
    } -> ServerDhParams
}

tl_constructor! {
    pub struct ServerDhParamsFail = 0x79cb045d {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash: [u8; 16],
    }
}

tl_constructor! {
    pub struct ServerDhParamsOk = 0xd0e8075c {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub encrypted_answer: Vec<u8>,
    }
}

tl_enum! {
    pub enum ServerDhParams {
        Fail(ServerDhParamsFail),
        Ok(ServerDhParamsOk),
    }
}

tl_constructor! {
    /// Sent encrypted inside [`ServerDhParamsOk::encrypted_answer`].
    pub struct ServerDhInnerData = 0xb5890dba {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub g: i32,
        pub dh_prime: Vec<u8>,
        pub g_a: Vec<u8>,
        pub server_time: i32,
    }
}

tl_constructor! {
    pub struct ClientDhInnerData = 0x6643b654 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub retry_id: i64,
        pub g_b: Vec<u8>,
    }
}

tl_function! {
    pub struct SetClientDhParams = 0xf5045f1f {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub encrypted_data: Vec<u8>,
    } -> SetClientDhParamsAnswer
}

tl_constructor! {
    pub struct DhGenOk = 0x3bcbf734 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash1: [u8; 16],
    }
}

tl_constructor! {
    pub struct DhGenRetry = 0x46dc1fb9 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash2: [u8; 16],
    }
}

tl_constructor! {
    pub struct DhGenFail = 0xa69dae02 {
        pub nonce: [u8; 16],
        pub server_nonce: [u8; 16],
        pub new_nonce_hash3: [u8; 16],
    }
}

tl_enum! {
    pub enum SetClientDhParamsAnswer {
        DhGenOk(DhGenOk),
        DhGenRetry(DhGenRetry),
        DhGenFail(DhGenFail),
    }
}

// Service messages.

tl_constructor! {
    /// Acknowledges the receipt of content-related messages.
    pub struct MsgsAck = 0x62d6b459 {
        pub msg_ids: Vec<i64>,
    }
}

tl_constructor! {
    pub struct BadMsgNotification = 0xa7eff811 {
        pub bad_msg_id: i64,
        pub bad_msg_seqno: i32,
        pub error_code: i32,
    }
}

tl_constructor! {
    pub struct BadServerSalt = 0xedab447b {
        pub bad_msg_id: i64,
        pub bad_msg_seqno: i32,
        pub error_code: i32,
        pub new_server_salt: i64,
    }
}

tl_enum! {
    pub enum BadMsg {
        Notification(BadMsgNotification),
        ServerSalt(BadServerSalt),
    }
}

tl_constructor! {
    pub struct MsgsStateReq = 0xda69fb52 {
        pub msg_ids: Vec<i64>,
    }
}

tl_constructor! {
    /// One status byte in `info` per message of the matching request.
    pub struct MsgsStateInfo = 0x04deb57d {
        pub req_msg_id: i64,
        pub info: Vec<u8>,
    }
}

tl_constructor! {
    pub struct MsgsAllInfo = 0x8cc0d131 {
        pub msg_ids: Vec<i64>,
        pub info: Vec<u8>,
    }
}

tl_constructor! {
    pub struct MsgDetailedInfo = 0x276d3ec6 {
        pub msg_id: i64,
        pub answer_msg_id: i64,
        pub bytes: i32,
        pub status: i32,
    }
}

tl_constructor! {
    pub struct MsgNewDetailedInfo = 0x809db6df {
        pub answer_msg_id: i64,
        pub bytes: i32,
        pub status: i32,
    }
}

tl_constructor! {
    /// Asks the other side to send the given messages again.
    pub struct MsgResendReq = 0x7d861a08 {
        pub msg_ids: Vec<i64>,
    }
}

tl_constructor! {
    /// `rpc_error#2144ca19 error_code:int error_message:string = RpcError;`
    pub struct RpcError = 0x2144ca19 {
        pub error_code: i32,
        pub error_message: String,
    }
}

tl_constructor! {
    pub struct RpcAnswerUnknown = 0x5e2ad36e {}
}

tl_constructor! {
    pub struct RpcAnswerDroppedRunning = 0xcd78e586 {}
}

tl_constructor! {
    pub struct RpcAnswerDropped = 0xa43ad8b7 {
        pub msg_id: i64,
        pub seq_no: i32,
        pub bytes: i32,
    }
}

tl_enum! {
    pub enum RpcDropAnswerResult {
        Unknown(RpcAnswerUnknown),
        DroppedRunning(RpcAnswerDroppedRunning),
        Dropped(RpcAnswerDropped),
    }
}

/// `future_salt#0949d9dc valid_since:int valid_until:int salt:long = FutureSalt;`
///
/// Only ever found as a bare item of [`FutureSalts::salts`], so its
/// serialized form has no constructor identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct FutureSalt {
    pub valid_since: i32,
    pub valid_until: i32,
    pub salt: i64,
}

impl Identifiable for FutureSalt {
    const CONSTRUCTOR_ID: u32 = 0x0949d9dc;
}

impl Serializable for FutureSalt {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.valid_since.serialize(buf);
        self.valid_until.serialize(buf);
        self.salt.serialize(buf);
    }
}

impl Deserializable for FutureSalt {
    fn deserialize(buf: Buffer) -> Result<Self> {
        Ok(Self {
            valid_since: i32::deserialize(buf)?,
            valid_until: i32::deserialize(buf)?,
            salt: i64::deserialize(buf)?,
        })
    }
}

tl_constructor! {
    pub struct FutureSalts = 0xae500895 {
        pub req_msg_id: i64,
        pub now: i32,
        pub salts: RawVec<FutureSalt>,
    }
}

tl_constructor! {
    pub struct Pong = 0x347773c5 {
        pub msg_id: i64,
        pub ping_id: i64,
    }
}

tl_constructor! {
    pub struct DestroySessionOk = 0xe22045fc {
        pub session_id: i64,
    }
}

tl_constructor! {
    pub struct DestroySessionNone = 0x62d350c9 {
        pub session_id: i64,
    }
}

tl_enum! {
    pub enum DestroySessionRes {
        Ok(DestroySessionOk),
        None(DestroySessionNone),
    }
}

tl_constructor! {
    /// Informs that the server created a new session, and that messages
    /// with an identifier below `first_msg_id` may need to be resent.
    pub struct NewSessionCreated = 0x9ec20908 {
        pub first_msg_id: i64,
        pub unique_id: i64,
        pub server_salt: i64,
    }
}

// Service functions.

tl_function! {
    pub struct Ping = 0x7abe77ec {
        pub ping_id: i64,
    } -> Pong
}

tl_function! {
    /// Like [`Ping`], but asks the server to close the connection if no
    /// other ping arrives within `disconnect_delay` seconds.
    pub struct PingDelayDisconnect = 0xf3427b8c {
        pub ping_id: i64,
        pub disconnect_delay: i32,
    } -> Pong
}

tl_function! {
    pub struct GetFutureSalts = 0xb921bd04 {
        pub num: i32,
    } -> FutureSalts
}

tl_function! {
    /// Cancels the answer to a request that is no longer wanted.
    pub struct RpcDropAnswer = 0x58e4a740 {
        pub req_msg_id: i64,
    } -> RpcDropAnswerResult
}

tl_function! {
    pub struct DestroySession = 0xe7512126 {
        pub session_id: i64,
    } -> DestroySessionRes
}

/// `invokeAfterMsg#cb9f372d {X:Type} msg_id:long query:!X = X;`
///
/// The query is usually an already-serialized [`crate::Blob`].
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeAfterMsg<Q> {
    pub msg_id: i64,
    pub query: Q,
}

impl<Q> Identifiable for InvokeAfterMsg<Q> {
    const CONSTRUCTOR_ID: u32 = 0xcb9f372d;
}

impl<Q: Serializable> Serializable for InvokeAfterMsg<Q> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        self.query.serialize(buf);
    }
}

impl<Q: RemoteCall> RemoteCall for InvokeAfterMsg<Q> {
    type Return = Q::Return;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Blob;

    #[test]
    fn function_starts_with_its_constructor() {
        let bytes = ReqPqMulti { nonce: [1; 16] }.to_bytes();
        assert_eq!(bytes[..4], [0xf1, 0x8e, 0x7e, 0xbe]);
        assert_eq!(bytes.len(), 4 + 16);
    }

    #[test]
    fn enums_pick_the_right_constructor() {
        let answer = DhGenRetry {
            nonce: [1; 16],
            server_nonce: [2; 16],
            new_nonce_hash2: [3; 16],
        };
        let parsed = SetClientDhParamsAnswer::from_bytes(&answer.to_bytes()).unwrap();
        assert_eq!(parsed, SetClientDhParamsAnswer::DhGenRetry(answer));

        let pong = Pong {
            msg_id: 1,
            ping_id: 2,
        };
        assert_eq!(
            ServerDhParams::from_bytes(&pong.to_bytes()),
            Err(crate::DeserializeError::UnexpectedConstructor { id: 0x347773c5 })
        );
    }

    #[test]
    fn future_salts_are_bare_inside_the_vector() {
        let salts = FutureSalts {
            req_msg_id: 10,
            now: 100,
            salts: RawVec(vec![
                FutureSalt {
                    valid_since: 100,
                    valid_until: 200,
                    salt: 7,
                },
                FutureSalt {
                    valid_since: 200,
                    valid_until: 300,
                    salt: 8,
                },
            ]),
        };
        let bytes = salts.to_bytes();
        assert_eq!(bytes.len(), 4 + 8 + 4 + 4 + 2 * 16);
        assert_eq!(FutureSalts::from_bytes(&bytes), Ok(salts));
    }

    #[test]
    fn invoke_after_wraps_raw_queries() {
        let query = Ping { ping_id: 5 }.to_bytes();
        let bytes = InvokeAfterMsg {
            msg_id: 77,
            query: Blob(query.clone()),
        }
        .to_bytes();
        assert_eq!(bytes[..4], 0xcb9f372du32.to_le_bytes());
        assert_eq!(bytes[4..12], 77i64.to_le_bytes());
        assert_eq!(bytes[12..], query[..]);
    }
}
