// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The asynchronous half of the protocol implementation.
//!
//! An [`MtProto`] engine owns the session with one datacenter. It drives a
//! transport that keeps a connection open (reconnecting as needed), creates
//! the authorization key when none is known, and lets every registered
//! [`MessageService`] add messages to each transaction and see every message
//! that arrives.
//!
//! [`RequestMessageService`] is the service used to invoke requests. The
//! [`TimeSyncMessageService`] and [`ResendMessageService`] keep the session
//! healthy and are normally registered alongside it:
//!
//! ```no_run
//! # async fn f(context: mtkit_session::ContextHandle) {
//! use mtkit_mtsender::{MtProto, RequestMessageService, TimeSyncMessageService};
//!
//! let engine = MtProto::builder(context, 2).build();
//! let (requests, handle) = RequestMessageService::new(engine.handle.clone());
//! engine.handle.add_message_service(Box::new(TimeSyncMessageService::new())).await.unwrap();
//! engine.handle.add_message_service(Box::new(requests)).await.unwrap();
//! tokio::spawn(engine.runner.run());
//! # }
//! ```
#![deny(unsafe_code)]

mod configuration;
mod discovery;
mod errors;
mod mtproto;
mod net;
mod reconnection;
mod request;
mod resend;
mod service;
mod time_sync;
mod transport;
mod utils;

pub use configuration::{ApiEnvironment, TransportKind};
pub use discovery::fetch_address_sets;
pub use errors::{InvocationError, ReadError, RpcError};
pub use mtproto::{MtProto, MtProtoBuilder, MtProtoDelegate, MtProtoHandle, MtProtoRunner};
pub use net::{NetStream, ServerAddr};
pub use reconnection::{AlwaysReconnect, FixedReconnect, NoReconnect, ReconnectionPolicy};
pub use request::{
    NoRetry, Request, RequestErrorContext, RequestHandle, RequestId, RequestMessageService,
    Response, RetryPolicy,
};
pub use resend::ResendMessageService;
pub use service::{MessageService, MessageTransaction, OutgoingMessage, ServiceContext, ServiceId};
pub use time_sync::TimeSyncMessageService;
pub use transport::{TransactionId, TransportState};
