// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This library is an implementation of the [Mobile Transport Protocol].
//!
//! It is sans-IO: nothing here touches the network or spawns tasks. The
//! caller feeds bytes in and takes bytes out.
//!
//! * [`transport`] frames packets so that they can be sent over a stream.
//! * [`mtp`] turns request bodies into (possibly encrypted) messages, and
//!   incoming messages back into results and service notifications.
//! * [`authentication`] drives the steps needed to create a new
//!   authorization key.
//! * [`SessionInfo`] holds the message identifiers and sequence numbers
//!   that belong to one session.
//!
//! [Mobile Transport Protocol]: https://core.telegram.org/mtproto
#![deny(unsafe_code)]

pub mod authentication;
pub mod manual_tl;
pub mod mtp;
mod session;
pub mod transport;
mod utils;

pub use session::SessionInfo;

/// The default compression threshold to be used.
pub const DEFAULT_COMPRESSION_THRESHOLD: Option<usize> = Some(512);

/// A Message Identifier.
///
/// When requests are sent, a new message identifier is assigned to them.
/// The responses carry the identifier of the message they answer, so it
/// can be used to tell them apart.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MsgId(pub i64);
