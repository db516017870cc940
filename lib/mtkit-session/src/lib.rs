// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The registry of everything a client knows about Telegram's datacenters:
//! where they are, which authorization keys and salts are shared with each
//! of them, and how far the local clock is from the server's.
//!
//! The registry is the [`Context`] actor. It is seeded from a [`Keychain`]
//! and writes every change back to it.
mod address;
mod auth_info;
mod context;
mod keychain;

pub use address::{DatacenterAddress, DatacenterAddressSet};
pub use auth_info::{DatacenterAuthInfo, DatacenterSaltInfo, message_id_for_timestamp};
pub use context::{
    ChangeListener, Context, ContextBatch, ContextBuilder, ContextChange, ContextHandle,
    ContextRunner, Dropped, ListenerId,
};
pub use keychain::{FileKeychain, Keychain, KeychainError, MemoryKeychain};
