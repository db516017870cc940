// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
mod file;
mod memory;

pub use file::FileKeychain;
pub use memory::MemoryKeychain;

use snafu::Snafu;
use std::io;

/// Persistent storage of named secrets.
///
/// Values are opaque to the storage. Reads are served from memory, so only
/// writes can fail.
pub trait Keychain: Send {
    fn get(&self, name: &str) -> Option<Vec<u8>>;

    fn set(&mut self, name: &str, value: Vec<u8>) -> Result<(), KeychainError>;

    fn remove(&mut self, name: &str) -> Result<(), KeychainError>;
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
#[snafu(module(error))]
pub enum KeychainError {
    #[snafu(display("Keychain file \"{path}\" has an invalid format"))]
    InvalidFormat {
        path: String,
        source: mtkit_tl_types::DeserializeError,
    },

    #[snafu(display("Unexpected IO error occurred"))]
    UnexpectedIoError { source: io::Error },
}
