// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This library implements the [Binary Data Serialization] used by
//! Telegram, along with the handful of [`mtproto`] definitions the
//! protocol itself needs to work.
//!
//! The high-level API schema is intentionally not part of this crate.
//! It is plugged in by implementing the [`Serialization`] trait, which is
//! all the session and transport layers know about.
//!
//! [Binary Data Serialization]: https://core.telegram.org/mtproto/serialize
#[macro_use]
mod macros;

pub mod deserialize;
pub mod mtproto;
mod serializable;
mod serialization;

pub use deserialize::{Deserializable, InputStream};
pub use serializable::Serializable;
pub use serialization::{ConnectionParams, DatacenterOption, Serialization};

/// The error produced when decoding malformed data.
pub type DeserializeError = deserialize::Error;

/// This struct represents the concrete type of a vector, that is,
/// `vector` as opposed to the type `Vector`. This bare type is less
/// common, so instead of creating a enum for `Vector` wrapping `vector`
/// as Rust's `Vec` (as we would do with auto-generated code),
/// a new-type for `vector` is used instead.
#[derive(Clone, Debug, PartialEq)]
pub struct RawVec<T>(pub Vec<T>);

/// This struct represents an unparsed blob, which should not be deserialized
/// as a bytes string. Used by functions returning generic objects which pass
/// the underlying result without any modification or interpretation.
#[derive(Clone, Debug, PartialEq)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// Anything implementing this trait is identifiable by both ends (client-server)
/// when performing Remote Procedure Calls (RPC) and transmission of objects.
pub trait Identifiable {
    /// The unique identifier for the type.
    const CONSTRUCTOR_ID: u32;
}

/// Structures implementing this trait indicate that they are suitable for
/// use to perform Remote Procedure Calls (RPC), and know what the type of
/// the response will be.
pub trait RemoteCall: Serializable {
    /// The type of the "return" value coming from the other end of the
    /// connection.
    type Return: Deserializable;
}
