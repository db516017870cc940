// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::{Blob, RawVec};
use std::fmt;

/// The ways in which decoding TL data can fail.
///
/// Any of these means the whole enclosing message is malformed: decoding
/// never produces a partial object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The end of the buffer was reached earlier than anticipated, which
    /// implies there is not enough data to complete the deserialization.
    UnexpectedEof,

    /// The error type indicating an unexpected constructor was found,
    /// for example, when reading data that doesn't represent the
    /// correct type (e.g. reading a `bool` when we expect a `Vec`).
    ///
    /// Bare types lack the constructor information, and as such they
    /// cannot be validated.
    UnexpectedConstructor {
        /// The unexpected constructor identifier.
        id: u32,
    },

    /// A length or value was inconsistent with the rest of the data, such
    /// as a negative vector length or a string that is not valid UTF-8.
    MalformedData { reason: &'static str },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UnexpectedEof => write!(f, "unexpected eof"),
            Self::UnexpectedConstructor { id } => write!(f, "unexpected constructor: {id:08x}"),
            Self::MalformedData { reason } => write!(f, "malformed data: {reason}"),
        }
    }
}

/// A bounds-checked cursor over an in-memory buffer.
pub struct InputStream<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> InputStream<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// How many bytes have been consumed so far. Needed by callers that
    /// must know where some inner data ends and its padding begins.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// How many bytes are left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = *self.buf.get(self.pos).ok_or(Error::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let data = self.take(buf.len())?;
        buf.copy_from_slice(data);
        Ok(())
    }

    /// Consume and return the next `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::UnexpectedEof);
        }
        let data = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(data)
    }

    pub fn read_to_end(&mut self, buf: &mut Vec<u8>) -> usize {
        let rest = &self.buf[self.pos..];
        buf.extend(rest);
        self.pos = self.buf.len();
        rest.len()
    }
}

pub type Buffer<'a, 'b> = &'a mut InputStream<'b>;
pub type Result<T> = std::result::Result<T, Error>;

/// This trait allows for data serialized according to the
/// [Binary Data Serialization] to be deserialized into concrete instances.
///
/// [Binary Data Serialization]: https://core.telegram.org/mtproto/serialize
pub trait Deserializable {
    /// Deserializes an instance of the type from a given buffer.
    fn deserialize(buf: Buffer) -> Result<Self>
    where
        Self: std::marker::Sized;

    /// Convenience function to deserialize an instance from a given buffer.
    ///
    /// Trailing data after the instance is ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use mtkit_tl_types::Deserializable;
    ///
    /// assert_eq!(bool::from_bytes(&[0x37, 0x97, 0x79, 0xbc]).unwrap(), false);
    /// ```
    fn from_bytes(buf: &[u8]) -> Result<Self>
    where
        Self: std::marker::Sized,
    {
        Self::deserialize(&mut InputStream::from_slice(buf))
    }
}

impl Deserializable for bool {
    /// Deserializes a boolean according to the following definitions:
    ///
    /// * `boolFalse#bc799737 = Bool;` deserializes into `false`.
    /// * `boolTrue#997275b5 = Bool;` deserializes into `true`.
    #[allow(clippy::unreadable_literal)]
    fn deserialize(buf: Buffer) -> Result<Self> {
        match u32::deserialize(buf)? {
            0x997275b5u32 => Ok(true),
            0xbc799737u32 => Ok(false),
            id => Err(Error::UnexpectedConstructor { id }),
        }
    }
}

macro_rules! le_deserializable {
    ( $( $ty:ty ),+ ) => {
        $(
            impl Deserializable for $ty {
                fn deserialize(buf: Buffer) -> Result<Self> {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    buf.read_exact(&mut bytes)?;
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )+
    };
}

le_deserializable!(i32, u32, i64, f64);

/// `int128` and `int256`.
impl<const N: usize> Deserializable for [u8; N] {
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut bytes = [0u8; N];
        buf.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

fn read_vector_len(buf: Buffer) -> Result<usize> {
    let len = i32::deserialize(buf)?;
    if len < 0 {
        return Err(Error::MalformedData {
            reason: "negative vector length",
        });
    }
    // Every item takes at least four bytes.
    if len as usize > buf.remaining() / 4 {
        return Err(Error::UnexpectedEof);
    }
    Ok(len as usize)
}

impl<T: Deserializable> Deserializable for Vec<T> {
    /// Deserializes a boxed vector:
    ///
    /// * `vector#1cb5c415 {t:Type} # [ t ] = Vector t;`.
    ///
    /// # Examples
    ///
    /// ```
    /// use mtkit_tl_types::Deserializable;
    ///
    /// assert_eq!(Vec::<i32>::from_bytes(&[0x15, 0xc4, 0xb5, 0x1c, 0x0, 0x0, 0x0, 0x0]).unwrap(), Vec::new());
    /// assert_eq!(Vec::<i32>::from_bytes(&[0x15, 0xc4, 0xb5, 0x1c, 0x1, 0x0, 0x0, 0x0, 0x7f, 0x0, 0x0, 0x0]).unwrap(),
    ///            vec![0x7f_i32]);
    /// ```
    #[allow(clippy::unreadable_literal)]
    fn deserialize(buf: Buffer) -> Result<Self> {
        let id = u32::deserialize(buf)?;
        if id != 0x1cb5c415u32 {
            return Err(Error::UnexpectedConstructor { id });
        }
        let len = read_vector_len(buf)?;
        (0..len).map(|_| T::deserialize(buf)).collect()
    }
}

impl<T: Deserializable> Deserializable for RawVec<T> {
    /// Deserializes a bare vector, which lacks the constructor identifier.
    fn deserialize(buf: Buffer) -> Result<Self> {
        let len = read_vector_len(buf)?;
        (0..len)
            .map(|_| T::deserialize(buf))
            .collect::<Result<Vec<T>>>()
            .map(Self)
    }
}

impl Deserializable for String {
    /// Deserializes a UTF-8 string, failing if the bytes are not valid
    /// UTF-8.
    ///
    /// # Examples
    ///
    /// ```
    /// use mtkit_tl_types::Deserializable;
    ///
    /// assert_eq!(String::from_bytes(&[0x02, b'H', b'i', 0x00]).unwrap(), "Hi");
    /// assert!(String::from_bytes(&[0x01, 0xff, 0x00, 0x00]).is_err());
    /// ```
    fn deserialize(buf: Buffer) -> Result<Self> {
        String::from_utf8(Vec::<u8>::deserialize(buf)?).map_err(|_| Error::MalformedData {
            reason: "string is not valid utf-8",
        })
    }
}

impl Deserializable for Vec<u8> {
    /// Deserializes a byte-string.
    ///
    /// # Examples
    ///
    /// ```
    /// use mtkit_tl_types::Deserializable;
    ///
    /// assert_eq!(Vec::<u8>::from_bytes(&[0x00, 0x00, 0x00, 0x00]).unwrap(), Vec::new());
    /// assert_eq!(Vec::<u8>::from_bytes(&[0x01, 0x7f, 0x00, 0x00]).unwrap(), vec![0x7f_u8]);
    /// ```
    fn deserialize(buf: Buffer) -> Result<Self> {
        let first_byte = buf.read_byte()?;
        let (header_len, len) = match first_byte {
            254 => {
                let mut len = [0u8; 4];
                buf.read_exact(&mut len[..3])?;
                (4, u32::from_le_bytes(len) as usize)
            }
            255 => {
                return Err(Error::MalformedData {
                    reason: "invalid byte-string length marker",
                });
            }
            len => (1, len as usize),
        };

        let data = buf.take(len)?.to_vec();
        let padding = (4 - (header_len + len) % 4) % 4;
        buf.take(padding)?;

        Ok(data)
    }
}

impl Deserializable for Blob {
    /// Takes every remaining byte, without interpreting them.
    fn deserialize(buf: Buffer) -> Result<Self> {
        let mut data = Vec::with_capacity(buf.remaining());
        buf.read_to_end(&mut data);
        Ok(Self(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Serializable;

    #[test]
    fn integers_round_trip() {
        for value in [0i32, 1, -1, i32::MAX, i32::MIN] {
            assert_eq!(i32::from_bytes(&value.to_bytes()), Ok(value));
        }
        for value in [0i64, -42, i64::MAX, i64::MIN] {
            assert_eq!(i64::from_bytes(&value.to_bytes()), Ok(value));
        }
        assert_eq!(f64::from_bytes(&1.5f64.to_bytes()), Ok(1.5));
        assert_eq!(<[u8; 16]>::from_bytes(&[3; 16]), Ok([3; 16]));
    }

    #[test]
    fn byte_strings_round_trip_across_the_long_form_boundary() {
        for len in [0, 1, 3, 4, 253, 254, 255, 1000] {
            let data = (0..len).map(|i| i as u8).collect::<Vec<u8>>();
            let bytes = data.to_bytes();
            assert_eq!(bytes.len() % 4, 0, "len {len}");

            let mut stream = InputStream::from_slice(&bytes);
            assert_eq!(Vec::<u8>::deserialize(&mut stream), Ok(data));
            assert_eq!(stream.remaining(), 0);
        }
    }

    #[test]
    fn truncated_buffers_fail() {
        let bytes = vec![1i64, 2, 3].to_bytes();
        for cut in 0..bytes.len() {
            assert!(Vec::<i64>::from_bytes(&bytes[..cut]).is_err(), "cut {cut}");
        }

        let bytes = "hello".to_string().to_bytes();
        assert_eq!(String::from_bytes(&bytes[..4]), Err(Error::UnexpectedEof));
    }

    #[test]
    fn inconsistent_lengths_fail() {
        // Vector claiming -1 items.
        let mut bytes = 0x1cb5c415u32.to_bytes();
        bytes.extend((-1i32).to_bytes());
        assert!(matches!(
            Vec::<i32>::from_bytes(&bytes),
            Err(Error::MalformedData { .. })
        ));

        // Vector claiming far more items than the buffer holds.
        let mut bytes = 0x1cb5c415u32.to_bytes();
        bytes.extend(1_000_000i32.to_bytes());
        bytes.extend(7i32.to_bytes());
        assert_eq!(Vec::<i32>::from_bytes(&bytes), Err(Error::UnexpectedEof));

        // Long byte-string whose length points past the end.
        assert_eq!(
            Vec::<u8>::from_bytes(&[254, 0xff, 0xff, 0x00, 1, 2, 3, 4]),
            Err(Error::UnexpectedEof)
        );
    }

    #[test]
    fn wrong_constructors_are_reported() {
        assert_eq!(
            bool::from_bytes(&[1, 0, 0, 0]),
            Err(Error::UnexpectedConstructor { id: 1 })
        );
        assert_eq!(
            Vec::<i32>::from_bytes(&[2, 0, 0, 0, 0, 0, 0, 0]),
            Err(Error::UnexpectedConstructor { id: 2 })
        );
    }

    #[test]
    fn blob_takes_the_rest() {
        let mut stream = InputStream::from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(u32::deserialize(&mut stream), Ok(0x04030201));
        assert_eq!(Blob::deserialize(&mut stream), Ok(Blob(vec![5])));
        assert_eq!(stream.remaining(), 0);
    }
}
