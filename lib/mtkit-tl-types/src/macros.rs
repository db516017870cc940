// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// The few definitions this crate carries are written by hand with these
// helpers instead of being generated from a `.tl` file.

/// Defines a boxed TL constructor: a struct whose serialized form starts
/// with its constructor identifier followed by every field in order.
///
/// Also generates `deserialize_body`, which reads the fields alone, for
/// use once the identifier has already been consumed.
macro_rules! tl_constructor {
    (
        $( #[$meta:meta] )*
        pub struct $name:ident = $id:literal {
            $( $( #[$field_meta:meta] )* pub $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $( #[$meta] )*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name {
            $( $( #[$field_meta] )* pub $field: $ty ),*
        }

        impl $crate::Identifiable for $name {
            const CONSTRUCTOR_ID: u32 = $id;
        }

        impl $crate::Serializable for $name {
            #[allow(unused_variables)]
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                <u32 as $crate::Serializable>::serialize(
                    &<Self as $crate::Identifiable>::CONSTRUCTOR_ID,
                    buf,
                );
                $( $crate::Serializable::serialize(&self.$field, buf); )*
            }
        }

        impl $name {
            #[allow(unused_variables)]
            pub(crate) fn deserialize_body(
                buf: $crate::deserialize::Buffer,
            ) -> $crate::deserialize::Result<Self> {
                Ok(Self {
                    $( $field: $crate::Deserializable::deserialize(buf)? ),*
                })
            }
        }

        impl $crate::Deserializable for $name {
            fn deserialize(buf: $crate::deserialize::Buffer) -> $crate::deserialize::Result<Self> {
                let id = <u32 as $crate::Deserializable>::deserialize(buf)?;
                if id != <Self as $crate::Identifiable>::CONSTRUCTOR_ID {
                    return Err($crate::deserialize::Error::UnexpectedConstructor { id });
                }
                Self::deserialize_body(buf)
            }
        }
    };
}

/// Defines a remote function: a constructor plus the type it returns.
macro_rules! tl_function {
    (
        $( #[$meta:meta] )*
        pub struct $name:ident = $id:literal {
            $( $( #[$field_meta:meta] )* pub $field:ident : $ty:ty ),* $(,)?
        } -> $ret:ty
    ) => {
        tl_constructor! {
            $( #[$meta] )*
            pub struct $name = $id {
                $( $( #[$field_meta] )* pub $field: $ty ),*
            }
        }

        impl $crate::RemoteCall for $name {
            type Return = $ret;
        }
    };
}

/// Defines a boxed TL type with several possible constructors.
macro_rules! tl_enum {
    (
        $( #[$meta:meta] )*
        pub enum $name:ident {
            $( $variant:ident($ty:ty) ),+ $(,)?
        }
    ) => {
        $( #[$meta] )*
        #[derive(Clone, Debug, PartialEq)]
        pub enum $name {
            $( $variant($ty) ),+
        }

        impl $crate::Serializable for $name {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                match self {
                    $( Self::$variant(x) => $crate::Serializable::serialize(x, buf) ),+
                }
            }
        }

        impl $crate::Deserializable for $name {
            fn deserialize(buf: $crate::deserialize::Buffer) -> $crate::deserialize::Result<Self> {
                let id = <u32 as $crate::Deserializable>::deserialize(buf)?;
                $(
                    if id == <$ty as $crate::Identifiable>::CONSTRUCTOR_ID {
                        return Ok(Self::$variant(<$ty>::deserialize_body(buf)?));
                    }
                )+
                Err($crate::deserialize::Error::UnexpectedConstructor { id })
            }
        }

        $(
            impl From<$ty> for $name {
                fn from(x: $ty) -> Self {
                    Self::$variant(x)
                }
            }
        )+
    };
}
