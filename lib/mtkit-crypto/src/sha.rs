// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Hashing helpers taking any number of byte slices, which are fed to the
//! hasher in order without concatenating them first.

/// Computes the SHA-1 digest of all the given byte slices, in order.
#[macro_export]
macro_rules! sha1 (
    ( $( $x:expr ),+ $(,)? ) => ({
        use $crate::sha1_impl::{Digest as _, Sha1};
        let mut hasher = Sha1::new();
        $(
            hasher.update($x);
        )+
        let digest: [u8; 20] = hasher.finalize().into();
        digest
    })
);

/// Computes the SHA-256 digest of all the given byte slices, in order.
#[macro_export]
macro_rules! sha256 (
    ( $( $x:expr ),+ $(,)? ) => ({
        use $crate::sha2_impl::{Digest as _, Sha256};
        let mut hasher = Sha256::new();
        $(
            hasher.update($x);
        )+
        let digest: [u8; 32] = hasher.finalize().into();
        digest
    })
);

#[cfg(test)]
mod tests {
    #[test]
    fn split_input_matches_joined_input() {
        assert_eq!(sha1!(b"hello ", b"world"), sha1!(b"hello world"));
        assert_eq!(sha256!(b"hel", b"lo ", b"world"), sha256!(b"hello world"));
    }

    #[test]
    fn known_digests() {
        assert_eq!(
            sha1!(b"abc"),
            [
                0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50,
                0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d
            ]
        );
        assert_eq!(
            sha256!(b"abc")[..8],
            [0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea]
        );
    }
}
