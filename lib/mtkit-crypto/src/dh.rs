// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Diffie-Hellman helpers and the safety checks that must pass before the
//! parameters sent by a server are trusted.
use crate::Error;
use num_bigint::BigUint;
use num_traits::{One, Zero};

/// The 2048-bit safe prime every Telegram server currently uses.
///
/// Checking whether an arbitrary number is a safe prime is expensive, so
/// this one is accepted without testing it again.
const KNOWN_PRIME: &[u8] = &[
    0xc7, 0x1c, 0xae, 0xb9, 0xc6, 0xb1, 0xc9, 0x04, 0x8e, 0x6c, 0x52, 0x2f, 0x70, 0xf1, 0x3f, 0x73,
    0x98, 0x0d, 0x40, 0x23, 0x8e, 0x3e, 0x21, 0xc1, 0x49, 0x34, 0xd0, 0x37, 0x56, 0x3d, 0x93, 0x0f,
    0x48, 0x19, 0x8a, 0x0a, 0xa7, 0xc1, 0x40, 0x58, 0x22, 0x94, 0x93, 0xd2, 0x25, 0x30, 0xf4, 0xdb,
    0xfa, 0x33, 0x6f, 0x6e, 0x0a, 0xc9, 0x25, 0x13, 0x95, 0x43, 0xae, 0xd4, 0x4c, 0xce, 0x7c, 0x37,
    0x20, 0xfd, 0x51, 0xf6, 0x94, 0x58, 0x70, 0x5a, 0xc6, 0x8c, 0xd4, 0xfe, 0x6b, 0x6b, 0x13, 0xab,
    0xdc, 0x97, 0x46, 0x51, 0x29, 0x69, 0x32, 0x84, 0x54, 0xf1, 0x8f, 0xaf, 0x8c, 0x59, 0x5f, 0x64,
    0x24, 0x77, 0xfe, 0x96, 0xbb, 0x2a, 0x94, 0x1d, 0x5b, 0xcd, 0x1d, 0x4a, 0xc8, 0xcc, 0x49, 0x88,
    0x07, 0x08, 0xfa, 0x9b, 0x37, 0x8e, 0x3c, 0x4f, 0x3a, 0x90, 0x60, 0xbe, 0xe6, 0x7c, 0xf9, 0xa4,
    0xa4, 0xa6, 0x95, 0x81, 0x10, 0x51, 0x90, 0x7e, 0x16, 0x27, 0x53, 0xb5, 0x6b, 0x0f, 0x6b, 0x41,
    0x0d, 0xba, 0x74, 0xd8, 0xa8, 0x4b, 0x2a, 0x14, 0xb3, 0x14, 0x4e, 0x0e, 0xf1, 0x28, 0x47, 0x54,
    0xfd, 0x17, 0xed, 0x95, 0x0d, 0x59, 0x65, 0xb4, 0xb9, 0xdd, 0x46, 0x58, 0x2d, 0xb1, 0x17, 0x8d,
    0x16, 0x9c, 0x6b, 0xc4, 0x65, 0xb0, 0xd6, 0xff, 0x9c, 0xa3, 0x92, 0x8f, 0xef, 0x5b, 0x9a, 0xe4,
    0xe4, 0x18, 0xfc, 0x15, 0xe8, 0x3e, 0xbe, 0xa0, 0xf8, 0x7f, 0xa9, 0xff, 0x5e, 0xed, 0x70, 0x05,
    0x0d, 0xed, 0x28, 0x49, 0xf4, 0x7b, 0xf9, 0x59, 0xd9, 0x56, 0x85, 0x0c, 0xe9, 0x29, 0x85, 0x1f,
    0x0d, 0x81, 0x15, 0xf6, 0x35, 0xb1, 0x05, 0xee, 0x2e, 0x4e, 0x15, 0xd0, 0x4b, 0x24, 0x54, 0xbf,
    0x6f, 0x4f, 0xad, 0xf0, 0x34, 0xb1, 0x04, 0x03, 0x11, 0x9c, 0xd8, 0xe3, 0xb9, 0x2f, 0xcc, 0x5b,
];

/// Size in bits of the primes the servers are expected to use.
pub const PRIME_BITS: u64 = 2048;

/// `base ^ exponent mod modulus`.
pub fn exp(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> Result<BigUint, Error> {
    if modulus.is_zero() {
        return Err(Error::InvalidArgument {
            reason: "modulus must not be zero",
        });
    }
    Ok(base.modpow(exponent, modulus))
}

/// Whether `g` generates a subgroup of order `(p - 1) / 2` for the safe
/// prime `p`, following the quadratic residue rules for each supported
/// generator.
pub fn is_safe_g(g: u32, p: &BigUint) -> bool {
    let rem = |m: u32| (p % m).to_u32_digits().first().copied().unwrap_or(0);
    match g {
        2 => rem(8) == 7,
        3 => rem(3) == 2,
        4 => true,
        5 => matches!(rem(5), 1 | 4),
        6 => matches!(rem(24), 19 | 23),
        7 => matches!(rem(7), 3 | 5 | 6),
        _ => false,
    }
}

/// Whether both `p` and `(p - 1) / 2` are prime.
pub fn is_safe_prime(p: &BigUint) -> bool {
    if p.to_bytes_be() == KNOWN_PRIME {
        return true;
    }
    log::debug!("checking unknown {}-bit prime for safety", p.bits());
    glass_pumpkin::safe_prime::check(p)
}

/// Whether `value` (`g_a` or `g_b`) is in `(1, p - 1)` and at least
/// `2^(2048 - 64)` away from both ends of the range.
pub fn is_safe_g_a_or_b(value: &BigUint, p: &BigUint) -> bool {
    let one = BigUint::one();
    if p <= &one || value <= &one || value >= &(p - &one) {
        return false;
    }
    let margin = one << (PRIME_BITS - 64) as usize;
    if p <= &margin {
        return false;
    }
    value >= &margin && value <= &(p - &margin)
}

/// The prime accepted by [`is_safe_prime`] without further checks.
pub fn known_prime() -> BigUint {
    BigUint::from_bytes_be(KNOWN_PRIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exp_matches_small_numbers() {
        let r = exp(&4u32.into(), &13u32.into(), &497u32.into()).unwrap();
        assert_eq!(r, 445u32.into());
        assert!(matches!(
            exp(&4u32.into(), &13u32.into(), &BigUint::zero()),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn generator_rules() {
        let p = BigUint::from(23u32);
        assert!(is_safe_g(2, &p));
        assert!(is_safe_g(3, &p));
        assert!(is_safe_g(4, &p));
        assert!(!is_safe_g(5, &p));
        assert!(!is_safe_g(9, &p));
    }

    #[test]
    fn known_prime_is_accepted() {
        let p = known_prime();
        assert_eq!(p.bits(), PRIME_BITS);
        assert!(is_safe_prime(&p));
        assert!(!is_safe_prime(&(p + 1u32)));
    }

    #[test]
    fn unknown_primes_are_checked() {
        let safe = BigUint::parse_bytes(
            b"91185207321183015155495153901876504940934195032199180397683690774723603094143",
            10,
        )
        .unwrap();
        assert!(is_safe_prime(&safe));
        // Prime, but `(p - 1) / 2` is not.
        assert!(!is_safe_prime(&BigUint::from(29u32)));
        assert!(!is_safe_prime(&(safe + 2u32)));
    }

    #[test]
    fn g_a_range() {
        let p = known_prime();
        let one = BigUint::one();
        assert!(!is_safe_g_a_or_b(&one, &p));
        assert!(!is_safe_g_a_or_b(&(&p - &one), &p));
        assert!(!is_safe_g_a_or_b(&BigUint::from(1000u32), &p));
        assert!(is_safe_g_a_or_b(&(&p >> 1usize), &p));
    }
}
