// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::{Error, aes, sha1, sha256};
use num_bigint::BigUint;

/// An RSA public key, as used by the servers to receive the client's part
/// of the key exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    n: BigUint,
    e: BigUint,
}

/// TL `bytes` encoding, needed to compute the fingerprint without pulling
/// in the serialization crate.
fn push_tl_bytes(buffer: &mut Vec<u8>, data: &[u8]) {
    let header = if data.len() <= 253 {
        buffer.push(data.len() as u8);
        1
    } else {
        buffer.push(254);
        buffer.extend(&(data.len() as u32).to_le_bytes()[..3]);
        4
    };
    buffer.extend(data);
    let padding = (4 - (header + data.len()) % 4) % 4;
    buffer.resize(buffer.len() + padding, 0);
}

impl Key {
    /// Parse the modulus and exponent from their decimal representation.
    pub fn new(n: &str, e: &str) -> Option<Self> {
        Some(Self {
            n: BigUint::parse_bytes(n.as_bytes(), 10)?,
            e: BigUint::parse_bytes(e.as_bytes(), 10)?,
        })
    }

    /// The 64 lower-order bits of `SHA1(n || e)`, with both numbers
    /// serialized as TL `bytes`. This is how the server advertises which
    /// keys it can decrypt.
    pub fn fingerprint(&self) -> i64 {
        let mut buffer = Vec::with_capacity(256 + 8);
        push_tl_bytes(&mut buffer, &self.n.to_bytes_be());
        push_tl_bytes(&mut buffer, &self.e.to_bytes_be());

        let digest = sha1!(&buffer);
        let mut low = [0; 8];
        low.copy_from_slice(&digest[12..]);
        i64::from_le_bytes(low)
    }
}

/// Encrypt the given data, prefixing it with its SHA-1 and padding it with
/// the given random bytes up to 255 bytes, using RSA.
///
/// Fails if `data` does not leave room for the hash.
pub fn encrypt_hashed(data: &[u8], key: &Key, random_bytes: &[u8; 256]) -> Result<Vec<u8>, Error> {
    if data.len() > 255 - 20 {
        return Err(Error::InvalidArgument {
            reason: "data too large to be RSA-encrypted",
        });
    }

    let mut to_encrypt = Vec::with_capacity(255);
    to_encrypt.extend(sha1!(data));
    to_encrypt.extend(data);
    let padding_len = 255 - to_encrypt.len();
    to_encrypt.extend(&random_bytes[..padding_len]);

    let encrypted = BigUint::from_bytes_be(&to_encrypt)
        .modpow(&key.e, &key.n)
        .to_bytes_be();

    let mut block = vec![0; 256usize.saturating_sub(encrypted.len())];
    block.extend(encrypted);
    Ok(block)
}

/// Encrypt up to 144 bytes of `data` with the `RSA_PAD` scheme the server
/// expects for `p_q_inner_data`.
///
/// The first `192 - data.len()` bytes of `random_bytes` pad the data and
/// the last 32 are the temporary AES key. Should the padded block not fit
/// under the modulus, the temporary key is replaced by its own SHA-256 and
/// the process repeats.
///
/// See <https://core.telegram.org/mtproto/auth_key#presenting-proof-of-work-server-authentication>.
pub fn encrypt_padded(data: &[u8], key: &Key, random_bytes: &[u8; 224]) -> Result<Vec<u8>, Error> {
    if data.len() > 144 {
        return Err(Error::InvalidArgument {
            reason: "data too large for RSA_PAD",
        });
    }

    let mut data_with_padding = Vec::with_capacity(192);
    data_with_padding.extend(data);
    data_with_padding.extend(&random_bytes[..192 - data.len()]);

    let mut temp_key = [0; 32];
    temp_key.copy_from_slice(&random_bytes[192..]);

    loop {
        let mut aes_encrypted = Vec::with_capacity(224);
        aes_encrypted.extend(data_with_padding.iter().rev());
        aes_encrypted.extend(sha256!(&temp_key, &data_with_padding));
        aes::ige_encrypt(&mut aes_encrypted, &temp_key, &[0; 32])?;

        let aes_hash = sha256!(&aes_encrypted);
        let mut key_aes_encrypted = Vec::with_capacity(256);
        key_aes_encrypted.extend(temp_key.iter().zip(aes_hash).map(|(a, b)| a ^ b));
        key_aes_encrypted.extend(aes_encrypted);

        let payload = BigUint::from_bytes_be(&key_aes_encrypted);
        if payload >= key.n {
            temp_key = sha256!(&temp_key);
            continue;
        }

        let encrypted = payload.modpow(&key.e, &key.n).to_bytes_be();
        let mut block = vec![0; 256usize.saturating_sub(encrypted.len())];
        block.extend(encrypted);
        return Ok(block);
    }
}

/// Find the server key for one of the fingerprints listed in `resPQ`.
#[allow(clippy::unreadable_literal)]
pub fn key_for_fingerprint(fingerprint: i64) -> Option<Key> {
    let n = match fingerprint {
        // Production
        -3414540481677951611 => {
            "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323"
        }
        // Test
        -5595554452916591101 => {
            "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949"
        }
        _ => return None,
    };
    Key::new(n, "65537")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OLD_SERVER_N: &str = "22081946531037833540524260580660774032207476521197121128740358761486364763467087828766873972338019078976854986531076484772771735399701424566177039926855356719497736439289455286277202113900509554266057302466528985253648318314129246825219640197356165626774276930672688973278712614800066037531599375044750753580126415613086372604312320014358994394131667022861767539879232149461579922316489532682165746762569651763794500923643656753278887871955676253526661694459370047843286685859688756429293184148202379356802488805862746046071921830921840273062124571073336369210703400985851431491295910187179045081526826572515473914151";

    #[test]
    fn encrypts_with_known_key() {
        let key = Key::new(OLD_SERVER_N, "65537").unwrap();
        let result = encrypt_hashed(b"Hello!", &key, &[0; 256]).unwrap();
        assert_eq!(result.len(), 256);
        assert_eq!(
            result[..16],
            [
                117, 112, 45, 76, 136, 210, 155, 106, 185, 52, 53, 81, 36, 221, 40, 217
            ]
        );
        assert_eq!(result[248..], [48, 181, 30, 22, 93, 108, 221, 2]);
    }

    #[test]
    fn pads_with_temporary_key() {
        // An all-zero temporary key puts the block over this modulus, so
        // the key is rehashed once before encrypting.
        let key = Key::new(OLD_SERVER_N, "65537").unwrap();
        let result = encrypt_padded(b"Hello!", &key, &[0; 224]).unwrap();
        assert_eq!(result.len(), 256);
        assert_eq!(
            result[..16],
            [
                28, 25, 197, 165, 141, 147, 104, 220, 220, 82, 146, 190, 60, 214, 45, 189
            ]
        );
        assert_eq!(result[248..], [218, 111, 5, 51, 2, 110, 212, 197]);
        assert!(matches!(
            encrypt_padded(&[0; 148], &key, &[0; 224]),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn known_fingerprints_round_trip() {
        for fingerprint in [-3414540481677951611, -5595554452916591101] {
            let key = key_for_fingerprint(fingerprint).unwrap();
            assert_eq!(key.fingerprint(), fingerprint);
        }
        assert!(key_for_fingerprint(0).is_none());
    }

    #[test]
    fn rejects_oversized_data() {
        let key = Key::new(OLD_SERVER_N, "65537").unwrap();
        assert!(matches!(
            encrypt_hashed(&[0; 236], &key, &[0; 256]),
            Err(Error::InvalidArgument { .. })
        ));
    }
}
