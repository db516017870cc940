// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Creation of an authorization key, one step per server answer.
//!
//! Every step consumes the state left by the previous one together with the
//! server's answer, and yields the next request to send:
//!
//! ```no_run
//! use mtkit_mtproto::authentication::{self, Error, Finished};
//!
//! fn exchange(request: &[u8]) -> Result<Vec<u8>, Error> {
//!     unimplemented!()
//! }
//!
//! fn generate() -> Result<Finished, Error> {
//!     let (request, state) = authentication::step1()?;
//!     let (request, state) = authentication::step2(state, &exchange(&request)?)?;
//!     let (request, state) = authentication::step3(state, &exchange(&request)?)?;
//!     authentication::create_key(state, &exchange(&request)?)
//! }
//! ```
//!
//! The requests are plain bodies. They still need to be wrapped with
//! [`Plain`](crate::mtp::Plain) and framed by a transport before sending.
use getrandom::getrandom;
use log::{debug, trace};
use mtkit_crypto::{self as crypto, AuthKey, aes, dh, factorize::factorize, rsa, sha1};
use mtkit_tl_types::{self as tl, Deserializable, InputStream, RemoteCall, Serializable, mtproto};
use num_bigint::BigUint;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Which of the values the server must echo back did not match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Nonce {
    Client,
    Server,
    /// The hash of the new nonce, as proof the server derived the same key.
    NewHash,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// An answer could not be parsed.
    Malformed(tl::deserialize::Error),
    NonceMismatch(Nonce),
    /// `pq` must be a 64-bit number.
    InvalidPqLength { len: usize },
    /// The server only offered keys we do not have.
    UnknownFingerprints { fingerprints: Vec<i64> },
    /// `server_DH_params_fail`.
    DhParamsFail,
    /// The encrypted answer is not made of whole blocks, or cannot hold its
    /// own hash.
    InvalidAnswerLength { len: usize },
    InvalidAnswerHash,
    /// `dh_prime` is not a 2048-bit safe prime.
    UnsafePrime,
    UnsafeGenerator { g: i32 },
    /// `g`, `g_a` or `g_b` is outside of the range both sides must check.
    ParameterOutOfRange { name: &'static str },
    /// `dh_gen_retry`. The handshake has to start over.
    DhGenRetry,
    DhGenFail,
    Crypto(crypto::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("auth key generation: ")?;
        match self {
            Self::Malformed(error) => write!(f, "unreadable answer ({error})"),
            Self::NonceMismatch(nonce) => write!(f, "{nonce:?} nonce does not match"),
            Self::InvalidPqLength { len } => write!(f, "pq is {len} bytes instead of 8"),
            Self::UnknownFingerprints { fingerprints } => {
                write!(f, "no known key among {fingerprints:?}")
            }
            Self::DhParamsFail => write!(f, "server failed to send DH parameters"),
            Self::InvalidAnswerLength { len } => {
                write!(f, "encrypted answer of {len} bytes is malformed")
            }
            Self::InvalidAnswerHash => write!(f, "encrypted answer hash does not match"),
            Self::UnsafePrime => write!(f, "DH prime is not a 2048-bit safe prime"),
            Self::UnsafeGenerator { g } => write!(f, "DH generator {g} is unsafe"),
            Self::ParameterOutOfRange { name } => write!(f, "{name} is out of range"),
            Self::DhGenRetry => write!(f, "server asked to retry"),
            Self::DhGenFail => write!(f, "server rejected the key"),
            Self::Crypto(error) => write!(f, "{error}"),
        }
    }
}

impl From<tl::deserialize::Error> for Error {
    fn from(error: tl::deserialize::Error) -> Self {
        Self::Malformed(error)
    }
}

impl From<crypto::Error> for Error {
    fn from(error: crypto::Error) -> Self {
        Self::Crypto(error)
    }
}

/// The nonces agreed on so far. Every answer must repeat them.
#[derive(Clone)]
struct Nonces {
    client: [u8; 16],
    server: [u8; 16],
    new: [u8; 32],
}

impl Nonces {
    fn check(&self, client: &[u8; 16], server: &[u8; 16]) -> Result<(), Error> {
        check_echo(Nonce::Client, client, &self.client)?;
        check_echo(Nonce::Server, server, &self.server)
    }

    /// The hash carried by `server_DH_params_fail`.
    fn new_nonce_hash(&self) -> [u8; 16] {
        let mut hash = [0; 16];
        hash.copy_from_slice(&sha1!(&self.new)[4..]);
        hash
    }

    /// `new_nonce[..8] ^ server_nonce[..8]`, read as little-endian.
    fn first_salt(&self) -> i64 {
        let mut salt = [0; 8];
        for (i, byte) in salt.iter_mut().enumerate() {
            *byte = self.new[i] ^ self.server[i];
        }
        i64::from_le_bytes(salt)
    }
}

fn check_echo(nonce: Nonce, got: &[u8], expected: &[u8]) -> Result<(), Error> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::NonceMismatch(nonce))
    }
}

/// What [`step1`] leaves for [`step2`].
pub struct Step1 {
    nonce: [u8; 16],
}

/// What [`step2`] leaves for [`step3`].
pub struct Step2 {
    nonces: Nonces,
}

/// What [`step3`] leaves for [`create_key`].
pub struct Step3 {
    nonces: Nonces,
    gab: BigUint,
    time_offset: i32,
}

/// The outcome of a successful handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    pub auth_key: [u8; 256],
    /// Server time minus local time, in seconds.
    pub time_offset: i32,
    pub first_salt: i64,
}

fn random<const N: usize>() -> [u8; N] {
    let mut buffer = [0; N];
    getrandom(&mut buffer).expect("failed to generate secure data for auth key");
    buffer
}

/// Ask for `pq` with a fresh nonce (`req_pq_multi`).
pub fn step1() -> Result<(Vec<u8>, Step1), Error> {
    Ok(request_pq(random()))
}

fn request_pq(nonce: [u8; 16]) -> (Vec<u8>, Step1) {
    trace!("requesting pq");
    (mtproto::ReqPqMulti { nonce }.to_bytes(), Step1 { nonce })
}

/// Factorize `pq` and send our half of the secret, encrypted with one of
/// the server's keys (`req_DH_params`).
pub fn step2(data: Step1, response: &[u8]) -> Result<(Vec<u8>, Step2), Error> {
    request_dh_params(data, response, &random())
}

/// A number in big-endian without leading zeros, or the server answers
/// with -404.
fn minimal_be_bytes(n: u64) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let zeros = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[zeros..].to_vec()
}

/// `random` holds the new nonce followed by the padding for RSA.
fn request_dh_params(
    data: Step1,
    response: &[u8],
    random: &[u8; 32 + 224],
) -> Result<(Vec<u8>, Step2), Error> {
    let res_pq = <mtproto::ReqPqMulti as RemoteCall>::Return::from_bytes(response)?;
    check_echo(Nonce::Client, &res_pq.nonce, &data.nonce)?;

    let pq = <[u8; 8]>::try_from(res_pq.pq.as_slice())
        .map(u64::from_be_bytes)
        .map_err(|_| Error::InvalidPqLength {
            len: res_pq.pq.len(),
        })?;
    let (p, q) = factorize(pq);
    debug!("factorized pq {pq} into {p} and {q}");

    let Some((fingerprint, key)) = res_pq
        .server_public_key_fingerprints
        .iter()
        .find_map(|&fingerprint| rsa::key_for_fingerprint(fingerprint).map(|key| (fingerprint, key)))
    else {
        return Err(Error::UnknownFingerprints {
            fingerprints: res_pq.server_public_key_fingerprints,
        });
    };

    let mut nonces = Nonces {
        client: data.nonce,
        server: res_pq.server_nonce,
        new: [0; 32],
    };
    nonces.new.copy_from_slice(&random[..32]);
    let mut padding = [0; 224];
    padding.copy_from_slice(&random[32..]);

    let (p, q) = (minimal_be_bytes(p), minimal_be_bytes(q));
    let inner = mtproto::PQInnerData {
        pq: res_pq.pq,
        p: p.clone(),
        q: q.clone(),
        nonce: nonces.client,
        server_nonce: nonces.server,
        new_nonce: nonces.new,
    }
    .to_bytes();

    let request = mtproto::ReqDhParams {
        nonce: nonces.client,
        server_nonce: nonces.server,
        p,
        q,
        public_key_fingerprint: fingerprint,
        encrypted_data: rsa::encrypt_padded(&inner, &key, &padding)?,
    };
    Ok((request.to_bytes(), Step2 { nonces }))
}

/// Check the server's Diffie-Hellman parameters and answer with ours
/// (`set_client_DH_params`).
pub fn step3(data: Step2, response: &[u8]) -> Result<(Vec<u8>, Step3), Error> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or_default();
    set_client_dh_params(data, response, &random(), now)
}

/// `random` holds the secret exponent `b` followed by AES padding.
fn set_client_dh_params(
    data: Step2,
    response: &[u8],
    random: &[u8; 256 + 16],
    now: i32,
) -> Result<(Vec<u8>, Step3), Error> {
    let Step2 { nonces } = data;
    let params = match <mtproto::ReqDhParams as RemoteCall>::Return::from_bytes(response)? {
        mtproto::ServerDhParams::Ok(params) => params,
        mtproto::ServerDhParams::Fail(fail) => {
            nonces.check(&fail.nonce, &fail.server_nonce)?;
            check_echo(Nonce::NewHash, &fail.new_nonce_hash, &nonces.new_nonce_hash())?;
            return Err(Error::DhParamsFail);
        }
    };
    nonces.check(&params.nonce, &params.server_nonce)?;

    let (key, iv) = crypto::generate_key_data_from_nonce(&nonces.server, &nonces.new);
    let inner = decrypt_answer(params.encrypted_answer, &key, &iv)?;
    nonces.check(&inner.nonce, &inner.server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    if dh_prime.bits() != dh::PRIME_BITS || !dh::is_safe_prime(&dh_prime) {
        return Err(Error::UnsafePrime);
    }
    if inner.g < 0 || !dh::is_safe_g(inner.g as u32, &dh_prime) {
        return Err(Error::UnsafeGenerator { g: inner.g });
    }
    let g = BigUint::from(inner.g as u32);
    let g_a = BigUint::from_bytes_be(&inner.g_a);

    let b = BigUint::from_bytes_be(&random[..256]);
    let g_b = dh::exp(&g, &b, &dh_prime)?;
    let gab = dh::exp(&g_a, &b, &dh_prime)?;
    check_ranges(&g, &g_a, &g_b, &dh_prime)?;

    let client_inner = mtproto::ClientDhInnerData {
        nonce: nonces.client,
        server_nonce: nonces.server,
        retry_id: 0,
        g_b: g_b.to_bytes_be(),
    }
    .to_bytes();

    // sha1 + data + padding up to the AES block size.
    let mut encrypted_data = sha1!(&client_inner).to_vec();
    encrypted_data.extend(&client_inner);
    let padding = (16 - encrypted_data.len() % 16) % 16;
    encrypted_data.extend(&random[256..256 + padding]);
    aes::ige_encrypt(&mut encrypted_data, &key, &iv)?;

    let request = mtproto::SetClientDhParams {
        nonce: nonces.client,
        server_nonce: nonces.server,
        encrypted_data,
    };
    Ok((
        request.to_bytes(),
        Step3 {
            nonces,
            gab,
            time_offset: inner.server_time - now,
        },
    ))
}

/// Decrypt `server_DH_inner_data` and check the SHA-1 in front of it.
/// Whatever follows the data is padding.
fn decrypt_answer(
    mut answer: Vec<u8>,
    key: &[u8; 32],
    iv: &[u8; 32],
) -> Result<mtproto::ServerDhInnerData, Error> {
    if answer.len() % 16 != 0 || answer.len() < 32 {
        return Err(Error::InvalidAnswerLength { len: answer.len() });
    }
    aes::ige_decrypt(&mut answer, key, iv)?;

    let (hash, data) = answer.split_at(20);
    let mut stream = InputStream::from_slice(data);
    let inner = mtproto::ServerDhInnerData::deserialize(&mut stream)?;
    if sha1!(&data[..stream.pos()])[..] != hash[..] {
        return Err(Error::InvalidAnswerHash);
    }
    Ok(inner)
}

/// `1 < g < dh_prime - 1`, and both `g_a` and `g_b` at least 2^1984 away
/// from either end.
fn check_ranges(g: &BigUint, g_a: &BigUint, g_b: &BigUint, dh_prime: &BigUint) -> Result<(), Error> {
    let one = BigUint::from(1u32);
    if !(&one < g && g < &(dh_prime - &one)) {
        return Err(Error::ParameterOutOfRange { name: "g" });
    }
    for (name, value) in [("g_a", g_a), ("g_b", g_b)] {
        if !dh::is_safe_g_a_or_b(value, dh_prime) {
            return Err(Error::ParameterOutOfRange { name });
        }
    }
    Ok(())
}

/// Check the server's verdict on `set_client_DH_params` and build the key.
pub fn create_key(data: Step3, response: &[u8]) -> Result<Finished, Error> {
    let Step3 {
        nonces,
        gab,
        time_offset,
    } = data;

    use mtproto::SetClientDhParamsAnswer as Answer;
    let (nonce, server_nonce, hash, number) =
        match <mtproto::SetClientDhParams as RemoteCall>::Return::from_bytes(response)? {
            Answer::DhGenOk(x) => (x.nonce, x.server_nonce, x.new_nonce_hash1, 1),
            Answer::DhGenRetry(x) => (x.nonce, x.server_nonce, x.new_nonce_hash2, 2),
            Answer::DhGenFail(x) => (x.nonce, x.server_nonce, x.new_nonce_hash3, 3),
        };
    nonces.check(&nonce, &server_nonce)?;

    // `gab` may be shorter than the key.
    let mut key = [0; 256];
    let gab = gab.to_bytes_be();
    key[256 - gab.len()..].copy_from_slice(&gab);
    let auth_key = AuthKey::from_bytes(key);
    check_echo(
        Nonce::NewHash,
        &hash,
        &auth_key.calc_new_nonce_hash(&nonces.new, number),
    )?;

    match number {
        1 => {
            debug!("generated auth key {} with time offset {time_offset}", auth_key.id());
            Ok(Finished {
                auth_key: auth_key.to_bytes(),
                time_offset,
                first_salt: nonces.first_salt(),
            })
        }
        2 => Err(Error::DhGenRetry),
        _ => Err(Error::DhGenFail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn res_pq(nonce: [u8; 16], pq: Vec<u8>, fingerprints: Vec<i64>) -> Vec<u8> {
        mtproto::ResPq {
            nonce,
            server_nonce: [3; 16],
            pq,
            server_public_key_fingerprints: fingerprints,
        }
        .to_bytes()
    }

    const PQ: [u8; 8] = [0x17, 0xed, 0x48, 0x94, 0x1a, 0x08, 0xf9, 0x81];
    const FINGERPRINT: i64 = -5595554452916591101;

    #[test]
    fn factors_have_no_leading_zeros() {
        assert_eq!(minimal_be_bytes(0x494c553b), vec![0x49, 0x4c, 0x55, 0x3b]);
        assert_eq!(minimal_be_bytes(0x0100), vec![0x01, 0x00]);
        assert_eq!(minimal_be_bytes(0), Vec::<u8>::new());
    }

    #[test]
    fn bad_pq_answers_are_rejected() {
        let answer = res_pq([2; 16], PQ.to_vec(), vec![FINGERPRINT]);
        let (_, data) = request_pq([1; 16]);
        assert_eq!(
            request_dh_params(data, &answer, &[0; 256]).err(),
            Some(Error::NonceMismatch(Nonce::Client))
        );

        let answer = res_pq([1; 16], PQ.to_vec(), vec![1, 2]);
        let (_, data) = request_pq([1; 16]);
        assert_eq!(
            request_dh_params(data, &answer, &[0; 256]).err(),
            Some(Error::UnknownFingerprints {
                fingerprints: vec![1, 2]
            })
        );

        let answer = res_pq([1; 16], PQ[..2].to_vec(), vec![FINGERPRINT]);
        let (_, data) = request_pq([1; 16]);
        assert_eq!(
            request_dh_params(data, &answer, &[0; 256]).err(),
            Some(Error::InvalidPqLength { len: 2 })
        );
    }

    #[test]
    fn misaligned_answer_is_rejected() {
        for len in [0, 16, 33] {
            assert_eq!(
                decrypt_answer(vec![0; len], &[0; 32], &[0; 32]).err(),
                Some(Error::InvalidAnswerLength { len })
            );
        }
    }

    #[test]
    fn first_salt_mixes_nonces() {
        let nonces = Nonces {
            client: [0; 16],
            server: [0x0f; 16],
            new: [0xf0; 32],
        };
        assert_eq!(nonces.first_salt(), -1);
    }

    #[test]
    fn known_handshake_produces_known_key() -> Result<(), Error> {
        let step1_random: [u8; 16] = hex("4e44b426241e8b839153122d44585ac6")
            .try_into()
            .unwrap();
        let step1_request = hex("f18e7ebe4e44b426241e8b839153122d44585ac6");
        let step1_response = hex("632416054e44b426241e8b839153122d44585ac665ba0b393e1094329eda2c42d62833030819546f942a11278d00000015c4b51c0300000003268d20df9858b2029f4ba16d109296216be86c022bb4c3");
        let step2_random = hex("b9dce68b05ef760fa7edfefeff45aaa8afbac11dc3d333bc3132fd16ab816d63ed93c5bef9d0452add8164a2d5df5804277ee5a06fd4523372707ddbd8106d03766d76fb8bec672bdcddcd225f7766b83663b32a0fda1055175c5582edd10430937666be4fd15510ba5f19aa645973b6e4e9270efac25b58741635fe84dd0af07a4686f750bf34de1073f1e7fa24e9b01a76e537504bd52b8195e5b78c9af2baa982454e1a99eeae0f35944089ad12726d2433a2c18c9698a725364f9c4e939ce4f1aee3891e58b85de90c88cc2eaef5db1841a594c0edc13cb4b7480a7e564fe892f82282d03ed07eb5ceac6644247bb137241166fe194756dfcffd68c6c345").try_into().unwrap();
        let step2_request = hex("bee412d74e44b426241e8b839153122d44585ac665ba0b393e1094329eda2c42d62833030444b2e50d000000045e63ac8100000003268d20df9858b2fe0001007ec37ca8a84aa1b26d21bc8ac28b261ffa57b44e29f0d6722261e9b436059cc80ae9768a3ae4fbefe46cfbb76b88a1f80a1ebd95ae5d17bf655ed1015755e04c483a01cf4094a0830864054a71a0ac8a5ec34d6b24a69bf66c9654b32a8c65b0302718351b28f72a9a49610d5259b6edb6da37acc5fedc47d1a09c58df2c7eccbfaf54dfe123ebc253d9069f74e8be128051e5d280b3c9a5e8d3c6da344cb7374a6d410d4e088cc0eda3d8b1108ba4f4a85d79fbd2758000723780bc5459f59fd1cea1b511b77cc1411781d3feb57b14a97726cf3d2146cf43e648a69ff9cb5d48a31f543bd5bc3a023cf382d86d36bbfbbcb5e4a136acee25fd8e3e597e714d");
        let step2_response = hex("5c07e8d04e44b426241e8b839153122d44585ac665ba0b393e1094329eda2c42d6283303fe500200fd064e91012ade621b26a48ac7dc8b2c8670ed67092a00fe8c936483e4b02822c3cc655aaffe00542e311df5abdaa645b1da85ca50a6c7b0e7cc7cb2b23d42c84e288bb3b5cfe313e1ebafe19833916df4d1f58dba62e0ac49cac17a31b8b0d57d43eefda546d67e80e311c4b213adec9635c73f75a18ffb26fb71391523bd5ddfcc8be51b36d6b2552394c511ec935d53811a981baca62a2b58cbfe96f1b35e118e5e17456994aea931839925c4578f281f3f129d28026ec80224617a9ca8c615a12fba9c53e774476567f07b01a59d2e6635e39c16dc0a54679f3b54b0482f1cbeac821147d93d7365f4e23fb5794eb5fd4ffdc6456638ea32f641f49ee705e7b0da71cb75753e2f4f80d5af07edb017948f332e34a9c5886b0c86281e0e7228d5a652a9faaf819f7686c099186169aaa377c136fac57b69b7f7b383aaece652f8dcb14e0dfb23e2a65330307a74c31c508cc504450fa208eee14d8bbead1c1f90ccfc183ae1d3345c62424ea3477776204e8fe69efbb6a27b168913d3babaca30aa1c9589d6655b2ad4cd59f67e9b3957ab3270d70afab9bd488a6c5f39ca739ca8947def00cdb8812152731710f5108235775a019d3b4986d6b720b05167b4ee731a10a29fc1e03c42e99d8ff5cf64f45070c2f5ce485ea5fddc281728b6e4d0dea561c9097e3f8a54b055b0c069a9f8207520f6429eb5225c985e3379f2cf6754f56d414fcd00d502e69223b911b915978e0890a9ef128715b828bf3fda3fee6c7b9b2621d971a6f7820f89f4c4c2ab29dec00007c3ec6cead64f7f5802d5e6a4a16a185cfbfced5351fa68380e");
        let step3_random = hex("8fc3605a4604cbb5461fdeff439c761150083cdd502550558e92c730d46c9caf0b1b2d64d2c264942c50d98694fff604fdd2bd87f2cafb719bc55e65a1f60b08809660a650721c40d56fc9c792df1d463aad1718c6924b7bdffbe395f14633d33fc38ce47c18a1561b83a5c66d29f9e292637127471c3baab0028ae42796b689e53a7f9ab5f0ee6d3fb658d847c1abca509fc4ed0d45edbb1c946488910d8d78fa0767255b57a7c3898da8d26625bde40c5a0e80b581408ecd95a17d396dc7574a8ed3cbc4c085197ffaad29c18e577eb292aa8b98caa92efd6f9536049b5a7defc861e270eca90c55b9585405cb96f3e6ea754850b09e7a59ba5fd92d357982915d39752aaa2ec16b6cbde6a6c33971").try_into().unwrap();
        let step3_request = hex("1f5f04f54e44b426241e8b839153122d44585ac665ba0b393e1094329eda2c42d6283303fe500100def448d48c608480bab65df3f8990be8011f7b415a6f8113617bea749b8b0ea6a937987b18cc4dcce8197efdcf8d6ec6af7fc3364b4945df77e4a1ae9db7acea4abcd73247edb36bde20fc969c1d55717277afe0bc31a9ee99f7d822f91fa2dc69c868a19511b162d55e0814d0292b7708b67d57eb04569349d5a20ffe85c0141fc17e9bbbaf207bef56e66decda718c52c45273f868c2eff89bb06355cd515fbfe123d719b244234867d2889c9d0e4436ba644076e5014a78af60b2f0e1b30285f4f71539bcf8c506ccafd62cfcd1b040fe5e35bb30e519ad56d753100f604e3ea5d02409d74dd3ab0861227410f1e13591cf2a638347e6c6d0bcae14e0e8753313b51daee40a67407b5cc8b213856a290a0c7b6cda9ff9c58d69faaf6a748cff05512b69f1380f7a36843edecdc764048bc16d9808f353a9caf6d49ca8b717c8f6de037518a444931a7da2b80f16d0");
        let step3_response = hex("34f7cb3b4e44b426241e8b839153122d44585ac665ba0b393e1094329eda2c42d628330313b781a0de4ab6bc7ab414cbe13f9f86");
        let expected_auth_key = hex("7582e48ad36cd6eef7944ac9bd7027de9ee3202543b68850ac01e1221350f7174e6c3771c9d86b3075f777539c23d053e9da9a1510d49e8fa0ad76a016ce28bfe3543dde69959bc682dab762b95a36629a8438e65baa53cc79b551c23d555c7675a36f4ece90882ece497d28a903409b780a8a80516cb0f8534fee3a67530beb2b1929626e07c2a052c4870b18b0a626606ca05cb13668a65aee3fa32cbebf1b3a56532138cb22c017cac44a292021902eea9b9f906c6be19c9203c7bb3ebc5f1b2044d0a90cb008f7248c3ae4449e0895b6090abb04c24131c2948bd27d879ecb934e50a46671f987653385ab388e4fa1ddd4c95743111e08bf11fef1f8f739").try_into().unwrap();
        let (request, data) = request_pq(step1_random);
        assert_eq!(request, step1_request);

        let (request, data) = request_dh_params(data, &step1_response, &step2_random)?;
        assert_eq!(request, step2_request);

        let (request, data) = set_client_dh_params(data, &step2_response, &step3_random, 1693436740)?;
        assert_eq!(request, step3_request);

        assert_eq!(
            create_key(data, &step3_response)?,
            Finished {
                auth_key: expected_auth_key,
                time_offset: 0,
                first_salt: 4459407212920268508,
            }
        );
        Ok(())
    }
}
