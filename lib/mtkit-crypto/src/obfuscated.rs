// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::aes::AesCtr;

/// The pair of AES-256-CTR streams that hide the transport from passive
/// observers.
///
/// Both directions are keyed from the same 64-byte init packet: outgoing
/// data uses it as-is, incoming data uses it reversed. The transport in
/// `mtkit-mtproto` is the one expected to drive this.
pub struct ObfuscatedCipher {
    rx: AesCtr,
    tx: AesCtr,
}

fn split_key_iv(init: &[u8; 64]) -> ([u8; 32], [u8; 16]) {
    let mut key = [0; 32];
    let mut iv = [0; 16];
    key.copy_from_slice(&init[8..40]);
    iv.copy_from_slice(&init[40..56]);
    (key, iv)
}

impl ObfuscatedCipher {
    pub fn new(init: &[u8; 64]) -> Self {
        let mut reversed = *init;
        reversed.reverse();

        let (tx_key, tx_iv) = split_key_iv(init);
        let (rx_key, rx_iv) = split_key_iv(&reversed);
        Self {
            rx: AesCtr::new(&rx_key, &rx_iv),
            tx: AesCtr::new(&tx_key, &tx_iv),
        }
    }

    pub fn encrypt(&mut self, buffer: &mut [u8]) {
        self.tx.apply(buffer);
    }

    pub fn decrypt(&mut self, buffer: &mut [u8]) {
        self.rx.apply(buffer);
    }
}
