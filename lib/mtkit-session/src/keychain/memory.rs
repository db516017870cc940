// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{Keychain, KeychainError};
use std::collections::HashMap;

/// A keychain that forgets everything once dropped.
#[derive(Clone, Debug, Default)]
pub struct MemoryKeychain {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keychain for MemoryKeychain {
    fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Vec<u8>) -> Result<(), KeychainError> {
        self.entries.insert(name.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), KeychainError> {
        self.entries.remove(name);
        Ok(())
    }
}
