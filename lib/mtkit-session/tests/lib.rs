// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtkit_crypto::AuthKey;
use mtkit_session::{
    Context, DatacenterAddress, DatacenterAddressSet, DatacenterAuthInfo, DatacenterSaltInfo,
    FileKeychain, Keychain, KeychainError, MemoryKeychain, message_id_for_timestamp,
};
use std::sync::{Arc, Mutex};

/// A keychain that can be inspected after being handed to the context.
#[derive(Clone, Default)]
struct SharedKeychain(Arc<Mutex<MemoryKeychain>>);

impl Keychain for SharedKeychain {
    fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(name)
    }

    fn set(&mut self, name: &str, value: Vec<u8>) -> Result<(), KeychainError> {
        self.0.lock().unwrap().set(name, value)
    }

    fn remove(&mut self, name: &str) -> Result<(), KeychainError> {
        self.0.lock().unwrap().remove(name)
    }
}

fn salt(salt: i64, from: i64, until: i64) -> DatacenterSaltInfo {
    DatacenterSaltInfo {
        salt,
        first_valid_message_id: message_id_for_timestamp(from),
        last_valid_message_id: message_id_for_timestamp(until),
    }
}

#[tokio::test]
async fn context_is_restored_from_keychain() {
    let keychain = SharedKeychain::default();
    let auth_info = DatacenterAuthInfo::new(AuthKey::from_bytes([7; 256]), vec![salt(1, 0, 10)]);
    let address_set = DatacenterAddressSet::new(vec![DatacenterAddress::new("10.1.1.1", 8888)]);

    let context = Context::builder().keychain(keychain.clone()).build();
    let handle = context.handle.clone();
    tokio::spawn(context.runner.run());
    handle.update_auth_info(3, auth_info.clone()).await.unwrap();
    handle.update_address_set(3, address_set.clone()).await.unwrap();
    handle.update_auth_token(3, Some(vec![1, 2, 3])).await.unwrap();
    handle.set_global_time_difference(42).await.unwrap();
    handle.quit();

    let context = Context::builder().keychain(keychain).build();
    let handle = context.handle.clone();
    tokio::spawn(context.runner.run());
    assert_eq!(handle.auth_info(3).await.unwrap(), Some(auth_info));
    assert_eq!(handle.address_set(3).await.unwrap(), Some(address_set));
    assert_eq!(handle.auth_token(3).await.unwrap(), Some(vec![1, 2, 3]));
    assert_eq!(handle.global_time_difference().await.unwrap(), 42);
}

#[tokio::test]
async fn salts_merged_through_batch() {
    let context = Context::builder().build();
    let handle = context.handle.clone();
    tokio::spawn(context.runner.run());

    handle
        .update_auth_info(
            1,
            DatacenterAuthInfo::new(AuthKey::from_bytes([1; 256]), vec![salt(10, 0, 100)]),
        )
        .await
        .unwrap();
    handle
        .perform_batch_updates(|batch| batch.merge_salts(1, vec![salt(20, 100, 200)]))
        .await
        .unwrap();

    let info = handle.auth_info(1).await.unwrap().unwrap();
    assert_eq!(info.salt_for_timestamp(99), Some(10));
    assert_eq!(info.salt_for_timestamp(101), Some(20));
}

#[tokio::test]
async fn file_keychain_backs_context() {
    let path = std::env::temp_dir().join(format!("mtkit-context-{}", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let context = Context::builder()
        .keychain(FileKeychain::open(&path).unwrap())
        .build();
    let handle = context.handle.clone();
    tokio::spawn(context.runner.run());
    handle
        .update_auth_info(2, DatacenterAuthInfo::new(AuthKey::from_bytes([2; 256]), vec![]))
        .await
        .unwrap();

    let context = Context::builder()
        .keychain(FileKeychain::open(&path).unwrap())
        .build();
    let handle = context.handle.clone();
    tokio::spawn(context.runner.run());
    let info = handle.auth_info(2).await.unwrap().unwrap();
    assert_eq!(info.auth_key(), &AuthKey::from_bytes([2; 256]));

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn explicit_address_overrides_known() {
    let set = DatacenterAddressSet::new(vec![DatacenterAddress::new("127.0.0.1", 1)]);
    let context = Context::builder().address_set(2, set.clone()).build();
    let handle = context.handle.clone();
    tokio::spawn(context.runner.run());

    assert_eq!(handle.address_set(2).await.unwrap(), Some(set));
}
