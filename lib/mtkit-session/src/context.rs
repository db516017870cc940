// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use crate::{
    DatacenterAddressSet, DatacenterAuthInfo, DatacenterSaltInfo, Keychain, MemoryKeychain,
};
use mtkit_tl_types::deserialize::{Buffer, Result as DeserializeResult};
use mtkit_tl_types::{Deserializable, Serializable};
use std::collections::HashMap;
use std::fmt;
use std::sync::Weak;
use tokio::sync::{mpsc, oneshot};

const ADDRESS_SETS_KEY: &str = "address_sets";
const AUTH_INFOS_KEY: &str = "auth_infos";
const AUTH_TOKENS_KEY: &str = "auth_tokens";
const TIME_DIFFERENCE_KEY: &str = "global_time_difference";

/// A single modification applied to the [`Context`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextChange {
    AddressSetUpdated { dc_id: i32 },
    /// Someone needs the addresses of a datacenter that are not known yet.
    AddressSetRequired { dc_id: i32 },
    AuthInfoUpdated { dc_id: i32 },
    AuthInfoRemoved { dc_id: i32 },
    AuthTokenUpdated { dc_id: i32 },
    GlobalTimeDifferenceChanged { seconds: i32 },
}

/// Observer of [`Context`] modifications.
///
/// Listeners run on the context task, so they should only hand the changes
/// off (for example, through a channel) and return quickly.
pub trait ChangeListener: Send + Sync {
    fn context_changed(&self, changes: &[ContextChange]);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The context task is no longer running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dropped;

impl std::error::Error for Dropped {}

impl fmt::Display for Dropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context is no longer running")
    }
}

type BatchFn = Box<dyn FnOnce(&mut ContextBatch<'_>) + Send>;

enum Request {
    AddressSet {
        dc_id: i32,
        required: bool,
        tx: oneshot::Sender<Option<DatacenterAddressSet>>,
    },
    AuthInfo {
        dc_id: i32,
        tx: oneshot::Sender<Option<DatacenterAuthInfo>>,
    },
    AuthToken {
        dc_id: i32,
        tx: oneshot::Sender<Option<Vec<u8>>>,
    },
    GlobalTimeDifference {
        tx: oneshot::Sender<i32>,
    },
    Batch {
        f: BatchFn,
        tx: oneshot::Sender<()>,
    },
    AddListener {
        listener: Weak<dyn ChangeListener>,
        tx: oneshot::Sender<ListenerId>,
    },
    RemoveListener {
        id: ListenerId,
    },
    Quit,
}

#[derive(Default)]
struct ContextState {
    address_sets: HashMap<i32, DatacenterAddressSet>,
    auth_infos: HashMap<i32, DatacenterAuthInfo>,
    auth_tokens: HashMap<i32, Vec<u8>>,
    global_time_difference: i32,
}

/// A set of mutations applied to the context at once.
///
/// Obtained through [`ContextHandle::perform_batch_updates`]. Listeners see
/// every change made to the batch in a single notification, after all of
/// them have been applied and persisted.
pub struct ContextBatch<'a> {
    state: &'a mut ContextState,
    changes: Vec<ContextChange>,
}

impl ContextBatch<'_> {
    pub fn address_set(&self, dc_id: i32) -> Option<&DatacenterAddressSet> {
        self.state.address_sets.get(&dc_id)
    }

    pub fn update_address_set(&mut self, dc_id: i32, set: DatacenterAddressSet) {
        if self.state.address_sets.get(&dc_id) != Some(&set) {
            self.state.address_sets.insert(dc_id, set);
            self.changes.push(ContextChange::AddressSetUpdated { dc_id });
        }
    }

    pub fn auth_info(&self, dc_id: i32) -> Option<&DatacenterAuthInfo> {
        self.state.auth_infos.get(&dc_id)
    }

    pub fn update_auth_info(&mut self, dc_id: i32, info: DatacenterAuthInfo) {
        self.state.auth_infos.insert(dc_id, info);
        self.changes.push(ContextChange::AuthInfoUpdated { dc_id });
    }

    pub fn remove_auth_info(&mut self, dc_id: i32) {
        if self.state.auth_infos.remove(&dc_id).is_some() {
            self.changes.push(ContextChange::AuthInfoRemoved { dc_id });
        }
    }

    /// Merge salts into the known auth info of a datacenter, if any.
    pub fn merge_salts(&mut self, dc_id: i32, salts: Vec<DatacenterSaltInfo>) {
        if let Some(info) = self.state.auth_infos.get_mut(&dc_id) {
            info.merge_salts(salts);
            self.changes.push(ContextChange::AuthInfoUpdated { dc_id });
        }
    }

    /// Forget a salt of a datacenter that the server no longer accepts.
    pub fn remove_salt(&mut self, dc_id: i32, salt: i64) {
        if let Some(info) = self.state.auth_infos.get_mut(&dc_id) {
            let before = info.salts().len();
            info.remove_salt(salt);
            if info.salts().len() != before {
                self.changes.push(ContextChange::AuthInfoUpdated { dc_id });
            }
        }
    }

    /// Forget the salts of a datacenter that expire before `message_id`.
    pub fn prune_salts(&mut self, dc_id: i32, message_id: i64) {
        if let Some(info) = self.state.auth_infos.get_mut(&dc_id) {
            let before = info.salts().len();
            info.prune_salts(message_id);
            if info.salts().len() != before {
                self.changes.push(ContextChange::AuthInfoUpdated { dc_id });
            }
        }
    }

    pub fn auth_token(&self, dc_id: i32) -> Option<&Vec<u8>> {
        self.state.auth_tokens.get(&dc_id)
    }

    pub fn update_auth_token(&mut self, dc_id: i32, token: Option<Vec<u8>>) {
        let changed = match token {
            Some(token) => self.state.auth_tokens.insert(dc_id, token.clone()) != Some(token),
            None => self.state.auth_tokens.remove(&dc_id).is_some(),
        };
        if changed {
            self.changes.push(ContextChange::AuthTokenUpdated { dc_id });
        }
    }

    pub fn global_time_difference(&self) -> i32 {
        self.state.global_time_difference
    }

    pub fn set_global_time_difference(&mut self, seconds: i32) {
        if self.state.global_time_difference != seconds {
            self.state.global_time_difference = seconds;
            self.changes
                .push(ContextChange::GlobalTimeDifferenceChanged { seconds });
        }
    }

    /// Forget every authorization. Addresses are kept.
    pub fn clear(&mut self) {
        let mut dc_ids = self.state.auth_infos.keys().copied().collect::<Vec<_>>();
        dc_ids.sort();
        for dc_id in dc_ids {
            self.remove_auth_info(dc_id);
        }

        let mut dc_ids = self.state.auth_tokens.keys().copied().collect::<Vec<_>>();
        dc_ids.sort();
        for dc_id in dc_ids {
            self.update_auth_token(dc_id, None);
        }
    }
}

/// Cloneable handle through which the [`ContextRunner`] is driven.
#[derive(Clone)]
pub struct ContextHandle(mpsc::UnboundedSender<Request>);

/// The per-client registry of datacenters.
///
/// The registry is owned by [`ContextRunner`], which should be spawned as a
/// task. Every operation is a message sent through [`ContextHandle`].
pub struct Context {
    pub runner: ContextRunner,
    pub handle: ContextHandle,
}

pub struct ContextRunner {
    state: ContextState,
    keychain: Box<dyn Keychain>,
    listeners: Vec<(ListenerId, Weak<dyn ChangeListener>)>,
    next_listener_id: u64,
    request_rx: mpsc::UnboundedReceiver<Request>,
}

pub struct ContextBuilder {
    keychain: Option<Box<dyn Keychain>>,
    test_mode: bool,
    known_addresses: bool,
    address_sets: Vec<(i32, DatacenterAddressSet)>,
}

impl ContextHandle {
    async fn call<T>(&self, request: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T, Dropped> {
        let (tx, rx) = oneshot::channel();
        self.0.send(request(tx)).map_err(|_| Dropped)?;
        rx.await.map_err(|_| Dropped)
    }

    pub async fn address_set(&self, dc_id: i32) -> Result<Option<DatacenterAddressSet>, Dropped> {
        self.call(|tx| Request::AddressSet {
            dc_id,
            required: false,
            tx,
        })
        .await
    }

    /// Like [`ContextHandle::address_set`], but when the set is unknown,
    /// listeners are told with [`ContextChange::AddressSetRequired`] so
    /// that someone can go and fetch it.
    pub async fn address_set_required(
        &self,
        dc_id: i32,
    ) -> Result<Option<DatacenterAddressSet>, Dropped> {
        self.call(|tx| Request::AddressSet {
            dc_id,
            required: true,
            tx,
        })
        .await
    }

    pub async fn update_address_set(
        &self,
        dc_id: i32,
        set: DatacenterAddressSet,
    ) -> Result<(), Dropped> {
        self.perform_batch_updates(move |batch| batch.update_address_set(dc_id, set))
            .await
    }

    pub async fn auth_info(&self, dc_id: i32) -> Result<Option<DatacenterAuthInfo>, Dropped> {
        self.call(|tx| Request::AuthInfo { dc_id, tx }).await
    }

    pub async fn update_auth_info(
        &self,
        dc_id: i32,
        info: DatacenterAuthInfo,
    ) -> Result<(), Dropped> {
        self.perform_batch_updates(move |batch| batch.update_auth_info(dc_id, info))
            .await
    }

    pub async fn remove_auth_info(&self, dc_id: i32) -> Result<(), Dropped> {
        self.perform_batch_updates(move |batch| batch.remove_auth_info(dc_id))
            .await
    }

    pub async fn auth_token(&self, dc_id: i32) -> Result<Option<Vec<u8>>, Dropped> {
        self.call(|tx| Request::AuthToken { dc_id, tx }).await
    }

    pub async fn update_auth_token(
        &self,
        dc_id: i32,
        token: Option<Vec<u8>>,
    ) -> Result<(), Dropped> {
        self.perform_batch_updates(move |batch| batch.update_auth_token(dc_id, token))
            .await
    }

    /// Seconds to add to the local clock to obtain the server's time.
    pub async fn global_time_difference(&self) -> Result<i32, Dropped> {
        self.call(|tx| Request::GlobalTimeDifference { tx }).await
    }

    pub async fn set_global_time_difference(&self, seconds: i32) -> Result<(), Dropped> {
        self.perform_batch_updates(move |batch| batch.set_global_time_difference(seconds))
            .await
    }

    /// Log out of every datacenter.
    pub async fn clear(&self) -> Result<(), Dropped> {
        self.perform_batch_updates(|batch| batch.clear()).await
    }

    /// Apply several mutations at once, publishing a single notification.
    ///
    /// The closure runs on the context task.
    pub async fn perform_batch_updates<F>(&self, f: F) -> Result<(), Dropped>
    where
        F: FnOnce(&mut ContextBatch<'_>) + Send + 'static,
    {
        self.call(|tx| Request::Batch {
            f: Box::new(f),
            tx,
        })
        .await
    }

    /// Register a listener. It will be removed automatically once dropped.
    pub async fn add_change_listener(
        &self,
        listener: Weak<dyn ChangeListener>,
    ) -> Result<ListenerId, Dropped> {
        self.call(|tx| Request::AddListener { listener, tx }).await
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.0.send(Request::RemoveListener { id }).is_ok()
    }

    pub fn quit(&self) -> bool {
        self.0.send(Request::Quit).is_ok()
    }
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder {
            keychain: None,
            test_mode: false,
            known_addresses: true,
            address_sets: Vec::new(),
        }
    }
}

impl ContextBuilder {
    /// Where to persist the context. Defaults to a [`MemoryKeychain`].
    pub fn keychain<K: Keychain + 'static>(mut self, keychain: K) -> Self {
        self.keychain = Some(Box::new(keychain));
        self
    }

    /// Use the addresses of the test servers instead of the production ones.
    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Whether to seed the context with the built-in datacenter addresses.
    pub fn known_addresses(mut self, known_addresses: bool) -> Self {
        self.known_addresses = known_addresses;
        self
    }

    /// Start with the given addresses for a datacenter, overriding both
    /// the built-in and the persisted ones.
    pub fn address_set(mut self, dc_id: i32, set: DatacenterAddressSet) -> Self {
        self.address_sets.push((dc_id, set));
        self
    }

    pub fn build(self) -> Context {
        let keychain = self
            .keychain
            .unwrap_or_else(|| Box::new(MemoryKeychain::new()));

        let mut state = ContextState::default();
        if self.known_addresses {
            state
                .address_sets
                .extend(DatacenterAddressSet::known_all(self.test_mode));
        }
        state.load(keychain.as_ref());
        state.address_sets.extend(self.address_sets);

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        Context {
            runner: ContextRunner {
                state,
                keychain,
                listeners: Vec::new(),
                next_listener_id: 0,
                request_rx,
            },
            handle: ContextHandle(request_tx),
        }
    }
}

impl ContextRunner {
    /// Run the context until [`ContextHandle::quit`] is called or every
    /// handle is dropped.
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            match request {
                Request::AddressSet {
                    dc_id,
                    required,
                    tx,
                } => {
                    let set = self.state.address_sets.get(&dc_id).cloned();
                    let missing = set.is_none();
                    let _ = tx.send(set);
                    if missing && required {
                        log::info!("address set of dc {} required", dc_id);
                        self.notify(&[ContextChange::AddressSetRequired { dc_id }]);
                    }
                }
                Request::AuthInfo { dc_id, tx } => {
                    let _ = tx.send(self.state.auth_infos.get(&dc_id).cloned());
                }
                Request::AuthToken { dc_id, tx } => {
                    let _ = tx.send(self.state.auth_tokens.get(&dc_id).cloned());
                }
                Request::GlobalTimeDifference { tx } => {
                    let _ = tx.send(self.state.global_time_difference);
                }
                Request::Batch { f, tx } => {
                    let mut batch = ContextBatch {
                        state: &mut self.state,
                        changes: Vec::new(),
                    };
                    f(&mut batch);
                    let changes = batch.changes;
                    if !changes.is_empty() {
                        self.persist(&changes);
                        self.notify(&changes);
                    }
                    let _ = tx.send(());
                }
                Request::AddListener { listener, tx } => {
                    let id = ListenerId(self.next_listener_id);
                    self.next_listener_id += 1;
                    self.listeners.push((id, listener));
                    let _ = tx.send(id);
                }
                Request::RemoveListener { id } => {
                    self.listeners.retain(|(listener_id, _)| *listener_id != id);
                }
                Request::Quit => break,
            }
        }
    }

    fn persist(&mut self, changes: &[ContextChange]) {
        let mut addresses = false;
        let mut auth_infos = false;
        let mut auth_tokens = false;
        let mut time_difference = false;
        for change in changes {
            match change {
                ContextChange::AddressSetUpdated { .. } => addresses = true,
                ContextChange::AuthInfoUpdated { .. } | ContextChange::AuthInfoRemoved { .. } => {
                    auth_infos = true
                }
                ContextChange::AuthTokenUpdated { .. } => auth_tokens = true,
                ContextChange::GlobalTimeDifferenceChanged { .. } => time_difference = true,
                ContextChange::AddressSetRequired { .. } => {}
            }
        }

        let mut writes = Vec::new();
        if addresses {
            writes.push((ADDRESS_SETS_KEY, entries(&self.state.address_sets).to_bytes()));
        }
        if auth_infos {
            writes.push((AUTH_INFOS_KEY, entries(&self.state.auth_infos).to_bytes()));
        }
        if auth_tokens {
            writes.push((AUTH_TOKENS_KEY, entries(&self.state.auth_tokens).to_bytes()));
        }
        if time_difference {
            writes.push((
                TIME_DIFFERENCE_KEY,
                self.state.global_time_difference.to_bytes(),
            ));
        }

        for (name, value) in writes {
            if let Err(e) = self.keychain.set(name, value) {
                log::warn!("failed to persist {}: {}", name, e);
            }
        }
    }

    fn notify(&mut self, changes: &[ContextChange]) {
        self.listeners.retain(|(_, listener)| match listener.upgrade() {
            Some(listener) => {
                listener.context_changed(changes);
                true
            }
            None => false,
        });
    }
}

impl ContextState {
    fn load(&mut self, keychain: &dyn Keychain) {
        fn read<T: Deserializable>(keychain: &dyn Keychain, name: &str) -> Option<T> {
            let value = keychain.get(name)?;
            match T::from_bytes(&value) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::warn!("ignoring unreadable {}: {}", name, e);
                    None
                }
            }
        }

        if let Some(sets) = read::<Vec<Entry<DatacenterAddressSet>>>(keychain, ADDRESS_SETS_KEY) {
            self.address_sets
                .extend(sets.into_iter().map(|e| (e.dc_id, e.value)));
        }
        if let Some(infos) = read::<Vec<Entry<DatacenterAuthInfo>>>(keychain, AUTH_INFOS_KEY) {
            self.auth_infos
                .extend(infos.into_iter().map(|e| (e.dc_id, e.value)));
        }
        if let Some(tokens) = read::<Vec<Entry<Vec<u8>>>>(keychain, AUTH_TOKENS_KEY) {
            self.auth_tokens
                .extend(tokens.into_iter().map(|e| (e.dc_id, e.value)));
        }
        if let Some(seconds) = read::<i32>(keychain, TIME_DIFFERENCE_KEY) {
            self.global_time_difference = seconds;
        }
    }
}

/// A persisted value belonging to a datacenter.
struct Entry<T> {
    dc_id: i32,
    value: T,
}

fn entries<T: Clone>(map: &HashMap<i32, T>) -> Vec<Entry<T>> {
    let mut entries = map
        .iter()
        .map(|(dc_id, value)| Entry {
            dc_id: *dc_id,
            value: value.clone(),
        })
        .collect::<Vec<_>>();
    entries.sort_by_key(|e| e.dc_id);
    entries
}

impl<T: Serializable> Serializable for Entry<T> {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.dc_id.serialize(buf);
        self.value.serialize(buf);
    }
}

impl<T: Deserializable> Deserializable for Entry<T> {
    fn deserialize(buf: Buffer) -> DeserializeResult<Self> {
        Ok(Self {
            dc_id: i32::deserialize(buf)?,
            value: T::deserialize(buf)?,
        })
    }
}
