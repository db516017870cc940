// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The engine behind every connection to a datacenter.
//!
//! [`MtProtoRunner`] owns the session and the transport, generates the
//! authorization key when there is none, and shuttles messages between the
//! network and the registered [`MessageService`]s.
use crate::configuration::ApiEnvironment;
use crate::errors::{InvocationError, ReadError};
use crate::reconnection::{AlwaysReconnect, ReconnectionPolicy};
use crate::service::{MessageService, ServiceContext, ServiceId};
use crate::transport::{Transport, TransactionId, TransportEvent, TransportHandle, TransportState};
use crate::utils::{generate_random_id, unix_now};
use log::{debug, info, trace, warn};
use mtkit_crypto::{AuthKey, DequeBuffer};
use mtkit_mtproto::mtp::{
    BadMessage, Deserialization, DeserializeError, Encrypted, Plain, PushError,
};
use mtkit_mtproto::{MsgId, SessionInfo, authentication, transport};
use mtkit_session::{
    ChangeListener, ContextBatch, ContextChange, ContextHandle, DatacenterAuthInfo,
    DatacenterSaltInfo, ListenerId, message_id_for_timestamp,
};
use mtkit_tl_types::mtproto::{MsgsStateInfo, PingDelayDisconnect};
use mtkit_tl_types::{Serializable, Serialization};
use std::collections::{BTreeMap, HashMap};
use std::future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

/// Every how often are pings sent?
const PING_DELAY: Duration = Duration::from_secs(60);

/// After how many seconds should the server close the connection when we send a ping?
///
/// What this value essentially means is that we have `NO_PING_DISCONNECT - PING_DELAY` seconds
/// to keep sending pings, or the server will close the connection.
const NO_PING_DISCONNECT: i32 = 75;

/// How many containers to remember, to make sense of notifications about them.
const MAX_REMEMBERED_CONTAINERS: usize = 256;

/// Server messages older than this (in seconds) are forgotten.
const MAX_SERVER_MSG_AGE: i64 = 300;

/// Server messages further in the future than this (in seconds) are invalid.
const MAX_SERVER_MSG_DRIFT: i64 = 30;

// https://core.telegram.org/mtproto/service_messages_about_messages#request-for-message-status-information
const STATE_TOO_OLD: u8 = 1;
const STATE_UNKNOWN: u8 = 2;
const STATE_TOO_NEW: u8 = 3;
const STATE_RECEIVED: u8 = 4;

/// Notifications about the engine, delivered on its task.
pub trait MtProtoDelegate: Send + Sync {
    fn connection_state_changed(&self, _state: TransportState) {}

    /// `false` while the datacenter cannot be reached.
    fn network_availability_changed(&self, _available: bool) {}

    /// `true` while the engine is busy with its own business (such as
    /// generating an authorization key) rather than the services'.
    fn performing_service_tasks(&self, _performing: bool) {}

    /// How many bytes of an incoming packet have been read so far.
    fn download_progress(&self, _buffered: usize) {}
}

enum Command {
    Pause,
    Resume,
    Stop,
    AddService {
        service: Box<dyn MessageService>,
        tx: oneshot::Sender<ServiceId>,
    },
    RemoveService(ServiceId),
    Wake,
    ResetSession,
    TimeResync,
}

/// Cloneable handle through which the [`MtProtoRunner`] is driven.
#[derive(Clone)]
pub struct MtProtoHandle(mpsc::UnboundedSender<Command>);

pub struct MtProto {
    pub runner: MtProtoRunner,
    pub handle: MtProtoHandle,
}

pub struct MtProtoBuilder {
    context: ContextHandle,
    dc_id: i32,
    media: bool,
    environment: ApiEnvironment,
    serialization: Option<Arc<dyn Serialization>>,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    delegate: Option<Arc<dyn MtProtoDelegate>>,
}

enum HandshakeStep {
    Step1(authentication::Step1),
    Step2(authentication::Step2),
    Step3(authentication::Step3),
}

struct Handshake {
    step: HandshakeStep,
    /// The request of the current step, until it is handed to the transport.
    request: Option<Vec<u8>>,
}

enum HandshakeProgress {
    Continue(Vec<u8>, HandshakeStep),
    Finished(authentication::Finished),
}

/// Forwards changes to the auth info of one datacenter to its engine, so
/// that keys and salts written by other engines are picked up.
struct AuthInfoObserver {
    dc_id: i32,
    tx: mpsc::UnboundedSender<ContextChange>,
}

impl ChangeListener for AuthInfoObserver {
    fn context_changed(&self, changes: &[ContextChange]) {
        for change in changes {
            match change {
                ContextChange::AuthInfoUpdated { dc_id }
                | ContextChange::AuthInfoRemoved { dc_id }
                    if *dc_id == self.dc_id =>
                {
                    let _ = self.tx.send(change.clone());
                }
                _ => {}
            }
        }
    }
}

/// Whether the context still holds the key with `key_id` for `dc_id`.
fn holds_key(batch: &ContextBatch<'_>, dc_id: i32, key_id: i64) -> bool {
    batch
        .auth_info(dc_id)
        .is_some_and(|info| info.auth_key().id() == key_id)
}

struct ActiveTransport {
    handle: TransportHandle,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

pub struct MtProtoRunner {
    dc_id: i32,
    media: bool,
    context: ContextHandle,
    environment: ApiEnvironment,
    serialization: Option<Arc<dyn Serialization>>,
    reconnection_policy: Arc<dyn ReconnectionPolicy>,
    delegate: Option<Arc<dyn MtProtoDelegate>>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    /// Kept alive for as long as the engine runs; the context only holds a
    /// weak reference.
    observer: Arc<dyn ChangeListener>,
    observer_id: Option<ListenerId>,
    context_changes: mpsc::UnboundedReceiver<ContextChange>,

    transport: Option<ActiveTransport>,
    transport_state: TransportState,
    network_available: Option<bool>,
    transaction_requested: bool,
    connection_validated: bool,

    session: SessionInfo,
    plain: Plain,
    mtp: Option<Encrypted>,
    auth_info: Option<DatacenterAuthInfo>,
    handshake: Option<Handshake>,
    performing_service_tasks: bool,

    services: Vec<(ServiceId, Box<dyn MessageService>)>,
    next_service_id: u64,

    /// Service messages of the engine itself, waiting to be sent.
    internal: Vec<Vec<u8>>,
    ping_due: bool,
    next_ping: Instant,
    initial_request_sent: bool,
    paused: bool,
    /// Whether the services were already told that no salt is valid.
    salt_expired: bool,

    next_transaction_id: u64,
    transactions: HashMap<TransactionId, Vec<MsgId>>,
    containers: BTreeMap<MsgId, Vec<MsgId>>,
    quick_acks: HashMap<u32, Vec<MsgId>>,
}

impl MtProtoHandle {
    /// Disconnect until [`MtProtoHandle::resume`] is called. Services keep
    /// their state.
    pub fn pause(&self) -> bool {
        self.0.send(Command::Pause).is_ok()
    }

    pub fn resume(&self) -> bool {
        self.0.send(Command::Resume).is_ok()
    }

    /// Stop the engine. Every service is detached.
    pub fn stop(&self) -> bool {
        self.0.send(Command::Stop).is_ok()
    }

    /// Register a service. It is polled after every service registered before.
    pub async fn add_message_service(
        &self,
        service: Box<dyn MessageService>,
    ) -> Result<ServiceId, InvocationError> {
        let (tx, rx) = oneshot::channel();
        self.0
            .send(Command::AddService { service, tx })
            .map_err(|_| InvocationError::Dropped)?;
        rx.await.map_err(|_| InvocationError::Dropped)
    }

    pub fn remove_message_service(&self, id: ServiceId) -> bool {
        self.0.send(Command::RemoveService(id)).is_ok()
    }

    /// Let the services process their commands, and send whatever they have
    /// pending as soon as the transport allows it.
    pub fn request_transport_transaction(&self) -> bool {
        self.0.send(Command::Wake).is_ok()
    }

    /// Drop the current session and start a new one.
    pub fn reset_session_info(&self) -> bool {
        self.0.send(Command::ResetSession).is_ok()
    }

    /// Ask the services to synchronize the clock with the server again.
    pub fn request_time_resync(&self) -> bool {
        self.0.send(Command::TimeResync).is_ok()
    }
}

impl MtProto {
    pub fn builder(context: ContextHandle, dc_id: i32) -> MtProtoBuilder {
        MtProtoBuilder {
            context,
            dc_id,
            media: false,
            environment: ApiEnvironment::default(),
            serialization: None,
            reconnection_policy: Arc::new(AlwaysReconnect),
            delegate: None,
        }
    }
}

impl MtProtoBuilder {
    /// Prefer the addresses meant for media.
    pub fn media(mut self, media: bool) -> Self {
        self.media = media;
        self
    }

    pub fn environment(mut self, environment: ApiEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// The schema used to wrap the first request of every connection.
    ///
    /// Without it, requests are sent as-is.
    pub fn serialization(mut self, serialization: Arc<dyn Serialization>) -> Self {
        self.serialization = Some(serialization);
        self
    }

    pub fn reconnection_policy(mut self, policy: Arc<dyn ReconnectionPolicy>) -> Self {
        self.reconnection_policy = policy;
        self
    }

    pub fn delegate(mut self, delegate: Arc<dyn MtProtoDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn build(self) -> MtProto {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (changes_tx, context_changes) = mpsc::unbounded_channel();
        let observer = Arc::new(AuthInfoObserver {
            dc_id: self.dc_id,
            tx: changes_tx,
        });
        MtProto {
            runner: MtProtoRunner {
                dc_id: self.dc_id,
                media: self.media,
                context: self.context,
                environment: self.environment,
                serialization: self.serialization,
                reconnection_policy: self.reconnection_policy,
                delegate: self.delegate,
                command_rx,
                observer,
                observer_id: None,
                context_changes,
                transport: None,
                transport_state: TransportState::Disconnected,
                network_available: None,
                transaction_requested: false,
                connection_validated: false,
                session: SessionInfo::new(0),
                plain: Plain::new(),
                mtp: None,
                auth_info: None,
                handshake: None,
                performing_service_tasks: false,
                services: Vec::new(),
                next_service_id: 0,
                internal: Vec::new(),
                ping_due: false,
                next_ping: Instant::now() + PING_DELAY,
                initial_request_sent: false,
                paused: false,
                salt_expired: false,
                next_transaction_id: 0,
                transactions: HashMap::new(),
                containers: BTreeMap::new(),
                quick_acks: HashMap::new(),
            },
            handle: MtProtoHandle(command_tx),
        }
    }
}

async fn next_transport_event(transport: &mut Option<ActiveTransport>) -> Option<TransportEvent> {
    match transport {
        Some(transport) => transport.events.recv().await,
        None => future::pending().await,
    }
}

impl MtProtoRunner {
    /// Run the engine until [`MtProtoHandle::stop`] is called or every handle
    /// is dropped.
    pub async fn run(mut self) {
        let observer = Arc::downgrade(&self.observer) as Weak<dyn ChangeListener>;
        self.observer_id = self.context.add_change_listener(observer).await.ok();
        self.load_auth_info().await;
        self.start_transport();

        loop {
            let next_ping = self.next_ping;
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = next_transport_event(&mut self.transport) => {
                    self.handle_transport_event(event).await;
                }
                Some(change) = self.context_changes.recv() => {
                    self.on_context_change(change).await;
                }
                _ = sleep_until(next_ping) => {
                    self.next_ping = Instant::now() + PING_DELAY;
                    if self.mtp.is_some() {
                        self.ping_due = true;
                        self.wake();
                    }
                }
            }
        }

        self.stop_transport();
        if let Some(id) = self.observer_id.take() {
            self.context.remove_change_listener(id);
        }
        for (_, service) in self.services.iter_mut() {
            service.detached();
        }
        info!("engine for dc {} stopped", self.dc_id);
    }

    async fn load_auth_info(&mut self) {
        let time_offset = self.context.global_time_difference().await.unwrap_or(0);
        match self.context.auth_info(self.dc_id).await {
            Ok(Some(info)) => {
                debug!("using the known authorization key for dc {}", self.dc_id);
                self.install_auth_info(info, time_offset);
            }
            Ok(None) => {
                self.session = SessionInfo::new(time_offset);
            }
            Err(_) => warn!("context is gone; cannot load the key for dc {}", self.dc_id),
        }
    }

    fn start_transport(&mut self) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let transport = Transport::new(
            self.dc_id,
            self.media,
            self.context.clone(),
            self.environment.clone(),
            Arc::clone(&self.reconnection_policy),
            events_tx,
        );
        tokio::spawn(transport.runner.run());
        transport.handle.start();
        self.transport = Some(ActiveTransport {
            handle: transport.handle,
            events,
        });
        self.transaction_requested = false;
    }

    fn stop_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.handle.stop();
        }
        self.transaction_requested = false;
    }

    fn transport_handle(&self) -> Option<&TransportHandle> {
        self.transport.as_ref().map(|transport| &transport.handle)
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Pause => {
                if !self.paused {
                    info!("pausing engine for dc {}", self.dc_id);
                    self.paused = true;
                    self.stop_transport();
                    self.connection_lost();
                    self.set_transport_state(TransportState::Disconnected);
                }
            }
            Command::Resume => {
                if self.paused {
                    info!("resuming engine for dc {}", self.dc_id);
                    self.paused = false;
                    self.start_transport();
                    self.wake();
                }
            }
            Command::Stop => unreachable!("handled by the run loop"),
            Command::AddService { service, tx } => {
                let id = ServiceId(self.next_service_id);
                self.next_service_id += 1;
                self.services.push((id, service));
                let _ = tx.send(id);
                self.wake();
            }
            Command::RemoveService(id) => {
                if let Some(index) = self.services.iter().position(|(s, _)| *s == id) {
                    let (_, mut service) = self.services.remove(index);
                    service.detached();
                }
            }
            Command::Wake => self.wake(),
            Command::ResetSession => {
                self.reset_session();
                self.wake();
            }
            Command::TimeResync => {
                for (_, service) in self.services.iter_mut() {
                    service.time_resync_requested();
                }
                self.wake();
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                self.set_transport_state(state);
                if state == TransportState::Connected {
                    self.next_ping = Instant::now() + PING_DELAY;
                    self.wake();
                }
            }
            TransportEvent::ReadyForTransaction => {
                self.transaction_requested = false;
                self.send_transaction();
            }
            TransportEvent::Received(payload) => {
                self.on_packet(payload).await;
                self.wake();
            }
            TransportEvent::QuickAck(token) => match self.quick_acks.remove(&token) {
                Some(msg_ids) => {
                    trace!("quick ack for {:?}", msg_ids);
                    self.dispatch(&Deserialization::Ack(msg_ids));
                }
                None => debug!("quick ack with unknown token {:08x}", token),
            },
            TransportEvent::TransactionSent(id) => {
                self.transactions.remove(&id);
                self.wake();
            }
            TransportEvent::TransactionsFailed(ids) => {
                let msg_ids = ids
                    .iter()
                    .filter_map(|id| self.transactions.remove(id))
                    .flatten()
                    .collect::<Vec<_>>();
                if self.mtp.is_none() {
                    // The handshake request was lost; start over.
                    self.handshake = None;
                } else if !msg_ids.is_empty() {
                    debug!("{} messages were never sent", msg_ids.len());
                    self.session.messages_acknowledged(&msg_ids);
                    self.may_have_failed(&msg_ids);
                }
                self.wake();
            }
            TransportEvent::ConnectionClosed(error) => {
                self.connection_lost();
                match error {
                    Some(ReadError::Transport(transport::Error::BadStatus { status: 404 }))
                    | Some(ReadError::Deserialize(DeserializeError::TransportError {
                        code: -404,
                    })) if self.mtp.is_some() => self.forget_auth_key().await,
                    Some(err) => debug!("connection to dc {} lost: {}", self.dc_id, err),
                    None => {}
                }
                self.wake();
            }
            TransportEvent::DownloadProgress { buffered } => {
                if let Some(delegate) = &self.delegate {
                    delegate.download_progress(buffered);
                }
            }
        }
    }

    fn set_transport_state(&mut self, state: TransportState) {
        if self.transport_state == state {
            return;
        }
        self.transport_state = state;
        if let Some(delegate) = &self.delegate {
            delegate.connection_state_changed(state);
        }

        let available = match state {
            TransportState::Connected => true,
            TransportState::ConnectionProblems => false,
            TransportState::Connecting | TransportState::Disconnected => return,
        };
        if self.network_available != Some(available) {
            self.network_available = Some(available);
            if let Some(delegate) = &self.delegate {
                delegate.network_availability_changed(available);
            }
        }
    }

    fn set_performing_service_tasks(&mut self, performing: bool) {
        if self.performing_service_tasks != performing {
            self.performing_service_tasks = performing;
            if let Some(delegate) = &self.delegate {
                delegate.performing_service_tasks(performing);
            }
        }
    }

    /// Everything that was in flight through the connection that is now gone
    /// may not have reached the server.
    fn connection_lost(&mut self) {
        self.connection_validated = false;
        self.initial_request_sent = false;
        self.transactions.clear();
        self.quick_acks.clear();
        if self.mtp.is_none() {
            self.handshake = None;
            return;
        }

        let unacknowledged = self.session.unacknowledged();
        if !unacknowledged.is_empty() {
            debug!(
                "{} messages may not have reached dc {}",
                unacknowledged.len(),
                self.dc_id
            );
            self.session.messages_acknowledged(&unacknowledged);
            self.may_have_failed(&unacknowledged);
        }
    }

    /// Process the service commands and, if anything needs to be sent, ask
    /// the transport for a transaction.
    fn wake(&mut self) {
        for (_, service) in self.services.iter_mut() {
            service.process_commands();
        }
        if self.paused || self.transaction_requested {
            return;
        }

        let wants_transaction = if self.mtp.is_none() {
            self.handshake
                .as_ref()
                .map_or(true, |handshake| handshake.request.is_some())
        } else {
            self.ping_due
                || !self.internal.is_empty()
                || self.session.has_scheduled_acks()
                || self.services.iter().any(|(_, s)| s.has_pending_messages())
        };

        if wants_transaction {
            if let Some(handle) = self.transport_handle() {
                self.transaction_requested = handle.request_transaction();
            }
        }
    }

    fn next_transaction_id(&mut self) -> TransactionId {
        let id = TransactionId(self.next_transaction_id);
        self.next_transaction_id += 1;
        id
    }

    fn server_now(&self) -> i64 {
        unix_now() + self.session.time_offset() as i64
    }

    /// The salt valid right now.
    ///
    /// Without one, the most recent salt is used (and the server will answer
    /// with the right one) while the services are asked to fetch new salts.
    fn current_salt(&mut self, now: i64) -> i64 {
        let Some(info) = &self.auth_info else {
            return 0;
        };
        if let Some(salt) = info.salt_for_timestamp(now) {
            self.salt_expired = false;
            return salt;
        }

        let fallback = info.salts().last().map_or(0, |s| s.salt);
        if !self.salt_expired {
            self.salt_expired = true;
            warn!(
                "no salt for dc {} is valid at {}; using {} until new ones arrive",
                self.dc_id, now, fallback
            );
            for (_, service) in self.services.iter_mut() {
                service.time_resync_requested();
            }
        }
        fallback
    }

    fn send_transaction(&mut self) {
        if self.paused {
            return;
        }
        if self.mtp.is_none() {
            self.send_handshake_request();
            return;
        }

        let now = self.server_now();
        let salt = self.current_salt(now);
        let context = ServiceContext {
            now,
            session_id: self.session.session_id(),
            remaining_salts: self.auth_info.as_ref().map_or(0, |info| {
                info.remaining_salts(message_id_for_timestamp(now))
            }),
        };
        for (_, service) in self.services.iter_mut() {
            service.process_commands();
        }

        let Some(mtp) = self.mtp.as_mut() else {
            return;
        };
        let mut buffer = DequeBuffer::with_capacity(4096, 64);
        let mut full = false;
        let mut leftover = false;

        while let Some(body) = self.internal.first() {
            match mtp.push(&mut self.session, &mut buffer, body, false) {
                Ok(_) => {}
                Err(PushError::ContainerFull) => {
                    full = true;
                    break;
                }
                Err(err) => warn!("dropping internal message: {}", err),
            }
            self.internal.remove(0);
        }

        if self.ping_due && !full {
            let ping_id = generate_random_id();
            let body = PingDelayDisconnect {
                ping_id,
                disconnect_delay: NO_PING_DISCONNECT,
            }
            .to_bytes();
            match mtp.push(&mut self.session, &mut buffer, &body, true) {
                Ok(msg_id) => {
                    debug!("sending keepalive ping {} with {:?}", ping_id, msg_id);
                    self.ping_due = false;
                }
                Err(_) => full = true,
            }
        }

        for (id, service) in self.services.iter_mut() {
            if full {
                break;
            }
            let Some(transaction) = service.prepare_transaction(&context) else {
                continue;
            };

            let mut assigned = Vec::with_capacity(transaction.messages.len());
            for message in transaction.messages {
                let initial = message.rpc && !self.initial_request_sent;
                let body = match (&self.serialization, initial) {
                    (Some(serialization), true) => serialization
                        .wrap_initial_request(&self.environment.connection_params(), message.body),
                    _ => message.body,
                };

                match mtp.push(&mut self.session, &mut buffer, &body, message.content_related) {
                    Ok(msg_id) => {
                        if initial {
                            self.initial_request_sent = true;
                        }
                        assigned.push(msg_id);
                    }
                    Err(PushError::ContainerFull) => {
                        full = true;
                        break;
                    }
                    Err(err) => {
                        warn!("service {:?} produced an unsendable message: {}", id, err);
                        service.message_rejected(assigned.len(), &err);
                        // The rest of its messages wait for the next transaction.
                        leftover = true;
                        break;
                    }
                }
            }
            trace!("service {:?} got {} message ids", id, assigned.len());
            service.messages_assigned(&assigned);
        }

        let Some(finalized) = mtp.finalize(&mut self.session, salt, &mut buffer) else {
            if leftover {
                self.wake();
            }
            return;
        };
        let Some(handle) = self.transport.as_ref().map(|t| t.handle.clone()) else {
            return;
        };

        let transaction = self.next_transaction_id();
        trace!(
            "sending transaction {:?} with {:?} ({} messages)",
            transaction,
            finalized.msg_id,
            finalized.msg_ids.len()
        );
        if finalized.msg_ids.len() > 1 {
            self.containers
                .insert(finalized.msg_id, finalized.msg_ids.clone());
            while self.containers.len() > MAX_REMEMBERED_CONTAINERS {
                self.containers.pop_first();
            }
        }
        if let Some(token) = finalized.quick_ack_token {
            self.quick_acks.insert(token, finalized.msg_ids.clone());
        }
        self.transactions.insert(transaction, finalized.msg_ids);
        handle.send(
            transaction,
            buffer[..].to_vec(),
            finalized.quick_ack_token.is_some(),
        );

        if full || leftover {
            // Whatever did not fit goes out with the next transaction.
            self.wake();
        }
    }

    fn send_handshake_request(&mut self) {
        if self.handshake.is_none() {
            match authentication::step1() {
                Ok((request, data)) => {
                    info!("generating new authorization key for dc {}...", self.dc_id);
                    self.set_performing_service_tasks(true);
                    self.handshake = Some(Handshake {
                        step: HandshakeStep::Step1(data),
                        request: Some(request),
                    });
                }
                Err(err) => {
                    warn!("failed to start authorization key generation: {}", err);
                    return;
                }
            }
        }

        let Some(request) = self
            .handshake
            .as_mut()
            .and_then(|handshake| handshake.request.take())
        else {
            return;
        };
        let Some(handle) = self.transport.as_ref().map(|t| t.handle.clone()) else {
            return;
        };

        let mut buffer = DequeBuffer::with_capacity(request.len(), 32);
        buffer.extend(&request);
        let msg_id = self.plain.serialize(&mut self.session, &mut buffer);
        let transaction = self.next_transaction_id();
        debug!("gen auth key: sending request with {:?}", msg_id);
        self.transactions.insert(transaction, vec![msg_id]);
        handle.send(transaction, buffer[..].to_vec(), false);
    }

    async fn on_handshake_packet(&mut self, payload: Vec<u8>) {
        let body = match self.plain.deserialize(&payload) {
            Ok(body) => body,
            Err(err) => {
                warn!("failed to read plain message: {}", err);
                if let Some(handle) = self.transport_handle() {
                    handle.decode_failed();
                }
                return;
            }
        };
        self.validate_connection();

        let Some(handshake) = self.handshake.take() else {
            debug!("ignoring plain message outside of key generation");
            return;
        };

        let progress = match handshake.step {
            HandshakeStep::Step1(data) => authentication::step2(data, &body)
                .map(|(request, data)| HandshakeProgress::Continue(request, HandshakeStep::Step2(data))),
            HandshakeStep::Step2(data) => authentication::step3(data, &body)
                .map(|(request, data)| HandshakeProgress::Continue(request, HandshakeStep::Step3(data))),
            HandshakeStep::Step3(data) => {
                authentication::create_key(data, &body).map(HandshakeProgress::Finished)
            }
        };

        match progress {
            Ok(HandshakeProgress::Continue(request, step)) => {
                debug!("gen auth key: next step");
                self.handshake = Some(Handshake {
                    step,
                    request: Some(request),
                });
            }
            Ok(HandshakeProgress::Finished(finished)) => self.finish_handshake(finished).await,
            Err(err) => {
                warn!("authorization key generation failed: {}", err);
                self.set_performing_service_tasks(false);
                if let Some(handle) = self.transport_handle() {
                    handle.reset();
                }
            }
        }
    }

    async fn finish_handshake(&mut self, finished: authentication::Finished) {
        let authentication::Finished {
            auth_key,
            time_offset,
            first_salt,
        } = finished;
        info!("authorization key generated for dc {}", self.dc_id);

        let now = unix_now() + time_offset as i64;
        let info = DatacenterAuthInfo::new(
            AuthKey::from_bytes(auth_key),
            vec![DatacenterSaltInfo::initial(first_salt, now)],
        );

        let dc_id = self.dc_id;
        let stored = info.clone();
        if self
            .context
            .perform_batch_updates(move |batch| {
                batch.update_auth_info(dc_id, stored);
                batch.set_global_time_difference(time_offset);
            })
            .await
            .is_err()
        {
            warn!("context is gone; the new key for dc {} is not saved", dc_id);
        }

        self.install_auth_info(info, time_offset);
        self.set_performing_service_tasks(false);
    }

    fn install_auth_info(&mut self, info: DatacenterAuthInfo, time_offset: i32) {
        self.mtp = Some(Encrypted::build().finish(info.auth_key().to_bytes()));
        self.auth_info = Some(info);
        self.handshake = None;
        self.salt_expired = false;
        self.session = SessionInfo::new(time_offset);
        self.start_new_session();
    }

    /// The server does not know our key anymore.
    async fn forget_auth_key(&mut self) {
        warn!("dc {} does not know our authorization key; dropping it", self.dc_id);
        if let Some(key_id) = self.auth_info.as_ref().map(|info| info.auth_key().id()) {
            let dc_id = self.dc_id;
            // Another engine may have stored a new key already.
            if self
                .context
                .perform_batch_updates(move |batch| {
                    if holds_key(batch, dc_id, key_id) {
                        batch.remove_auth_info(dc_id);
                    }
                })
                .await
                .is_err()
            {
                warn!("context is gone; cannot forget the key for dc {}", dc_id);
            }
        }
        self.drop_auth_key();
    }

    fn drop_auth_key(&mut self) {
        self.mtp = None;
        self.auth_info = None;
        self.handshake = None;
        self.salt_expired = false;
        self.session = SessionInfo::new(self.session.time_offset());
        self.start_new_session();
    }

    /// Someone (maybe this very engine) changed the auth info of our
    /// datacenter in the context.
    async fn on_context_change(&mut self, change: ContextChange) {
        match change {
            ContextChange::AuthInfoRemoved { .. } => {
                if self.mtp.is_none() {
                    return;
                }
                info!("authorization key for dc {} was removed", self.dc_id);
                self.drop_auth_key();
                if let Some(handle) = self.transport_handle() {
                    handle.reset();
                }
                self.wake();
            }
            ContextChange::AuthInfoUpdated { .. } => {
                let stored = match self.context.auth_info(self.dc_id).await {
                    Ok(Some(stored)) => stored,
                    Ok(None) | Err(_) => return,
                };
                let same_key = self
                    .auth_info
                    .as_ref()
                    .is_some_and(|info| info.auth_key() == stored.auth_key());
                if same_key {
                    trace!("refreshed {} salts for dc {}", stored.salts().len(), self.dc_id);
                    self.auth_info = Some(stored);
                    return;
                }

                info!("switching to the authorization key stored for dc {}", self.dc_id);
                let time_offset = self.session.time_offset();
                self.install_auth_info(stored, time_offset);
                self.set_performing_service_tasks(false);
                if let Some(handle) = self.transport_handle() {
                    handle.reset();
                }
                self.wake();
            }
            _ => {}
        }
    }

    fn reset_session(&mut self) {
        info!("starting a new session with dc {}", self.dc_id);
        self.session = SessionInfo::new(self.session.time_offset());
        self.start_new_session();
    }

    fn start_new_session(&mut self) {
        self.initial_request_sent = false;
        self.containers.clear();
        self.quick_acks.clear();
        self.internal.clear();
        for (_, service) in self.services.iter_mut() {
            service.session_reset();
        }
    }

    fn validate_connection(&mut self) {
        if !self.connection_validated {
            self.connection_validated = true;
            if let Some(handle) = self.transport_handle() {
                handle.connection_validated();
            }
        }
    }

    async fn on_packet(&mut self, payload: Vec<u8>) {
        let Some(mtp) = self.mtp.as_mut() else {
            self.on_handshake_packet(payload).await;
            return;
        };

        match mtp.deserialize(&mut self.session, &payload) {
            Ok(results) => {
                self.validate_connection();
                for result in results {
                    self.process_result(result).await;
                }
            }
            Err(DeserializeError::TransportError { code: -404 }) => {
                self.forget_auth_key().await;
                if let Some(handle) = self.transport_handle() {
                    handle.reset();
                }
            }
            Err(err) => {
                warn!("failed to read message from dc {}: {}", self.dc_id, err);
                if let Some(handle) = self.transport_handle() {
                    handle.decode_failed();
                }
            }
        }
    }

    async fn process_result(&mut self, result: Deserialization) {
        match result {
            Deserialization::BadMessage(bad_msg) => self.process_bad_message(bad_msg).await,
            Deserialization::NewSession(ref new_session) => {
                self.adopt_salt(new_session.server_salt).await;
                let first_msg_id = MsgId(new_session.first_msg_id);
                for (_, service) in self.services.iter_mut() {
                    service.server_did_change_session(first_msg_id);
                }
                self.dispatch(&result);
            }
            Deserialization::FutureSalts(ref salts) => {
                let time_offset = (salts.now as i64 - unix_now()) as i32;
                self.session.set_time_offset(time_offset);
                let fresh = salts
                    .salts
                    .0
                    .iter()
                    .map(DatacenterSaltInfo::from)
                    .collect::<Vec<_>>();
                let expired_before = message_id_for_timestamp(salts.now as i64);
                if let Some(info) = self.auth_info.as_mut() {
                    info.merge_salts(fresh.clone());
                    info.prune_salts(expired_before);
                    debug!("now know {} salts for dc {}", info.salts().len(), self.dc_id);
                }
                self.update_stored_salts(move |batch, dc_id| {
                    batch.merge_salts(dc_id, fresh);
                    batch.prune_salts(dc_id, expired_before);
                    batch.set_global_time_difference(time_offset);
                })
                .await;
                self.dispatch(&result);
            }
            Deserialization::StateRequest {
                msg_id,
                ref msg_ids,
            } => {
                let now = self.server_now();
                let info = msg_ids
                    .iter()
                    .map(|id| self.message_state(*id, now))
                    .collect();
                self.internal.push(
                    MsgsStateInfo {
                        req_msg_id: msg_id.0,
                        info,
                    }
                    .to_bytes(),
                );
            }
            Deserialization::ResendRequest(ref msg_ids) => {
                debug!("server asked to resend {} messages", msg_ids.len());
                self.may_have_failed(msg_ids);
            }
            Deserialization::Pong(ref pong) => {
                trace!("got pong for ping {}", pong.ping_id);
                self.dispatch(&result);
            }
            _ => self.dispatch(&result),
        }
    }

    /// The status of one of our messages, as far as we know.
    fn message_state(&self, msg_id: MsgId, now: i64) -> u8 {
        let time = msg_id.0 >> 32;
        if self.session.was_received(msg_id) {
            STATE_RECEIVED
        } else if time < now - MAX_SERVER_MSG_AGE {
            STATE_TOO_OLD
        } else if time > now + MAX_SERVER_MSG_DRIFT {
            STATE_TOO_NEW
        } else {
            STATE_UNKNOWN
        }
    }

    async fn process_bad_message(&mut self, bad_msg: BadMessage) {
        let msg_ids = self
            .containers
            .remove(&bad_msg.msg_id)
            .unwrap_or_else(|| vec![bad_msg.msg_id]);
        self.session.messages_acknowledged(&msg_ids);

        if let Some(salt) = bad_msg.new_salt {
            self.adopt_salt(salt).await;
        }

        if bad_msg.retryable() {
            if matches!(bad_msg.code, 16 | 17) {
                let time_offset = self.session.time_offset();
                if self
                    .context
                    .set_global_time_difference(time_offset)
                    .await
                    .is_err()
                {
                    warn!("context is gone; cannot save the time difference");
                }
            }
            debug!(
                "{}; {} messages will be sent again",
                bad_msg.description(),
                msg_ids.len()
            );
            self.may_have_failed(&msg_ids);
        } else if bad_msg.needs_new_session() {
            warn!("{}; resetting session", bad_msg.description());
            self.reset_session();
        } else {
            warn!(
                "{}; giving up on {} messages",
                bad_msg.description(),
                msg_ids.len()
            );
            for msg_id in msg_ids {
                self.dispatch(&Deserialization::BadMessage(BadMessage {
                    msg_id,
                    ..bad_msg.clone()
                }));
            }
        }
    }

    /// Use `salt` from now on.
    async fn adopt_salt(&mut self, salt: i64) {
        let now = self.server_now();
        let Some(info) = self.auth_info.as_mut() else {
            return;
        };
        let rejected = info.salt_for_timestamp(now);
        if rejected == Some(salt) {
            return;
        }
        if let Some(rejected) = rejected {
            info.remove_salt(rejected);
        }
        let adopted = DatacenterSaltInfo::initial(salt, now);
        info.merge_salts([adopted.clone()]);
        debug!("adopted new salt for dc {}", self.dc_id);
        self.update_stored_salts(move |batch, dc_id| {
            if let Some(rejected) = rejected {
                batch.remove_salt(dc_id, rejected);
            }
            batch.merge_salts(dc_id, vec![adopted]);
        })
        .await;
    }

    /// Apply salt changes to the stored auth info, as long as it still
    /// belongs to our key. Other engines may have added salts of their own,
    /// so the info is never overwritten as a whole.
    fn update_stored_salts<F>(&self, f: F) -> impl future::Future<Output = ()> + Send + 'static
    where
        F: FnOnce(&mut ContextBatch<'_>, i32) + Send + 'static,
    {
        let key_id = self.auth_info.as_ref().map(|info| info.auth_key().id());
        let dc_id = self.dc_id;
        let context = self.context.clone();
        async move {
            let Some(key_id) = key_id else {
                return;
            };
            if context
                .perform_batch_updates(move |batch| {
                    if holds_key(batch, dc_id, key_id) {
                        f(batch, dc_id);
                    }
                })
                .await
                .is_err()
            {
                warn!("context is gone; cannot save the salts for dc {}", dc_id);
            }
        }
    }

    fn may_have_failed(&mut self, msg_ids: &[MsgId]) {
        for (_, service) in self.services.iter_mut() {
            service.transactions_may_have_failed(msg_ids);
        }
    }

    fn dispatch(&mut self, message: &Deserialization) {
        for (_, service) in self.services.iter_mut() {
            service.received_message(message);
        }
    }
}
