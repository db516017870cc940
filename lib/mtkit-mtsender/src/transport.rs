// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The transport keeps one connection to a datacenter alive, moving on to
//! the next known address when the current one fails, and tells the engine
//! when it may write a new transaction.
use crate::configuration::ApiEnvironment;
use crate::errors::ReadError;
use crate::net::{ConnectionEvent, ConnectionId, ServerAddr, TcpConnection, TcpConnectionHandle};
use crate::reconnection::ReconnectionPolicy;
use log::{debug, info, warn};
use mtkit_session::{ContextHandle, DatacenterAddress};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

/// How many packets in a row may fail to be decrypted before the
/// connection is considered broken.
const MAX_DECODE_FAILURES: usize = 3;

/// Identifies a payload handed to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransactionId(pub(crate) u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connection failed, and a new one will be tried.
    ConnectionProblems,
}

/// Notifications sent from the transport to the engine.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    StateChanged(TransportState),
    /// A transaction may be sent now.
    ReadyForTransaction,
    Received(Vec<u8>),
    QuickAck(u32),
    TransactionSent(TransactionId),
    /// These transactions were never written out, and never will be.
    TransactionsFailed(Vec<TransactionId>),
    /// The connection was lost (or reset). Anything that was written may
    /// or may not have reached the server.
    ConnectionClosed(Option<ReadError>),
    DownloadProgress { buffered: usize },
}

enum Command {
    Start,
    Reset,
    Stop,
    RequestTransaction,
    Send {
        id: TransactionId,
        payload: Vec<u8>,
        quick_ack: bool,
    },
    ConnectionValidated,
    DecodeFailed,
}

/// Identifies one address lookup, so that the answer of a lookup that was
/// superseded (by a reset, for example) can be told apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LookupId(u64);

/// What a spawned address lookup found.
#[derive(Debug)]
enum Lookup {
    Resolved(ServerAddr),
    NoAddress,
    Unresolvable(DatacenterAddress),
    ContextGone,
}

struct ActiveConnection {
    id: ConnectionId,
    handle: TcpConnectionHandle,
    opened: bool,
    validated: bool,
    pending: Vec<TransactionId>,
}

#[derive(Clone)]
pub(crate) struct TransportHandle(mpsc::UnboundedSender<Command>);

pub(crate) struct Transport {
    pub runner: TransportRunner,
    pub handle: TransportHandle,
}

pub(crate) struct TransportRunner {
    dc_id: i32,
    media: bool,
    context: ContextHandle,
    environment: ApiEnvironment,
    policy: Arc<dyn ReconnectionPolicy>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    connection_tx: mpsc::UnboundedSender<(ConnectionId, ConnectionEvent)>,
    connection_rx: mpsc::UnboundedReceiver<(ConnectionId, ConnectionEvent)>,
    lookup_tx: mpsc::UnboundedSender<(LookupId, Lookup)>,
    lookup_rx: mpsc::UnboundedReceiver<(LookupId, Lookup)>,
    /// The lookup whose answer is awaited, if any.
    lookup: Option<LookupId>,
    next_lookup_id: u64,
    connection: Option<ActiveConnection>,
    next_connection_id: u64,
    state: TransportState,
    started: bool,
    address_index: usize,
    attempts: usize,
    reconnect_at: Option<Instant>,
    transaction_requested: bool,
    in_flight: usize,
    decode_failures: usize,
}

impl TransportHandle {
    pub fn start(&self) -> bool {
        self.0.send(Command::Start).is_ok()
    }

    /// Drop the current connection (if any) and open a new one.
    pub fn reset(&self) -> bool {
        self.0.send(Command::Reset).is_ok()
    }

    pub fn stop(&self) -> bool {
        self.0.send(Command::Stop).is_ok()
    }

    /// Ask for a [`TransportEvent::ReadyForTransaction`] as soon as possible.
    pub fn request_transaction(&self) -> bool {
        self.0.send(Command::RequestTransaction).is_ok()
    }

    pub fn send(&self, id: TransactionId, payload: Vec<u8>, quick_ack: bool) -> bool {
        self.0
            .send(Command::Send {
                id,
                payload,
                quick_ack,
            })
            .is_ok()
    }

    /// The engine managed to make sense of what came through the connection.
    pub fn connection_validated(&self) -> bool {
        self.0.send(Command::ConnectionValidated).is_ok()
    }

    /// The engine could not make sense of a packet.
    pub fn decode_failed(&self) -> bool {
        self.0.send(Command::DecodeFailed).is_ok()
    }
}

impl Transport {
    pub fn new(
        dc_id: i32,
        media: bool,
        context: ContextHandle,
        environment: ApiEnvironment,
        policy: Arc<dyn ReconnectionPolicy>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let (lookup_tx, lookup_rx) = mpsc::unbounded_channel();
        Self {
            runner: TransportRunner {
                dc_id,
                media,
                context,
                environment,
                policy,
                command_rx,
                events,
                connection_tx,
                connection_rx,
                lookup_tx,
                lookup_rx,
                lookup: None,
                next_lookup_id: 0,
                connection: None,
                next_connection_id: 0,
                state: TransportState::Disconnected,
                started: false,
                address_index: 0,
                attempts: 0,
                reconnect_at: None,
                transaction_requested: false,
                in_flight: 0,
                decode_failures: 0,
            },
            handle: TransportHandle(command_tx),
        }
    }
}

impl TransportRunner {
    /// Run the transport until [`TransportHandle::stop`] is called or every
    /// handle is dropped.
    pub async fn run(mut self) {
        loop {
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some((id, event)) = self.connection_rx.recv() => {
                    self.handle_connection_event(id, event);
                }
                Some((id, lookup)) = self.lookup_rx.recv() => {
                    self.handle_lookup(id, lookup);
                }
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.connect();
                }
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.handle.close();
        }
        self.set_state(TransportState::Disconnected);
        debug!("transport for dc {} stopped", self.dc_id);
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: TransportState) {
        if self.state != state {
            info!(
                "transport for dc {} is now {:?} (was {:?})",
                self.dc_id, state, self.state
            );
            self.state = state;
            self.emit(TransportEvent::StateChanged(state));
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                self.started = true;
                if self.connection.is_none() && self.reconnect_at.is_none() {
                    self.connect();
                }
            }
            Command::Reset => {
                self.drop_connection(None);
                self.lookup = None;
                self.attempts = 0;
                self.reconnect_at = None;
                self.set_state(TransportState::Disconnected);
                if self.started {
                    self.connect();
                }
            }
            Command::Stop => unreachable!("handled by the run loop"),
            Command::RequestTransaction => {
                self.transaction_requested = true;
                self.maybe_ready();
            }
            Command::Send {
                id,
                payload,
                quick_ack,
            } => match self.connection.as_mut() {
                Some(connection)
                    if connection.opened && connection.handle.send(id, payload, quick_ack) =>
                {
                    connection.pending.push(id);
                    self.in_flight += 1;
                }
                _ => {
                    debug!("no connection to send {:?} through", id);
                    self.emit(TransportEvent::TransactionsFailed(vec![id]));
                }
            },
            Command::ConnectionValidated => {
                let Some(connection) = self.connection.as_mut() else {
                    return;
                };
                if !connection.validated {
                    debug!("connection {:?} validated", connection.id);
                    connection.validated = true;
                }
                self.attempts = 0;
                self.decode_failures = 0;
                // Only a server that answered sensibly makes us connected.
                self.set_state(TransportState::Connected);
            }
            Command::DecodeFailed => {
                self.decode_failures += 1;
                if self.decode_failures >= MAX_DECODE_FAILURES {
                    warn!(
                        "{} packets in a row could not be decoded; dropping connection",
                        self.decode_failures
                    );
                    self.decode_failures = 0;
                    self.drop_connection(None);
                    // Whatever answers at this address is not the datacenter.
                    self.address_index += 1;
                    self.connection_failed();
                }
            }
        }
    }

    fn handle_connection_event(&mut self, id: ConnectionId, event: ConnectionEvent) {
        match self.connection.as_ref() {
            Some(connection) if connection.id == id => {}
            _ => {
                debug!("ignoring {:?} from stale connection {:?}", event, id);
                return;
            }
        }

        match event {
            ConnectionEvent::Opened => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.opened = true;
                }
                // Still `Connecting` until the engine validates the first
                // answer, but the first transaction may go out already.
                self.maybe_ready();
            }
            ConnectionEvent::Closed(error) => {
                let validated = self
                    .connection
                    .as_ref()
                    .is_some_and(|connection| connection.validated);
                let failed = error.is_some();
                if matches!(error, Some(ReadError::HttpResponse)) {
                    warn!("the connection seems to be intercepted by an HTTP proxy");
                }
                self.drop_connection(error);
                if failed && !validated {
                    self.address_index += 1;
                }
                self.connection_failed();
            }
            ConnectionEvent::Received(payload) => self.emit(TransportEvent::Received(payload)),
            ConnectionEvent::QuickAck(token) => self.emit(TransportEvent::QuickAck(token)),
            ConnectionEvent::Sent(id) => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.pending.retain(|pending| *pending != id);
                }
                self.in_flight = self.in_flight.saturating_sub(1);
                self.emit(TransportEvent::TransactionSent(id));
                self.maybe_ready();
            }
            ConnectionEvent::DownloadProgress { buffered } => {
                self.emit(TransportEvent::DownloadProgress { buffered })
            }
        }
    }

    /// Forget the current connection, failing whatever it had not sent yet.
    fn drop_connection(&mut self, error: Option<ReadError>) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        connection.handle.close();
        self.in_flight = 0;
        if !connection.pending.is_empty() {
            self.emit(TransportEvent::TransactionsFailed(connection.pending));
        }
        self.emit(TransportEvent::ConnectionClosed(error));
    }

    /// Account for a failed attempt and schedule the next one.
    fn connection_failed(&mut self) {
        self.attempts += 1;
        if !self.started {
            self.set_state(TransportState::Disconnected);
            return;
        }

        match self.policy.should_retry(self.attempts) {
            ControlFlow::Continue(delay) => {
                debug!(
                    "reconnecting to dc {} in {:?} (attempt {})",
                    self.dc_id, delay, self.attempts
                );
                self.set_state(TransportState::ConnectionProblems);
                self.reconnect_at = Some(Instant::now() + delay);
            }
            ControlFlow::Break(()) => {
                warn!(
                    "giving up on dc {} after {} attempts",
                    self.dc_id, self.attempts
                );
                self.set_state(TransportState::Disconnected);
            }
        }
    }

    /// Start looking up the next address to connect to. The answer comes
    /// back through [`TransportRunner::handle_lookup`], so that the
    /// transport keeps serving commands meanwhile.
    fn connect(&mut self) {
        if self.lookup.is_some() {
            return;
        }
        let id = LookupId(self.next_lookup_id);
        self.next_lookup_id += 1;
        self.lookup = Some(id);
        self.set_state(TransportState::Connecting);

        let context = self.context.clone();
        let (dc_id, media, index) = (self.dc_id, self.media, self.address_index);
        let proxy = self.environment.proxy_url().map(str::to_owned);
        let tx = self.lookup_tx.clone();
        tokio::spawn(async move {
            let lookup = lookup_address(context, dc_id, media, index, proxy).await;
            let _ = tx.send((id, lookup));
        });
    }

    fn handle_lookup(&mut self, id: LookupId, lookup: Lookup) {
        if self.lookup != Some(id) {
            debug!("ignoring superseded lookup {:?}", id);
            return;
        }
        self.lookup = None;
        if !self.started || self.connection.is_some() {
            return;
        }

        let addr = match lookup {
            Lookup::Resolved(addr) => addr,
            Lookup::NoAddress => {
                warn!("no known address for dc {}", self.dc_id);
                self.connection_failed();
                return;
            }
            Lookup::Unresolvable(address) => {
                warn!("failed to resolve {}", address);
                self.address_index += 1;
                self.connection_failed();
                return;
            }
            Lookup::ContextGone => {
                warn!("context is gone; cannot look up dc {}", self.dc_id);
                self.set_state(TransportState::Disconnected);
                return;
            }
        };

        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        let connection = TcpConnection::new(
            id,
            addr,
            self.environment
                .transport
                .codec(self.environment.obfuscated),
            self.environment.payload_prefix.clone(),
            self.connection_tx.clone(),
        );
        tokio::spawn(connection.runner.run());
        self.connection = Some(ActiveConnection {
            id,
            handle: connection.handle,
            opened: false,
            validated: false,
            pending: Vec::new(),
        });
    }

    fn maybe_ready(&mut self) {
        let opened = self
            .connection
            .as_ref()
            .is_some_and(|connection| connection.opened);
        if self.transaction_requested
            && opened
            && (self.in_flight == 0 || self.environment.simultaneous_transactions)
        {
            self.transaction_requested = false;
            self.emit(TransportEvent::ReadyForTransaction);
        }
    }
}

/// Find the address at `index` (wrapping around) among those known for the
/// datacenter, and resolve it.
async fn lookup_address(
    context: ContextHandle,
    dc_id: i32,
    media: bool,
    index: usize,
    proxy: Option<String>,
) -> Lookup {
    let set = match context.address_set_required(dc_id).await {
        Ok(Some(set)) => set.for_media(media),
        Ok(None) => return Lookup::NoAddress,
        Err(_) => return Lookup::ContextGone,
    };
    let Some(address) = set.get(index % set.len().max(1)) else {
        return Lookup::NoAddress;
    };
    match ServerAddr::resolve(address, proxy.as_deref()).await {
        Ok(addr) => Lookup::Resolved(addr),
        Err(err) => {
            debug!("resolving {} failed: {}", address, err);
            Lookup::Unresolvable(address.clone())
        }
    }
}
