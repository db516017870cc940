// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The request lifecycle: queueing, sending, matching responses, retrying
//! and cancelling.
use crate::errors::{InvocationError, RpcError};
use crate::mtproto::MtProtoHandle;
use crate::service::{MessageService, MessageTransaction, OutgoingMessage, ServiceContext};
use log::{debug, info, trace, warn};
use mtkit_mtproto::MsgId;
use mtkit_mtproto::mtp::{self, Deserialization, PushError, RpcResult, RpcResultError};
use mtkit_tl_types::mtproto::{InvokeAfterMsg, RpcDropAnswer};
use mtkit_tl_types::{Blob, Deserializable, RemoteCall, Serializable};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Identifies a request enqueued through a [`RequestHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// A request to be sent, along with how it should be sent.
#[derive(Clone)]
pub struct Request {
    body: Vec<u8>,
    high_priority: bool,
    depends_on_password_entry: bool,
    timeout: Option<Duration>,
    after: Option<RequestId>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

/// The errors a request has run into so far.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestErrorContext {
    /// Errors the server blamed on itself (codes 500 and above).
    pub internal_errors: u32,
    /// Every error returned by the server.
    pub server_errors: u32,
    /// Total seconds the server asked to wait.
    pub flood_wait_seconds: u32,
    pub last_error: Option<RpcError>,
}

/// Decides whether a request that failed with an RPC error is tried again.
pub trait RetryPolicy: Send + Sync {
    /// `Continue(delay)` to send the request again after `delay`, or
    /// `Break(())` to complete it with the error.
    ///
    /// `context` already accounts for `error`.
    fn should_continue_execution(
        &self,
        error: &InvocationError,
        context: &RequestErrorContext,
    ) -> ControlFlow<(), Duration>;
}

/// Never retry.
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_continue_execution(
        &self,
        _: &InvocationError,
        _: &RequestErrorContext,
    ) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

impl Request {
    /// A request with an already-serialized body.
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            high_priority: false,
            depends_on_password_entry: false,
            timeout: None,
            after: None,
            retry_policy: None,
        }
    }

    pub fn from_call<R: RemoteCall>(call: &R) -> Self {
        Self::new(call.to_bytes())
    }

    /// Send before any request without high priority.
    pub fn high_priority(mut self, high_priority: bool) -> Self {
        self.high_priority = high_priority;
        self
    }

    /// Hold the request while the account password is being entered.
    pub fn depends_on_password_entry(mut self, depends: bool) -> Self {
        self.depends_on_password_entry = depends;
        self
    }

    /// Complete with [`InvocationError::Timeout`] if no answer arrives in time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Have the server process this request only after `request`.
    pub fn after(mut self, request: RequestId) -> Self {
        self.after = Some(request);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    fn constructor_id(&self) -> Option<u32> {
        let id = self.body.get(..4)?;
        Some(u32::from_le_bytes([id[0], id[1], id[2], id[3]]))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("constructor_id", &self.constructor_id())
            .field("len", &self.body.len())
            .field("high_priority", &self.high_priority)
            .field("depends_on_password_entry", &self.depends_on_password_entry)
            .field("timeout", &self.timeout)
            .field("after", &self.after)
            .finish()
    }
}

type Completion = oneshot::Sender<Result<Vec<u8>, InvocationError>>;

enum Command {
    Enqueue {
        id: RequestId,
        request: Request,
        tx: Completion,
    },
    Cancel(RequestId),
    TimedOut(RequestId),
    RetryDue(RequestId),
    PasswordEntryCompleted,
}

/// The answer to a request, once it arrives.
pub struct Response {
    id: RequestId,
    rx: oneshot::Receiver<Result<Vec<u8>, InvocationError>>,
}

/// Cloneable handle to enqueue requests into a [`RequestMessageService`].
#[derive(Clone)]
pub struct RequestHandle {
    tx: mpsc::UnboundedSender<Command>,
    mtproto: MtProtoHandle,
    next_id: Arc<AtomicU64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Queued,
    /// Waiting to be retried.
    Waiting,
    Sent { msg_id: MsgId },
}

struct Entry {
    id: RequestId,
    request: Request,
    state: State,
    tx: Completion,
    errors: RequestErrorContext,
    timers: Vec<JoinHandle<()>>,
}

/// What each message of the last prepared transaction was.
enum Slot {
    Request(RequestId),
    DropAnswer(i64),
}

/// The [`MessageService`] that sends requests and delivers their answers.
pub struct RequestMessageService {
    command_rx: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::UnboundedSender<Command>,
    mtproto: MtProtoHandle,
    entries: Vec<Entry>,
    /// Answers no longer wanted, by the identifier of their request.
    drop_answers: Vec<i64>,
    prepared: Vec<Slot>,
    password_input_handler: Option<Box<dyn FnMut() + Send>>,
    password_pending: bool,
}

impl Response {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the answer. Cancelled requests never get one and complete
    /// with [`InvocationError::Dropped`].
    pub async fn wait(self) -> Result<Vec<u8>, InvocationError> {
        self.rx.await.map_err(|_| InvocationError::Dropped)?
    }
}

impl RequestHandle {
    fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok() && self.mtproto.request_transport_transaction()
    }

    /// Enqueue a request. The answer arrives through the returned [`Response`].
    ///
    /// Bodies that could never be sent complete right away with
    /// [`InvocationError::InvalidRequest`].
    pub fn enqueue(&self, request: Request) -> Response {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        if let Err(err) = mtp::check_body(&request.body) {
            warn!("rejecting request {:?}: {}", id, err);
            drop(tx.send(Err(InvocationError::InvalidRequest(err))));
        } else if !self.send(Command::Enqueue { id, request, tx }) {
            debug!("request {:?} enqueued after the engine stopped", id);
        }
        Response { id, rx }
    }

    /// Forget about a request. Its [`Response`] will never be completed with
    /// an answer.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.send(Command::Cancel(id))
    }

    /// Release the requests held by [`Request::depends_on_password_entry`].
    pub fn password_entry_completed(&self) -> bool {
        self.send(Command::PasswordEntryCompleted)
    }

    /// Enqueue the request and wait for its answer.
    pub async fn invoke_request(&self, request: Request) -> Result<Vec<u8>, InvocationError> {
        self.enqueue(request).wait().await
    }

    /// Invoke a call and parse its answer.
    pub async fn invoke<R: RemoteCall>(&self, call: &R) -> Result<R::Return, InvocationError> {
        let body = self.invoke_request(Request::from_call(call)).await?;
        Ok(R::Return::from_bytes(&body)?)
    }
}

impl RequestMessageService {
    pub fn new(mtproto: MtProtoHandle) -> (Self, RequestHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = RequestHandle {
            tx: command_tx.clone(),
            mtproto: mtproto.clone(),
            next_id: Arc::new(AtomicU64::new(0)),
        };
        let service = Self {
            command_rx,
            command_tx,
            mtproto,
            entries: Vec::new(),
            drop_answers: Vec::new(),
            prepared: Vec::new(),
            password_input_handler: None,
            password_pending: false,
        };
        (service, handle)
    }

    /// Called once whenever the server says the account password is needed.
    pub fn with_password_input_handler(mut self, handler: impl FnMut() + Send + 'static) -> Self {
        self.password_input_handler = Some(Box::new(handler));
        self
    }

    fn position(&self, id: RequestId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    fn position_by_msg_id(&self, msg_id: MsgId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.state == State::Sent { msg_id })
    }

    /// Remove the entry and fire its completion.
    fn complete(&mut self, index: usize, result: Result<Vec<u8>, InvocationError>) {
        let entry = self.entries.remove(index);
        for timer in entry.timers.iter() {
            timer.abort();
        }
        debug!("request {:?} completed (ok: {})", entry.id, result.is_ok());
        drop(entry.tx.send(result));
    }

    /// Post `command` back to this service after `delay`.
    fn schedule(&self, delay: Duration, command: Command) -> JoinHandle<()> {
        let tx = self.command_tx.clone();
        let mtproto = self.mtproto.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(command).is_ok() {
                mtproto.request_transport_transaction();
            }
        })
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { id, request, tx } => {
                trace!("enqueueing request {:?}: {:?}", id, request);
                let timers = match request.timeout {
                    Some(timeout) => vec![self.schedule(timeout, Command::TimedOut(id))],
                    None => Vec::new(),
                };
                self.entries.push(Entry {
                    id,
                    request,
                    state: State::Queued,
                    tx,
                    errors: RequestErrorContext::default(),
                    timers,
                });
            }
            Command::Cancel(id) => {
                if let Some(index) = self.position(id) {
                    let entry = self.entries.remove(index);
                    for timer in entry.timers.iter() {
                        timer.abort();
                    }
                    if let State::Sent { msg_id } = entry.state {
                        debug!("dropping the answer to cancelled request {:?}", id);
                        self.drop_answers.push(msg_id.0);
                    }
                }
            }
            Command::TimedOut(id) => {
                if let Some(index) = self.position(id) {
                    info!("request {:?} timed out", id);
                    if let State::Sent { msg_id } = self.entries[index].state {
                        self.drop_answers.push(msg_id.0);
                    }
                    self.complete(index, Err(InvocationError::Timeout));
                }
            }
            Command::RetryDue(id) => {
                if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
                    if entry.state == State::Waiting {
                        entry.state = State::Queued;
                    }
                }
            }
            Command::PasswordEntryCompleted => {
                debug!("password entry completed; releasing held requests");
                self.password_pending = false;
            }
        }
    }

    /// The body to send for the entry, or `None` if it cannot be sent yet.
    fn sendable_body(&self, entry: &Entry) -> Option<Vec<u8>> {
        if entry.state != State::Queued
            || (entry.request.depends_on_password_entry && self.password_pending)
        {
            return None;
        }

        let Some(dependency) = entry.request.after else {
            return Some(entry.request.body.clone());
        };
        match self.entries.iter().find(|other| other.id == dependency) {
            // The dependency is done (or gone), so there's nothing to wait for.
            None => Some(entry.request.body.clone()),
            Some(Entry {
                state: State::Sent { msg_id },
                ..
            }) => Some(
                InvokeAfterMsg {
                    msg_id: msg_id.0,
                    query: Blob(entry.request.body.clone()),
                }
                .to_bytes(),
            ),
            Some(_) => None,
        }
    }

    fn process_result(&mut self, result: &RpcResult) {
        match self.position_by_msg_id(result.msg_id) {
            Some(index) => self.complete(index, Ok(result.body.clone())),
            None => trace!("got result for unknown message {:?}", result.msg_id),
        }
    }

    fn process_error(&mut self, error: &RpcResultError) {
        let Some(index) = self.position_by_msg_id(error.msg_id) else {
            trace!("got error for unknown message {:?}", error.msg_id);
            return;
        };

        let entry = &mut self.entries[index];
        let mut rpc_error = RpcError::from(error.error.clone());
        if let Some(id) = entry.request.constructor_id() {
            rpc_error = rpc_error.with_caused_by(id);
        }
        debug!("request {:?} failed: {}", entry.id, rpc_error);

        entry.errors.server_errors += 1;
        if rpc_error.code >= 500 {
            entry.errors.internal_errors += 1;
        }
        if rpc_error.is("FLOOD_WAIT") {
            entry.errors.flood_wait_seconds += rpc_error.value.unwrap_or(0);
        }
        entry.errors.last_error = Some(rpc_error.clone());

        let password_needed = rpc_error.is("SESSION_PASSWORD_NEEDED");
        let error = InvocationError::Rpc(rpc_error);
        let flow = match &entry.request.retry_policy {
            Some(policy) => policy.should_continue_execution(&error, &entry.errors),
            None => NoRetry.should_continue_execution(&error, &entry.errors),
        };

        match flow {
            ControlFlow::Continue(delay) if delay.is_zero() => entry.state = State::Queued,
            ControlFlow::Continue(delay) => {
                debug!("retrying request {:?} in {:?}", entry.id, delay);
                entry.state = State::Waiting;
                let id = entry.id;
                let timer = self.schedule(delay, Command::RetryDue(id));
                self.entries[index].timers.push(timer);
            }
            ControlFlow::Break(()) => self.complete(index, Err(error)),
        }

        if password_needed && !self.password_pending {
            info!("account password needed; holding dependent requests");
            self.password_pending = true;
            if let Some(handler) = self.password_input_handler.as_mut() {
                handler();
            }
        }
    }

    fn fail(&mut self, msg_id: MsgId, error: InvocationError) {
        if let Some(index) = self.position_by_msg_id(msg_id) {
            self.complete(index, Err(error));
        }
    }

    /// Put every sent request matching `f` back in the queue.
    fn requeue(&mut self, f: impl Fn(MsgId) -> bool) {
        for entry in self.entries.iter_mut() {
            if let State::Sent { msg_id } = entry.state {
                if f(msg_id) {
                    debug!("re-queueing request {:?} (was {:?})", entry.id, msg_id);
                    entry.state = State::Queued;
                }
            }
        }
    }
}

impl MessageService for RequestMessageService {
    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.handle_command(command);
        }
    }

    fn has_pending_messages(&self) -> bool {
        !self.drop_answers.is_empty()
            || self
                .entries
                .iter()
                .any(|entry| self.sendable_body(entry).is_some())
    }

    fn prepare_transaction(&mut self, _: &ServiceContext) -> Option<MessageTransaction> {
        let mut messages = Vec::new();
        self.prepared.clear();

        for req_msg_id in self.drop_answers.drain(..) {
            messages.push(OutgoingMessage::service(
                RpcDropAnswer { req_msg_id }.to_bytes(),
                true,
            ));
            self.prepared.push(Slot::DropAnswer(req_msg_id));
        }

        let mut ready = self
            .entries
            .iter()
            .filter_map(|entry| {
                self.sendable_body(entry)
                    .map(|body| (entry.id, entry.request.high_priority, body))
            })
            .collect::<Vec<_>>();
        // Stable, so the order of enqueueing is kept otherwise.
        ready.sort_by_key(|(_, high_priority, _)| !high_priority);

        for (id, _, body) in ready {
            messages.push(OutgoingMessage::rpc(body));
            self.prepared.push(Slot::Request(id));
        }

        if messages.is_empty() {
            None
        } else {
            Some(MessageTransaction { messages })
        }
    }

    fn messages_assigned(&mut self, msg_ids: &[MsgId]) {
        let prepared = std::mem::take(&mut self.prepared);
        for (index, slot) in prepared.into_iter().enumerate() {
            match (slot, msg_ids.get(index)) {
                (Slot::Request(id), Some(&msg_id)) => {
                    if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
                        trace!("request {:?} sent as {:?}", id, msg_id);
                        entry.state = State::Sent { msg_id };
                    }
                }
                (Slot::DropAnswer(_), Some(_)) => {}
                // Did not fit; the request is still queued.
                (Slot::Request(_), None) => {}
                (Slot::DropAnswer(req_msg_id), None) => self.drop_answers.push(req_msg_id),
            }
        }
    }

    fn message_rejected(&mut self, index: usize, error: &PushError) {
        if let Some(Slot::Request(id)) = self.prepared.get(index) {
            if let Some(position) = self.position(*id) {
                self.complete(position, Err(InvocationError::InvalidRequest(error.clone())));
            }
        }
    }

    fn received_message(&mut self, message: &Deserialization) {
        match message {
            Deserialization::RpcResult(result) => self.process_result(result),
            Deserialization::RpcError(error) => self.process_error(error),
            Deserialization::Failure(failure) => {
                warn!(
                    "failed to read the answer to {:?}: {}",
                    failure.msg_id, failure.error
                );
                self.fail(failure.msg_id, InvocationError::from(failure.error.clone()));
            }
            Deserialization::BadMessage(bad_msg) => {
                self.fail(bad_msg.msg_id, InvocationError::Dropped);
            }
            _ => {}
        }
    }

    fn transactions_may_have_failed(&mut self, msg_ids: &[MsgId]) {
        self.requeue(|msg_id| msg_ids.contains(&msg_id));
    }

    fn server_did_change_session(&mut self, first_msg_id: MsgId) {
        self.requeue(|msg_id| msg_id < first_msg_id);
    }

    fn session_reset(&mut self) {
        self.requeue(|_| true);
        self.drop_answers.clear();
    }

    fn detached(&mut self) {
        while !self.entries.is_empty() {
            self.complete(0, Err(InvocationError::Dropped));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtproto::MtProto;
    use mtkit_session::Context;
    use mtkit_tl_types::mtproto;

    fn service() -> (RequestMessageService, RequestHandle) {
        // The engine is never run, so wake-ups go nowhere.
        let context = Context::builder().known_addresses(false).build();
        let engine = MtProto::builder(context.handle, 2).build();
        RequestMessageService::new(engine.handle)
    }

    fn context() -> ServiceContext {
        ServiceContext {
            now: 0,
            session_id: 0,
            remaining_salts: 1,
        }
    }

    fn bodies(service: &mut RequestMessageService) -> Vec<Vec<u8>> {
        service
            .prepare_transaction(&context())
            .map(|t| t.messages.into_iter().map(|m| m.body).collect())
            .unwrap_or_default()
    }

    fn rpc_error(msg_id: MsgId, message: &str) -> Deserialization {
        Deserialization::RpcError(RpcResultError {
            msg_id,
            error: mtproto::RpcError {
                error_code: 400,
                error_message: message.into(),
            },
        })
    }

    #[tokio::test]
    async fn high_priority_goes_first() {
        let (mut service, handle) = service();
        handle.enqueue(Request::new(vec![1; 4]));
        handle.enqueue(Request::new(vec![2; 4]).high_priority(true));
        handle.enqueue(Request::new(vec![3; 4]));
        service.process_commands();

        assert_eq!(bodies(&mut service), vec![vec![2; 4], vec![1; 4], vec![3; 4]]);
    }

    #[tokio::test]
    async fn result_completes_once() {
        let (mut service, handle) = service();
        let response = handle.enqueue(Request::new(vec![1; 4]));
        service.process_commands();
        bodies(&mut service);
        service.messages_assigned(&[MsgId(4)]);
        assert!(!service.has_pending_messages());

        let result = Deserialization::RpcResult(RpcResult {
            msg_id: MsgId(4),
            body: vec![9; 4],
        });
        service.received_message(&result);
        service.received_message(&result);
        assert_eq!(response.wait().await.unwrap(), vec![9; 4]);
        assert!(service.entries.is_empty());
    }

    #[tokio::test]
    async fn unassigned_messages_stay_queued() {
        let (mut service, handle) = service();
        handle.enqueue(Request::new(vec![1; 4]));
        handle.enqueue(Request::new(vec![2; 4]));
        service.process_commands();
        bodies(&mut service);
        service.messages_assigned(&[MsgId(4)]);

        assert_eq!(bodies(&mut service), vec![vec![2; 4]]);
    }

    #[tokio::test]
    async fn failed_transactions_are_resent() {
        let (mut service, handle) = service();
        handle.enqueue(Request::new(vec![1; 4]));
        service.process_commands();
        bodies(&mut service);
        service.messages_assigned(&[MsgId(4)]);
        assert!(bodies(&mut service).is_empty());

        service.transactions_may_have_failed(&[MsgId(4)]);
        assert_eq!(bodies(&mut service), vec![vec![1; 4]]);
    }

    #[tokio::test]
    async fn cancel_sent_request_drops_answer() {
        let (mut service, handle) = service();
        let response = handle.enqueue(Request::new(vec![1; 4]));
        service.process_commands();
        bodies(&mut service);
        service.messages_assigned(&[MsgId(4)]);

        handle.cancel(response.id());
        service.process_commands();
        assert!(matches!(
            response.wait().await,
            Err(InvocationError::Dropped)
        ));
        assert_eq!(
            bodies(&mut service),
            vec![RpcDropAnswer { req_msg_id: 4 }.to_bytes()]
        );

        // A late answer is ignored.
        service.received_message(&Deserialization::RpcResult(RpcResult {
            msg_id: MsgId(4),
            body: vec![9; 4],
        }));
        assert!(service.entries.is_empty());
    }

    #[tokio::test]
    async fn dependent_request_waits_and_is_wrapped() {
        let (mut service, handle) = service();
        let first = handle.enqueue(Request::new(vec![1; 4]));
        handle.enqueue(Request::new(vec![2; 4]).after(first.id()));
        service.process_commands();

        // Only the first one can go out.
        assert_eq!(bodies(&mut service), vec![vec![1; 4]]);
        service.messages_assigned(&[MsgId(8)]);

        assert_eq!(
            bodies(&mut service),
            vec![
                InvokeAfterMsg {
                    msg_id: 8,
                    query: Blob(vec![2; 4]),
                }
                .to_bytes()
            ]
        );
    }

    #[tokio::test]
    async fn password_needed_holds_dependent_requests() {
        let calls = Arc::new(AtomicU64::new(0));
        let (service, handle) = service();
        let counter = Arc::clone(&calls);
        let mut service = service.with_password_input_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let login = handle.enqueue(Request::new(vec![1; 4]));
        service.process_commands();
        bodies(&mut service);
        service.messages_assigned(&[MsgId(4)]);
        service.received_message(&rpc_error(MsgId(4), "SESSION_PASSWORD_NEEDED"));
        assert!(login.wait().await.unwrap_err().is("SESSION_PASSWORD_NEEDED"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.enqueue(Request::new(vec![2; 4]).depends_on_password_entry(true));
        handle.enqueue(Request::new(vec![3; 4]));
        service.process_commands();
        assert_eq!(bodies(&mut service), vec![vec![3; 4]]);
        service.messages_assigned(&[MsgId(8)]);

        handle.password_entry_completed();
        service.process_commands();
        assert_eq!(bodies(&mut service), vec![vec![2; 4]]);
    }

    struct RetryOnce;

    impl RetryPolicy for RetryOnce {
        fn should_continue_execution(
            &self,
            _: &InvocationError,
            context: &RequestErrorContext,
        ) -> ControlFlow<(), Duration> {
            if context.server_errors < 2 {
                ControlFlow::Continue(Duration::ZERO)
            } else {
                ControlFlow::Break(())
            }
        }
    }

    #[tokio::test]
    async fn retry_policy_is_consulted() {
        let (mut service, handle) = service();
        let response = handle.enqueue(Request::new(vec![1; 4]).retry_policy(Arc::new(RetryOnce)));
        service.process_commands();
        bodies(&mut service);
        service.messages_assigned(&[MsgId(4)]);

        service.received_message(&rpc_error(MsgId(4), "FLOOD_WAIT_3"));
        assert_eq!(bodies(&mut service), vec![vec![1; 4]]);
        service.messages_assigned(&[MsgId(8)]);
        assert_eq!(service.entries[0].errors.flood_wait_seconds, 3);

        service.received_message(&rpc_error(MsgId(8), "FLOOD_WAIT_3"));
        let error = response.wait().await.unwrap_err();
        assert!(error.is("FLOOD_WAIT"));
    }

    #[tokio::test]
    async fn timeout_and_answer_complete_once() {
        let (mut service, handle) = service();
        let response = handle.enqueue(Request::new(vec![1; 4]).timeout(Duration::from_millis(10)));
        service.process_commands();
        bodies(&mut service);
        service.messages_assigned(&[MsgId(4)]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        service.process_commands();
        service.received_message(&Deserialization::RpcResult(RpcResult {
            msg_id: MsgId(4),
            body: vec![9; 4],
        }));

        assert!(matches!(
            response.wait().await,
            Err(InvocationError::Timeout)
        ));
        // The answer is no longer wanted.
        assert_eq!(
            bodies(&mut service),
            vec![RpcDropAnswer { req_msg_id: 4 }.to_bytes()]
        );
    }

    #[tokio::test]
    async fn rejected_message_completes_only_its_request() {
        let (mut service, handle) = service();
        let bad = handle.enqueue(Request::new(vec![1; 4]));
        handle.enqueue(Request::new(vec![2; 4]));
        service.process_commands();
        assert_eq!(bodies(&mut service).len(), 2);

        let error = PushError::TooLarge {
            len: 4,
            max_len: 0,
        };
        service.message_rejected(0, &error);
        service.messages_assigned(&[]);

        assert!(matches!(
            bad.wait().await,
            Err(InvocationError::InvalidRequest(PushError::TooLarge { .. }))
        ));
        assert_eq!(bodies(&mut service), vec![vec![2; 4]]);
    }

    #[tokio::test]
    async fn unpadded_body_never_reaches_the_queue() {
        let (mut service, handle) = service();
        let response = handle.enqueue(Request::new(vec![1; 3]));
        service.process_commands();

        assert!(service.entries.is_empty());
        assert!(matches!(
            response.wait().await,
            Err(InvocationError::InvalidRequest(PushError::NotPadded { len: 3 }))
        ));
    }
}
