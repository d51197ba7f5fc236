//! CDP Client - the session core
//!
//! Design decisions:
//! 1. One transport per client. Every command and event rides the same pipe.
//! 2. One writer task owns the sink, one reader task owns the stream.
//!    Callers talk to the writer through a queue, never through a lock.
//! 3. Request/response matching via id. Entries go into the pending table
//!    before the frame is written, and come out exactly once.
//! 4. Fail fast. Closing fails everything still pending; sends after that
//!    are rejected without touching the transport.

use futures_util::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;

use super::command::{
    Command, CommandFailure, CommandFuture, CommandOutcome, Event, RawCommand, RemoteError,
};
use super::id::IdGenerator;
use super::pending::{PendingCommand, PendingTable, Resolution};
use super::protocol::{empty_object, CDPRequest, CommandId, InboundFrame, ResponseOutcome};
use super::registry::{self, typed_handler, EventHandler, EventRegistry};
use super::transport::{FrameSink, FrameStream, Transport};
use crate::error::{CDPError, ProtocolError, TransportError};
use crate::events::{CloseReason, EventBus, SessionEvent};
use crate::session::SessionConfig;

/// Session lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

enum Outbound {
    Frame { id: CommandId, text: String },
    Close,
}

/// State shared between the client handle and its two tasks.
struct Shared {
    session_id: String,
    ids: IdGenerator,
    pending: PendingTable,
    registry: EventRegistry,
    state: watch::Sender<SessionState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: Notify,
    lifecycle: EventBus,
}

/// CDP Client - one live session over one transport
pub struct CDPClient {
    shared: Arc<Shared>,
    command_timeout: Option<Duration>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CDPClient {
    /// Start a session over an already-connected transport.
    ///
    /// Spawns the reader and writer tasks, so this must run inside a tokio
    /// runtime.
    pub fn start(transport: Transport) -> Arc<Self> {
        Self::start_with_config(transport, &SessionConfig::default())
    }

    pub fn start_with_config(transport: Transport, config: &SessionConfig) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Connecting);

        let shared = Arc::new(Shared {
            session_id: config.id.clone(),
            ids: IdGenerator::new(),
            pending: PendingTable::new(),
            registry: EventRegistry::new(),
            state,
            outbound: outbound_tx,
            shutdown: Notify::new(),
            lifecycle: EventBus::new(),
        });

        // open before the reader runs, or frames arriving right away get dropped
        shared.state.send_replace(SessionState::Open);

        let Transport { sink, inbound } = transport;
        let writer = tokio::spawn(write_loop(shared.clone(), sink, outbound_rx));
        let reader = tokio::spawn(read_loop(shared.clone(), inbound));

        tracing::info!(session = %shared.session_id, "Session open");
        shared.lifecycle.publish(SessionEvent::Opened {
            session_id: shared.session_id.clone(),
        });

        Arc::new(Self {
            shared,
            command_timeout: config.command_timeout(),
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    /// A handle that doesn't keep the session alive.
    ///
    /// Handlers live in the session's registry, so a handler that captured
    /// an `Arc<CDPClient>` would keep the client from ever dropping. Capture
    /// this instead and `upgrade` when the handler runs.
    pub fn downgrade(self: &Arc<Self>) -> Weak<Self> {
        Arc::downgrade(self)
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Commands still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Open/close notifications for this session
    pub fn lifecycle(&self) -> &EventBus {
        &self.shared.lifecycle
    }

    /// Resolves once the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    /// Send a command. Returns immediately; the future resolves when the
    /// response arrives, the command is cancelled, or the session closes.
    pub fn send<C: Command>(&self, command: C) -> CommandFuture<C::Response, C::Failure> {
        self.shared.send(command)
    }

    /// Send an untyped command
    pub fn send_raw(
        &self,
        method: impl Into<String>,
        params: Value,
    ) -> CommandFuture<Value, RemoteError> {
        self.send(RawCommand::new(method, params))
    }

    /// Send a command and run `continuation` on `handle` with the outcome.
    ///
    /// Keeps caller-side work off the reader task.
    pub fn send_on<C, F, R>(&self, command: C, handle: &Handle, continuation: F) -> JoinHandle<R>
    where
        C: Command,
        F: FnOnce(CommandOutcome<C>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.send(command).spawn_on(handle, continuation)
    }

    /// Send a command and block the calling thread until it resolves.
    ///
    /// Not usable from an event handler or from a tokio runtime thread:
    /// both would block the loop that has to deliver the response. Those
    /// cases are rejected before anything is sent.
    pub fn call<C: Command>(&self, command: C) -> CommandOutcome<C> {
        if registry::in_dispatch() {
            return Err(CDPError::BlockingCallInDispatch);
        }
        if Handle::try_current().is_ok() {
            return Err(CDPError::BlockingCallInRuntime);
        }
        self.send(command).wait()
    }

    /// Send a command, giving up after `timeout`.
    ///
    /// On expiry the pending entry is cancelled, so a late response is
    /// dropped like any other unknown id.
    pub async fn send_timeout<C: Command>(
        &self,
        command: C,
        timeout: Duration,
    ) -> CommandOutcome<C> {
        let future = self.send(command);
        let Some(id) = future.id() else {
            return future.await;
        };

        match tokio::time::timeout(timeout, future).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!("Command {} timed out after {:?}", id, timeout);
                self.shared.fail_pending(id, CDPError::Timeout(id));
                Err(CDPError::Timeout(id))
            }
        }
    }

    /// Send a command with the configured default timeout, if any.
    pub async fn execute<C: Command>(&self, command: C) -> CommandOutcome<C> {
        match self.command_timeout {
            Some(timeout) => self.send_timeout(command, timeout).await,
            None => self.send(command).await,
        }
    }

    /// Fail a pending command locally. Nothing is sent to the remote.
    ///
    /// Returns false if the command already resolved or never existed.
    pub fn cancel(&self, id: CommandId) -> bool {
        self.shared.fail_pending(id, CDPError::Cancelled(id))
    }

    /// Install the handler for `E`, replacing any previous one.
    ///
    /// To send commands from the handler, capture [`CDPClient::downgrade`]
    /// rather than a clone of the client.
    pub fn on<E, F>(&self, handler: F)
    where
        E: Event,
        F: Fn(E) + Send + Sync + 'static,
    {
        self.set_handler(E::NAME, Some(typed_handler(handler)));
    }

    /// Stop delivering `method` events
    pub fn off(&self, method: &str) {
        self.set_handler(method, None);
    }

    /// Install, replace, or clear (`None`) the raw handler for `method`.
    ///
    /// Ignored once the session has started closing.
    pub fn set_handler(&self, method: impl Into<String>, handler: Option<EventHandler>) {
        let installing = handler.is_some();
        if installing && self.state() != SessionState::Open {
            tracing::debug!("Ignoring handler registration on closed session");
            return;
        }
        let method = method.into();
        self.shared.registry.set(method.clone(), handler);

        // teardown may have cleared the registry between the check and the set
        if installing && self.state() != SessionState::Open {
            self.shared.registry.set(method, None);
        }
    }

    /// Close the session: fail everything pending, drop all handlers,
    /// flush and close the transport.
    pub async fn close(&self) {
        self.shared.teardown(CloseReason::Local);

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CDPClient {
    fn drop(&mut self) {
        self.shared.teardown(CloseReason::Local);
    }
}

impl std::fmt::Debug for CDPClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CDPClient")
            .field("session_id", &self.shared.session_id)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn send<C: Command>(&self, command: C) -> CommandFuture<C::Response, C::Failure> {
        if self.state() != SessionState::Open {
            return CommandFuture::failed(None, CDPError::SessionClosed);
        }

        let method = command.method().to_string();
        let mut params = match serde_json::to_value(&command) {
            Ok(params) => params,
            Err(e) => return CommandFuture::failed(None, e.into()),
        };
        if params.is_null() {
            params = empty_object();
        }

        let id = self.ids.next_id();
        let text = match serde_json::to_string(&CDPRequest {
            id,
            method: method.clone(),
            params,
        }) {
            Ok(text) => text,
            Err(e) => return CommandFuture::failed(Some(id), e.into()),
        };

        let (tx, rx) = oneshot_pair::<C>();
        let decode_method = method.clone();
        self.pending.insert(PendingCommand::new(id, method.clone(), move |resolution| {
            let outcome = match resolution {
                Resolution::Result(value) => {
                    Ok(serde_json::from_value::<C::Response>(value).map_err(|e| {
                        tracing::warn!("Result of {} did not decode: {}", decode_method, e);
                        C::Failure::from_decode(&decode_method, e)
                    }))
                }
                Resolution::Error(error) => Ok(Err(C::Failure::from_remote(error))),
                Resolution::Failed(error) => Err(error),
            };
            let _ = tx.send(outcome); // receiver may have been dropped
        }));

        // teardown may have drained the table between the check and the insert
        if self.state() != SessionState::Open {
            self.fail_pending(id, CDPError::SessionClosed);
            return CommandFuture::new(id, rx);
        }

        if self.outbound.send(Outbound::Frame { id, text }).is_err() {
            self.fail_pending(id, TransportError::Closed.into());
        } else {
            tracing::debug!(session = %self.session_id, "-> {} {}", id, method);
        }
        CommandFuture::new(id, rx)
    }

    fn fail_pending(&self, id: CommandId, error: CDPError) -> bool {
        match self.pending.take(id) {
            Some(command) => {
                command.resolve(Resolution::Failed(error));
                true
            }
            None => false,
        }
    }

    /// Route one inbound frame. Nothing in here may panic out or block.
    fn handle_frame(&self, text: &str) {
        if self.state() != SessionState::Open {
            return;
        }

        match InboundFrame::parse(text) {
            Ok(InboundFrame::Response { id, outcome }) => self.complete(id, outcome),
            Ok(InboundFrame::Notification { method, params }) => {
                if !self.registry.dispatch(&method, &params) {
                    tracing::trace!("No delivery for event {}", method);
                }
            }
            Err(e) => {
                tracing::warn!(session = %self.session_id, "Dropping frame: {}", e);
            }
        }
    }

    fn complete(&self, id: CommandId, outcome: ResponseOutcome) {
        let Some(command) = self.pending.take(id) else {
            tracing::warn!(
                session = %self.session_id,
                "Dropping frame: {}",
                ProtocolError::UnknownResponse(id)
            );
            return;
        };

        tracing::debug!(session = %self.session_id, "<- {} {}", id, command.method);
        command.resolve(match outcome {
            ResponseOutcome::Success(result) => Resolution::Result(result),
            ResponseOutcome::Failure(error) => Resolution::Error(error),
        });
    }

    /// Open -> Closing -> Closed. Only the first caller does the work.
    fn teardown(&self, reason: CloseReason) {
        let began = self.state.send_if_modified(|state| match *state {
            SessionState::Connecting | SessionState::Open => {
                *state = SessionState::Closing;
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        });
        if !began {
            return;
        }

        tracing::info!(session = %self.session_id, "Session closing: {:?}", reason);
        self.registry.clear();

        let drained = self.pending.drain();
        if !drained.is_empty() {
            tracing::debug!("Failing {} pending commands", drained.len());
        }
        for command in drained {
            command.resolve(Resolution::Failed(CDPError::SessionClosed));
        }

        let _ = self.outbound.send(Outbound::Close);
        self.shutdown.notify_one();

        self.state.send_replace(SessionState::Closed);
        self.lifecycle.publish(SessionEvent::Closed {
            session_id: self.session_id.clone(),
            reason,
        });
    }
}

type OutcomeSender<C> = tokio::sync::oneshot::Sender<CommandOutcome<C>>;
type OutcomeReceiver<C> = tokio::sync::oneshot::Receiver<CommandOutcome<C>>;

fn oneshot_pair<C: Command>() -> (OutcomeSender<C>, OutcomeReceiver<C>) {
    tokio::sync::oneshot::channel()
}

async fn read_loop(shared: Arc<Shared>, mut inbound: FrameStream) {
    let reason = loop {
        tokio::select! {
            _ = shared.shutdown.notified() => break None,
            msg = inbound.next() => match msg {
                Some(Ok(text)) => shared.handle_frame(&text),
                Some(Err(TransportError::Closed)) | None => {
                    tracing::info!(session = %shared.session_id, "Transport closed");
                    break Some(CloseReason::RemoteClosed);
                }
                Some(Err(e)) => {
                    tracing::error!(session = %shared.session_id, "Transport error: {}", e);
                    break Some(CloseReason::TransportFailed(e.to_string()));
                }
            }
        }
    };

    if let Some(reason) = reason {
        shared.teardown(reason);
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    mut sink: Box<dyn FrameSink>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(msg) = outbound.recv().await {
        let (id, text) = match msg {
            Outbound::Frame { id, text } => (id, text),
            Outbound::Close => break,
        };
        if shared.state() != SessionState::Open {
            continue;
        }

        if let Err(e) = sink.send_frame(text).await {
            tracing::error!(session = %shared.session_id, "Failed to send command {}: {}", id, e);
            let fatal = e.is_fatal();
            let reason = CloseReason::TransportFailed(e.to_string());
            shared.fail_pending(id, CDPError::Transport(e));
            if fatal {
                shared.teardown(reason);
            }
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("Error closing transport: {}", e);
    }
}
