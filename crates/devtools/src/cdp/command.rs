//! Typed adapter layer
//!
//! The core moves opaque JSON. This module is where types come in:
//! commands know their method name and result type, events know their
//! name and payload type, failures know how to build themselves.
//!
//! A command future resolves to `Result<Result<Response, Failure>, CDPError>`.
//! The outer error is for us (transport, teardown, cancel). The inner one is
//! the remote side saying no, and it is a value, not an exception.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::protocol::CommandId;
use crate::error::{CDPError, Result};

/// JSON-RPC "parse error", used when a result body doesn't decode.
pub const DECODE_FAILURE_CODE: i64 = -32700;

/// Remote failure as reported by the other end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RemoteError {}

/// Failure factory for a command's error half.
pub trait CommandFailure: Sized + Send + 'static {
    fn from_remote(error: RemoteError) -> Self;

    /// The result came back but didn't match the declared type.
    fn from_decode(method: &str, error: serde_json::Error) -> Self {
        Self::from_remote(RemoteError::new(
            DECODE_FAILURE_CODE,
            format!("failed to decode result of {}: {}", method, error),
        ))
    }
}

impl CommandFailure for RemoteError {
    fn from_remote(error: RemoteError) -> Self {
        error
    }
}

/// A command with a typed result
pub trait Command: Serialize {
    type Response: DeserializeOwned + Send + 'static;
    type Failure: CommandFailure;

    /// Wire method name, e.g. `Page.navigate`
    fn method(&self) -> &str;
}

/// An event with a typed payload
pub trait Event: DeserializeOwned + Send + 'static {
    /// Wire method name, e.g. `Page.loadEventFired`
    const NAME: &'static str;
}

/// Result body for commands that return `{}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Untyped command: any method, raw params, raw result.
#[derive(Debug, Clone)]
pub struct RawCommand {
    pub method: String,
    pub params: Value,
}

impl RawCommand {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

impl Serialize for RawCommand {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        self.params.serialize(serializer)
    }
}

impl Command for RawCommand {
    type Response = Value;
    type Failure = RemoteError;

    fn method(&self) -> &str {
        &self.method
    }
}

/// What a command future yields
pub type CommandOutcome<C> =
    Result<std::result::Result<<C as Command>::Response, <C as Command>::Failure>>;

/// Single-assignment handle on a command's eventual outcome.
///
/// Await it, block on it with [`CommandFuture::wait`], or hand it to
/// another runtime with [`CommandFuture::spawn_on`].
#[must_use = "a command future does nothing unless awaited"]
pub struct CommandFuture<T, E> {
    id: Option<CommandId>,
    rx: oneshot::Receiver<Result<std::result::Result<T, E>>>,
}

impl<T, E> CommandFuture<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(
        id: CommandId,
        rx: oneshot::Receiver<Result<std::result::Result<T, E>>>,
    ) -> Self {
        Self { id: Some(id), rx }
    }

    /// A future that is already done. Used when the command never got an id
    /// or never made it into the table.
    pub(crate) fn failed(id: Option<CommandId>, error: CDPError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { id, rx }
    }

    /// The id assigned at send time, if the command got that far.
    pub fn id(&self) -> Option<CommandId> {
        self.id
    }

    /// Block the current thread until the command resolves.
    ///
    /// Refuses to run on a tokio runtime thread or inside an event
    /// handler, either of which could starve the loop that would resolve it.
    pub fn wait(self) -> Result<std::result::Result<T, E>> {
        if super::registry::in_dispatch() {
            return Err(CDPError::BlockingCallInDispatch);
        }
        if Handle::try_current().is_ok() {
            return Err(CDPError::BlockingCallInRuntime);
        }
        self.rx.blocking_recv().unwrap_or(Err(CDPError::SessionClosed))
    }

    /// Run `continuation` on `handle` once the command resolves.
    pub fn spawn_on<F, R>(self, handle: &Handle, continuation: F) -> JoinHandle<R>
    where
        F: FnOnce(Result<std::result::Result<T, E>>) -> R + Send + 'static,
        R: Send + 'static,
    {
        handle.spawn(async move { continuation(self.await) })
    }
}

impl<T, E> Future for CommandFuture<T, E> {
    type Output = Result<std::result::Result<T, E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // completer dropped without firing: only happens on teardown
            Poll::Ready(Err(_)) => Poll::Ready(Err(CDPError::SessionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> std::fmt::Debug for CommandFuture<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandFuture").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    #[derive(Debug, PartialEq)]
    struct NavigateFailed {
        code: i64,
        reason: String,
    }

    impl CommandFailure for NavigateFailed {
        fn from_remote(error: RemoteError) -> Self {
            Self {
                code: error.code,
                reason: error.message,
            }
        }
    }

    #[test]
    fn default_decode_failure_uses_parse_error_code() {
        let err = serde_json::from_value::<Empty>(json!(42)).unwrap_err();
        let failure = RemoteError::from_decode("Page.enable", err);
        assert_eq!(failure.code, DECODE_FAILURE_CODE);
        assert!(failure.message.contains("Page.enable"));
    }

    #[test]
    fn custom_failure_type_builds_from_remote() {
        let failure = NavigateFailed::from_remote(RemoteError::new(-32000, "no such frame"));
        assert_eq!(
            failure,
            NavigateFailed {
                code: -32000,
                reason: "no such frame".to_string()
            }
        );
    }

    #[test]
    fn raw_command_serializes_as_params() {
        let cmd = RawCommand::new("Page.navigate", json!({"url": "http://x"}));
        assert_eq!(cmd.method(), "Page.navigate");
        assert_eq!(serde_json::to_value(&cmd).unwrap(), json!({"url": "http://x"}));
    }

    #[test]
    fn empty_result_decodes_from_empty_object() {
        let empty: Empty = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, Empty {});
    }

    #[tokio::test]
    async fn failed_future_resolves_immediately() {
        let fut: CommandFuture<Empty, RemoteError> =
            CommandFuture::failed(Some(4), CDPError::SessionClosed);
        assert_eq!(fut.id(), Some(4));
        assert!(matches!(fut.await, Err(CDPError::SessionClosed)));
    }

    #[test]
    fn future_is_pending_until_completed() {
        let (tx, rx) = oneshot::channel();
        let mut fut = task::spawn(CommandFuture::<Empty, RemoteError>::new(2, rx));
        assert_pending!(fut.poll());

        let _ = tx.send(Ok(Err(RemoteError::new(-32000, "nope"))));
        assert!(fut.is_woken());
        match assert_ready!(fut.poll()) {
            Ok(Err(failure)) => assert_eq!(failure.message, "nope"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn dropped_completer_reads_as_session_closed() {
        let (tx, rx) = oneshot::channel();
        let mut fut = task::spawn(CommandFuture::<Empty, RemoteError>::new(3, rx));
        assert_pending!(fut.poll());

        drop(tx);
        assert!(matches!(
            assert_ready!(fut.poll()),
            Err(CDPError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn wait_refuses_inside_runtime() {
        let (_tx, rx) = oneshot::channel::<Result<std::result::Result<Empty, RemoteError>>>();
        let fut = CommandFuture::new(1, rx);
        assert!(matches!(fut.wait(), Err(CDPError::BlockingCallInRuntime)));
    }

    #[test]
    fn wait_blocks_until_resolved() {
        let (tx, rx) = oneshot::channel();
        let fut: CommandFuture<Empty, RemoteError> = CommandFuture::new(1, rx);
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            let _ = tx.send(Ok(Ok(Empty {})));
        });
        assert_eq!(fut.wait().unwrap(), Ok(Empty {}));
    }

    #[test]
    fn spawn_on_runs_continuation_on_given_runtime() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, rx) = oneshot::channel();
        let fut: CommandFuture<Value, RemoteError> = CommandFuture::new(1, rx);

        let joined = fut.spawn_on(rt.handle(), |outcome| match outcome {
            Ok(Ok(value)) => value["answer"].as_i64(),
            _ => None,
        });
        let _ = tx.send(Ok(Ok(json!({"answer": 42}))));

        assert_eq!(rt.block_on(joined).unwrap(), Some(42));
    }
}
