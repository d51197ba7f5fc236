//! Error types for the session runtime
//!
//! Flat hierarchy, one enum per audience:
//! - `CDPError` is what a caller can get back from a command future.
//! - `TransportError` is what the wire can do to us.
//! - `ProtocolError` never leaves the dispatch loop. It only gets logged.
//!
//! Remote command failures are NOT here. They are values, see
//! [`crate::cdp::command::RemoteError`].

use thiserror::Error;

use crate::cdp::protocol::CommandId;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, CDPError>;

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session closed")]
    SessionClosed,

    #[error("Command {0} cancelled")]
    Cancelled(CommandId),

    #[error("Command {0} timed out")]
    Timeout(CommandId),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Blocking call issued from inside an event handler")]
    BlockingCallInDispatch,

    #[error("Blocking call issued from a tokio runtime thread")]
    BlockingCallInRuntime,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the connection is gone for good, not just this one frame.
    pub fn is_fatal(&self) -> bool {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match self {
            TransportError::Closed => true,
            TransportError::WebSocket(e) => matches!(
                e,
                WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_)
            ),
            TransportError::InvalidEndpoint(_) | TransportError::Io(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Response for unknown request: {0}")]
    UnknownResponse(CommandId),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
