//! CDP-style session core
//!
//! Core principle: one connection, many commands in flight, one event stream.
//! One writer task owns the sink; callers hand it frames through a queue.
//!
//! ```text
//! caller -> CDPClient::send -> PendingTable + outbound queue -> writer -> FrameSink
//! FrameStream -> reader -> InboundFrame::parse -> PendingTable::take | EventRegistry::dispatch
//! ```

pub mod client;
pub mod command;
pub mod id;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use client::{CDPClient, SessionState};
pub use command::{
    Command, CommandFailure, CommandFuture, CommandOutcome, Empty, Event, RawCommand, RemoteError,
};
pub use protocol::{CDPRequest, CommandId, InboundFrame, ResponseOutcome};
pub use registry::EventHandler;
pub use transport::{
    FrameSink, FrameStream, MemoryTransport, RemoteEnd, Transport, WebSocketTransport,
};
