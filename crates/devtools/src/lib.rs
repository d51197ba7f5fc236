//! DevTools Session Runtime
//!
//! Client side of a DevTools-style remote debugging protocol: one persistent
//! connection, many concurrent commands each waiting on its own response,
//! and a stream of fire-and-forget events.
//!
//! # Architecture
//!
//! 1. **Generic core**: the session only moves ids, method names and opaque
//!    JSON. Typed encode/decode lives at the call boundary (`Command`, `Event`).
//! 2. **Per-session state**: every `CDPClient` owns its own id counter,
//!    pending table and handler registry. No globals.
//! 3. **Failures are values**: a remote "no" is `Ok(Err(failure))`. `Err(..)`
//!    is reserved for transport, teardown, cancel and misuse.

pub mod cdp;
pub mod error;
pub mod events;
pub mod session;

pub use cdp::{CDPClient, Command, CommandFuture, Event, RemoteError, SessionState};
pub use error::{CDPError, Result, TransportError};
pub use events::{CloseReason, EventBus, SessionEvent};
pub use session::{connect, SessionConfig};
