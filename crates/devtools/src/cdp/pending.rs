//! Pending Table - command id to awaiting completion
//!
//! Every entry leaves the table exactly once, through `take`. Whoever wins
//! the `take` owns the completion; everyone else finds nothing and moves on.

use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::command::RemoteError;
use super::protocol::CommandId;
use crate::error::CDPError;

/// What a pending command gets resolved with
#[derive(Debug)]
pub enum Resolution {
    /// Remote success, raw result body
    Result(Value),
    /// Remote domain failure
    Error(RemoteError),
    /// Local failure: transport, teardown, cancel, timeout
    Failed(CDPError),
}

type Completer = Box<dyn FnOnce(Resolution) + Send + Sync>;

/// An awaiting command. The completer knows the result type and the
/// failure factory; the table does not.
pub struct PendingCommand {
    pub id: CommandId,
    pub method: String,
    complete: Completer,
}

impl PendingCommand {
    pub fn new(
        id: CommandId,
        method: impl Into<String>,
        complete: impl FnOnce(Resolution) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            complete: Box::new(complete),
        }
    }

    /// Consume the entry and complete its future.
    ///
    /// Runs on the dispatch loop, so a panicking decoder must not escape.
    pub fn resolve(self, resolution: Resolution) {
        let id = self.id;
        let complete = self.complete;
        if catch_unwind(AssertUnwindSafe(move || complete(resolution))).is_err() {
            tracing::error!("Completion for command {} panicked", id);
        }
    }
}

impl std::fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommand")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: DashMap<CommandId, PendingCommand>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, command: PendingCommand) {
        let id = command.id;
        if let Some(previous) = self.entries.insert(id, command) {
            // ids are never reused, so this is a bug upstream
            tracing::error!("Duplicate pending command id {}", id);
            previous.resolve(Resolution::Failed(CDPError::Cancelled(id)));
        }
    }

    /// Remove and return the entry. A take, never a peek.
    pub fn take(&self, id: CommandId) -> Option<PendingCommand> {
        self.entries.remove(&id).map(|(_, command)| command)
    }

    /// Take everything currently in the table.
    pub fn drain(&self) -> Vec<PendingCommand> {
        let ids: Vec<CommandId> = self.entries.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.take(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
