//! The task-to-handler registry.

use std::sync::Arc;

use dashmap::DashMap;

use courier_types::TaskId;

use crate::handler::RequestHandler;

/// Concurrent map from transport task identifier to the handler receiving
/// that task's callbacks.
///
/// # Concurrency contract
///
/// Lookups run concurrently and never block on each other; transport callback
/// threads may look up at high frequency while a body streams. Inserts and
/// removes are rare (one of each per request), mutually exclusive per key, and
/// every write is visible to all subsequent lookups: an `insert` that returns
/// happens-before any `lookup` that finds the entry, so a callback routed
/// after task start always observes the registration that preceded the start.
/// Backed by a sharded map rather than per-entry locks.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    entries: DashMap<TaskId, Arc<RequestHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a task identifier.
    ///
    /// Invariant: at most one entry per identifier. The transport never hands
    /// out an identifier that is still registered, so a displaced entry is a
    /// bug in the transport, not a supported transition.
    pub fn insert(&self, task: TaskId, handler: Arc<RequestHandler>) {
        let displaced = self.entries.insert(task, handler);
        debug_assert!(
            displaced.is_none(),
            "task {task} registered while an entry was still live"
        );
        if displaced.is_some() {
            tracing::error!(task_id = %task, "handler registered over a live entry");
        }
    }

    #[must_use]
    pub fn lookup(&self, task: TaskId) -> Option<Arc<RequestHandler>> {
        self.entries.get(&task).map(|entry| Arc::clone(&entry))
    }

    pub fn remove(&self, task: TaskId) -> Option<Arc<RequestHandler>> {
        self.entries.remove(&task).map(|(_, handler)| handler)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
