//! Completion futures.
//!
//! [`CompletionSource`] and [`Completion`] are the promise/future pair the
//! handlers settle and the controller awaits. Settlement is exactly-once: the
//! first settle wins and every later settle is dropped. The settled flag is
//! queryable, which is what lets handlers drop stale transport callbacks that
//! arrive after a task has already settled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::oneshot;

/// The source half settled the value, or was dropped before settling.
#[derive(Debug, Error)]
#[error("completion source dropped before settling")]
pub struct CompletionDropped;

/// The settling half of a completion pair.
///
/// Cheap to clone; all clones share the same settle-exactly-once state.
#[derive(Debug, Clone)]
pub struct CompletionSource<T> {
    shared: Arc<Shared<T>>,
}

#[derive(Debug)]
struct Shared<T> {
    settled: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionSource<T> {
    /// Create a completion pair.
    ///
    /// The channel buffers a settlement delivered before the continuation is
    /// awaited, so attaching the continuation and starting the producer can
    /// happen in either order without losing the value.
    #[must_use]
    pub fn new() -> (Self, Completion<T>) {
        let (sender, receiver) = oneshot::channel();
        let source = Self {
            shared: Arc::new(Shared {
                settled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
            }),
        };
        (source, Completion { receiver })
    }

    /// Settle the completion. Returns `true` if this call settled it; later
    /// calls return `false` and drop their value.
    pub fn settle(&self, value: T) -> bool {
        if self.shared.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        let sender = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            // A dropped receiver is fine: the settlement had no remaining
            // consumer, but the settled flag still flips exactly once.
            let _ = sender.send(value);
        }
        true
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.settled.load(Ordering::Acquire)
    }
}

/// The awaiting half of a completion pair.
#[derive(Debug)]
pub struct Completion<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    /// Wait for settlement.
    pub async fn wait(self) -> Result<T, CompletionDropped> {
        self.receiver.await.map_err(|_| CompletionDropped)
    }
}
