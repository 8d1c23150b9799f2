//! Cooperative cancellation tokens.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Externally owned cancellation signal.
///
/// The token is queryable at any time from any thread. The session layer never
/// owns a token; it only reads it at its two cancellation checkpoints. Clones
/// share the same underlying flag, and cancellation is sticky: once requested
/// it can never be un-requested.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
