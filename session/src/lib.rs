//! Session orchestration for Courier.
//!
//! # Architecture
//!
//! The crate turns a callback-driven [`Transport`] into cancellable,
//! observable request futures:
//!
//! - [`SessionController`] - the orchestrator. Creates transport tasks under a
//!   serialized critical section, registers a handler per task, notifies the
//!   observer, and returns the settled [`RequestOutcome`] unchanged.
//! - [`HandlerRegistry`] - concurrent map from transport task identifier to
//!   the handler receiving that task's callbacks.
//! - [`RequestHandler`] - per-request state: body accumulation or streaming
//!   file writes, progress deltas, and a settle-exactly-once completion.
//! - [`HttpTransport`] - the shipped transport, built on `reqwest` with the
//!   pinning verifier wired into its TLS configuration.
//!
//! # Ordering guarantees
//!
//! For every task identifier, under all interleavings: registration
//! happens-before task start, task start happens-before any callback is
//! routed, `will_perform_request` fires strictly before start, and
//! `did_perform_request` fires after settlement and before registry removal.
//! A task identifier maps to exactly one handler for its entire lifetime.
//!
//! # Cancellation
//!
//! Tokens are checked twice before any transport resource is allocated: once
//! synchronously at call time and once after the hand-off to the background
//! initiation context. The early-cancelled path has no side effects: no
//! transport resources are allocated and neither observer hook fires.
//! In-flight cancellation is
//! cooperative; [`SessionController::invalidate_and_cancel`] is the one
//! mechanism that forcibly tears down every outstanding task at once.

mod controller;
mod future;
mod handler;
mod http;
mod registry;
mod transport;

pub use controller::{NoopObserver, SessionController, SessionObserver};
pub use future::{Completion, CompletionDropped, CompletionSource};
pub use handler::RequestHandler;
pub use http::{HttpTransport, HttpTransportConfig};
pub use registry::HandlerRegistry;
pub use transport::{
    CacheDecision, RequestKind, TaskCompletion, Transport, TransportDelegate, TransportRequest,
};
