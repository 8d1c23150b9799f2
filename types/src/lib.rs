//! Core domain types for Courier.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the session stack: request descriptors,
//! task identifiers, cancellation tokens, and the three-way request outcome.

mod descriptor;
mod ids;
mod outcome;
mod token;

pub use descriptor::{Method, MethodParseError, RequestDescriptor};
pub use ids::TaskId;
pub use outcome::{RequestOutcome, ResponseSnapshot, SuccessResponse, TransportError};
pub use token::CancellationToken;

use std::sync::Arc;

/// Progress callback shape shared by upload and download requests.
///
/// Invoked as `(transferred, total)` where `total` may be zero when the
/// transport cannot determine the expected length up front.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;
