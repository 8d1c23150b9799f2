//! The transport interface.
//!
//! A [`Transport`] is the opaque, callback-driven engine that actually moves
//! bytes: it allocates task identifiers, starts tasks, and delivers events to
//! a [`TransportDelegate`] wired once at session construction. Callbacks may
//! arrive concurrently across distinct tasks but strictly serially per
//! individual task.

use std::path::PathBuf;
use std::sync::Weak;

use bytes::Bytes;

use courier_types::{RequestDescriptor, ResponseSnapshot, TaskId, TransportError};

/// The three request kinds the session layer orchestrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Data,
    Upload,
    Download,
}

impl RequestKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Upload => "upload",
            Self::Download => "download",
        }
    }
}

/// Everything a transport needs to run one task.
///
/// The upload source path rides here because the transport reads and streams
/// the file body; the download destination does not, because incoming bytes
/// are routed through the delegate to the handler that owns the file.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub descriptor: RequestDescriptor,
    pub kind: RequestKind,
    pub source_path: Option<PathBuf>,
}

/// Terminal event for a task. Cancellation is distinct from failure so the
/// outcome taxonomy survives the trip through the transport.
#[derive(Debug)]
pub enum TaskCompletion {
    Finished,
    Failed(TransportError),
    Cancelled,
}

/// Verdict on a response the transport proposes to cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    Cache,
    DoNotCache,
}

/// Receiver of transport callbacks.
///
/// Implementations must tolerate calls from transport-internal threads. For a
/// given task identifier, `did_receive_response` precedes any
/// `did_receive_data`, and exactly one completion callback ends the sequence.
pub trait TransportDelegate: Send + Sync {
    fn did_receive_response(&self, task: TaskId, response: ResponseSnapshot);

    fn did_receive_data(&self, task: TaskId, chunk: Bytes);

    /// Cumulative upload progress: `sent` bytes of an expected `total`.
    fn did_send_body_data(&self, task: TaskId, sent: u64, total: u64);

    fn did_complete(&self, task: TaskId, completion: TaskCompletion);

    /// Asked once per response the transport would cache.
    fn proposed_cache_response(
        &self,
        task: TaskId,
        response: &ResponseSnapshot,
    ) -> CacheDecision;
}

/// The callback-driven transport underneath a session.
pub trait Transport: Send + Sync {
    /// Wire the delegate. Set exactly once, before any task is created.
    fn set_delegate(&self, delegate: Weak<dyn TransportDelegate>);

    /// Allocate a task for the request. The returned identifier is unique
    /// among concurrently active tasks; callers serialize invocations, so
    /// implementations need not defend the allocation path against races.
    fn create_task(&self, request: TransportRequest) -> Result<TaskId, TransportError>;

    /// Start a previously created task. Callbacks may begin arriving on
    /// transport-internal threads as soon as this returns.
    fn start_task(&self, task: TaskId);

    /// Synchronously invalidate the transport and cancel all outstanding
    /// tasks. Each outstanding task receives a cancellation completion;
    /// subsequent `create_task` calls fail.
    fn invalidate_and_cancel(&self);
}
