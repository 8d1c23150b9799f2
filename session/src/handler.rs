//! Per-request handlers.
//!
//! A [`RequestHandler`] receives one task's transport callbacks and settles
//! that task's completion exactly once. The variant is selected at
//! construction from the request kind and never changes:
//!
//! - **Data** accumulates the response body in memory.
//! - **Upload** accumulates the response body and reports `(sent, total)`
//!   progress from the transport's body-send callbacks.
//! - **Download** streams incoming bytes to the destination path and reports
//!   `(received, expected)` progress per chunk.
//!
//! Callbacks that arrive after settlement are dropped: a late, stale transport
//! event for an already-settled task can neither mutate state nor settle the
//! completion a second time.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use courier_types::{
    CancellationToken, ProgressCallback, RequestOutcome, ResponseSnapshot, SuccessResponse,
    TransportError,
};

use crate::future::{Completion, CompletionSource};
use crate::transport::{RequestKind, TaskCompletion};

#[derive(Debug, Default)]
struct TransferState {
    response: Option<ResponseSnapshot>,
    body: Vec<u8>,
    writer: Option<BufWriter<File>>,
    received: u64,
    expected: u64,
}

/// Handler for one transport task.
pub struct RequestHandler {
    kind: RequestKind,
    token: CancellationToken,
    source: CompletionSource<RequestOutcome>,
    progress: Option<ProgressCallback>,
    destination: Option<PathBuf>,
    state: Mutex<TransferState>,
}

impl RequestHandler {
    /// Body-accumulating handler for plain data requests.
    #[must_use]
    pub fn data(token: CancellationToken) -> (Arc<Self>, Completion<RequestOutcome>) {
        Self::build(RequestKind::Data, token, None, None)
    }

    /// Upload handler reporting bytes-sent progress.
    #[must_use]
    pub fn upload(
        token: CancellationToken,
        on_progress: ProgressCallback,
    ) -> (Arc<Self>, Completion<RequestOutcome>) {
        Self::build(RequestKind::Upload, token, Some(on_progress), None)
    }

    /// Download handler streaming the body to `destination`.
    #[must_use]
    pub fn download(
        token: CancellationToken,
        destination: PathBuf,
        on_progress: ProgressCallback,
    ) -> (Arc<Self>, Completion<RequestOutcome>) {
        Self::build(
            RequestKind::Download,
            token,
            Some(on_progress),
            Some(destination),
        )
    }

    fn build(
        kind: RequestKind,
        token: CancellationToken,
        progress: Option<ProgressCallback>,
        destination: Option<PathBuf>,
    ) -> (Arc<Self>, Completion<RequestOutcome>) {
        let (source, completion) = CompletionSource::new();
        let handler = Arc::new(Self {
            kind,
            token,
            source,
            progress,
            destination,
            state: Mutex::new(TransferState::default()),
        });
        (handler, completion)
    }

    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.source.is_settled()
    }

    /// The last response seen for this task, if any.
    #[must_use]
    pub fn response_snapshot(&self) -> Option<ResponseSnapshot> {
        self.lock_state().response.clone()
    }

    /// Text snapshot of the accumulated body, for observer logging.
    ///
    /// Download bodies go to disk, so the snapshot is `None` for that variant.
    #[must_use]
    pub fn body_text(&self) -> Option<String> {
        match self.kind {
            RequestKind::Download => None,
            RequestKind::Data | RequestKind::Upload => {
                let state = self.lock_state();
                if state.body.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(&state.body).into_owned())
                }
            }
        }
    }

    pub(crate) fn handle_response(&self, response: ResponseSnapshot) {
        if self.is_settled() {
            return;
        }
        let mut state = self.lock_state();
        state.expected = response
            .header("content-length")
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0);
        state.response = Some(response);
    }

    pub(crate) fn handle_data(&self, chunk: &Bytes) {
        if self.is_settled() {
            return;
        }
        match self.kind {
            RequestKind::Data | RequestKind::Upload => {
                self.lock_state().body.extend_from_slice(chunk);
            }
            RequestKind::Download => self.write_chunk(chunk),
        }
    }

    pub(crate) fn handle_sent(&self, sent: u64, total: u64) {
        if self.is_settled() {
            return;
        }
        if self.kind == RequestKind::Upload
            && let Some(progress) = &self.progress
        {
            progress(sent, total);
        }
    }

    pub(crate) fn handle_completion(&self, completion: TaskCompletion) {
        if self.is_settled() {
            return;
        }
        let outcome = match completion {
            TaskCompletion::Cancelled => RequestOutcome::Cancelled,
            TaskCompletion::Failed(error) => RequestOutcome::Failure(error),
            TaskCompletion::Finished => self.finished_outcome(),
        };
        self.settle(outcome);
    }

    fn finished_outcome(&self) -> RequestOutcome {
        let mut state = self.lock_state();
        if let Some(writer) = state.writer.take() {
            let flushed = match writer.into_inner() {
                Ok(file) => file.sync_all(),
                Err(error) => Err(error.into_error()),
            };
            if let Err(error) = flushed {
                return RequestOutcome::Failure(TransportError::File(error));
            }
        }
        let Some(response) = state.response.clone() else {
            return RequestOutcome::Failure(TransportError::Interrupted {
                message: "task finished without delivering a response".to_string(),
            });
        };
        RequestOutcome::Success(SuccessResponse {
            status: response.status,
            headers: response.headers,
            body: state.body.clone(),
        })
    }

    fn write_chunk(&self, chunk: &Bytes) {
        let written = {
            let mut state = self.lock_state();
            if state.writer.is_none() {
                let destination = self
                    .destination
                    .as_deref()
                    .expect("download handler constructed with a destination");
                match File::create(destination) {
                    Ok(file) => state.writer = Some(BufWriter::new(file)),
                    Err(error) => {
                        drop(state);
                        self.settle(RequestOutcome::Failure(TransportError::File(error)));
                        return;
                    }
                }
            }
            let writer = state.writer.as_mut().expect("writer opened above");
            match writer.write_all(chunk) {
                Ok(()) => {
                    state.received += chunk.len() as u64;
                    Some((state.received, state.expected))
                }
                Err(error) => {
                    drop(state);
                    self.settle(RequestOutcome::Failure(TransportError::File(error)));
                    None
                }
            }
        };
        if let Some((received, expected)) = written
            && let Some(progress) = &self.progress
        {
            progress(received, expected);
        }
    }

    fn settle(&self, outcome: RequestOutcome) {
        if !self.source.settle(outcome) {
            tracing::trace!(kind = self.kind.as_str(), "dropped duplicate settlement");
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TransferState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("kind", &self.kind)
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}
