//! The session controller.
//!
//! Orchestrates one transport session: turns `perform_*` calls into transport
//! tasks, routes transport callbacks through the handler registry, notifies
//! the observer around each attempt, and returns the settled outcome
//! unchanged.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use bytes::Bytes;

use courier_types::{
    CancellationToken, ProgressCallback, RequestDescriptor, RequestOutcome, ResponseSnapshot,
    TaskId, TransportError,
};

use crate::handler::RequestHandler;
use crate::registry::HandlerRegistry;
use crate::transport::{
    CacheDecision, RequestKind, TaskCompletion, Transport, TransportDelegate, TransportRequest,
};

/// Observer of request lifecycle, wired once at construction.
///
/// Both hooks fire exactly once per attempt that reaches the transport, in
/// order: `will_perform_request` strictly before the task starts,
/// `did_perform_request` after the outcome settles and before the handler is
/// deregistered. Attempts short-circuited by an already-cancelled token fire
/// neither hook.
pub trait SessionObserver: Send + Sync {
    fn will_perform_request(&self, _descriptor: &RequestDescriptor) {}

    fn did_perform_request(
        &self,
        _descriptor: &RequestDescriptor,
        _response: Option<&ResponseSnapshot>,
        _body_text: Option<&str>,
    ) {
    }
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Which handler variant to build once the task id is known.
enum HandlerSpec {
    Data,
    Upload {
        source_path: PathBuf,
        on_progress: ProgressCallback,
    },
    Download {
        destination_path: PathBuf,
        on_progress: ProgressCallback,
    },
}

impl HandlerSpec {
    const fn kind(&self) -> RequestKind {
        match self {
            Self::Data => RequestKind::Data,
            Self::Upload { .. } => RequestKind::Upload,
            Self::Download { .. } => RequestKind::Download,
        }
    }
}

/// The request orchestrator.
///
/// Owns the transport session handle and the handler registry; shares a
/// non-owning observer reference. Dropping the controller does not tear down
/// in-flight tasks - call [`SessionController::invalidate_and_cancel`] for
/// that.
pub struct SessionController {
    transport: Arc<dyn Transport>,
    registry: HandlerRegistry,
    observer: Arc<dyn SessionObserver>,
    // Serializes the transport's task-allocation path across all request
    // kinds. Held only for the brief create/register/notify/start section.
    creation_lock: tokio::sync::Mutex<()>,
}

impl SessionController {
    /// Build a controller over `transport` and wire it as the transport's
    /// delegate.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, observer: Arc<dyn SessionObserver>) -> Arc<Self> {
        let controller = Arc::new(Self {
            transport,
            registry: HandlerRegistry::new(),
            observer,
            creation_lock: tokio::sync::Mutex::new(()),
        });
        let controller_dyn: Arc<dyn TransportDelegate> = controller.clone();
        let delegate: Weak<dyn TransportDelegate> = Arc::downgrade(&controller_dyn);
        controller.transport.set_delegate(delegate);
        controller
    }

    /// Perform a request whose response body accumulates in memory.
    pub async fn perform_data_request(
        self: &Arc<Self>,
        descriptor: RequestDescriptor,
        token: CancellationToken,
    ) -> RequestOutcome {
        self.perform(descriptor, token, HandlerSpec::Data).await
    }

    /// Perform an upload streaming `source_path` as the request body,
    /// reporting `(sent, total)` progress.
    pub async fn perform_upload_request(
        self: &Arc<Self>,
        descriptor: RequestDescriptor,
        source_path: PathBuf,
        token: CancellationToken,
        on_progress: ProgressCallback,
    ) -> RequestOutcome {
        self.perform(
            descriptor,
            token,
            HandlerSpec::Upload {
                source_path,
                on_progress,
            },
        )
        .await
    }

    /// Perform a download streaming the response body to `destination_path`,
    /// reporting `(received, expected)` progress.
    pub async fn perform_download_request(
        self: &Arc<Self>,
        descriptor: RequestDescriptor,
        destination_path: PathBuf,
        token: CancellationToken,
        on_progress: ProgressCallback,
    ) -> RequestOutcome {
        self.perform(
            descriptor,
            token,
            HandlerSpec::Download {
                destination_path,
                on_progress,
            },
        )
        .await
    }

    /// Synchronously invalidate the transport session and cancel all
    /// outstanding tasks.
    ///
    /// Pending futures are not resolved here; each outstanding task settles
    /// through the transport's own cancellation delivery to its handler.
    pub fn invalidate_and_cancel(&self) {
        tracing::debug!("invalidating session");
        self.transport.invalidate_and_cancel();
    }

    /// Number of started-but-unsettled-or-undeparted tasks currently
    /// registered.
    #[must_use]
    pub fn outstanding_tasks(&self) -> usize {
        self.registry.len()
    }

    async fn perform(
        self: &Arc<Self>,
        descriptor: RequestDescriptor,
        token: CancellationToken,
        spec: HandlerSpec,
    ) -> RequestOutcome {
        // First checkpoint: synchronous, before any resource is touched.
        if token.is_cancelled() {
            tracing::debug!(url = descriptor.url(), "request cancelled before hand-off");
            return RequestOutcome::Cancelled;
        }

        let this = Arc::clone(self);
        let attempt = tokio::spawn(async move { this.run(descriptor, token, spec).await });
        match attempt.await {
            Ok(outcome) => outcome,
            Err(error) => RequestOutcome::Failure(TransportError::Interrupted {
                message: format!("request attempt aborted: {error}"),
            }),
        }
    }

    async fn run(
        self: Arc<Self>,
        descriptor: RequestDescriptor,
        token: CancellationToken,
        spec: HandlerSpec,
    ) -> RequestOutcome {
        // Second checkpoint: cancellation may have raced the hand-off onto
        // this execution context.
        if token.is_cancelled() {
            tracing::debug!(url = descriptor.url(), "request cancelled during hand-off");
            return RequestOutcome::Cancelled;
        }

        let kind = spec.kind();
        let (task_id, completion) = {
            let _creation = self.creation_lock.lock().await;

            let request = TransportRequest {
                descriptor: descriptor.clone(),
                kind,
                source_path: match &spec {
                    HandlerSpec::Upload { source_path, .. } => Some(source_path.clone()),
                    HandlerSpec::Data | HandlerSpec::Download { .. } => None,
                },
            };
            let task_id = match self.transport.create_task(request) {
                Ok(task_id) => task_id,
                Err(error) => return RequestOutcome::Failure(error),
            };

            let (handler, completion) = match spec {
                HandlerSpec::Data => RequestHandler::data(token),
                HandlerSpec::Upload { on_progress, .. } => {
                    RequestHandler::upload(token, on_progress)
                }
                HandlerSpec::Download {
                    destination_path,
                    on_progress,
                } => RequestHandler::download(token, destination_path, on_progress),
            };

            // Registration precedes start: once started, callbacks may arrive
            // on transport threads and must find this handler.
            self.registry.insert(task_id, handler);
            self.observer.will_perform_request(&descriptor);

            // The completion was created above, so its continuation is
            // attached before the first callback can settle it; a settlement
            // that beats the await below is buffered, not lost.
            self.transport.start_task(task_id);
            tracing::debug!(task_id = %task_id, kind = kind.as_str(), url = descriptor.url(), "task started");
            (task_id, completion)
        };

        let outcome = match completion.wait().await {
            Ok(outcome) => outcome,
            Err(_) => RequestOutcome::Failure(TransportError::Interrupted {
                message: "handler dropped before settling".to_string(),
            }),
        };
        tracing::debug!(task_id = %task_id, %outcome, "task settled");

        // Notify, then remove - the observer must see a still-registered task.
        let handler = self.registry.lookup(task_id);
        let response = match &outcome {
            RequestOutcome::Success(success) => Some(success.snapshot()),
            RequestOutcome::Failure(_) | RequestOutcome::Cancelled => {
                handler.as_ref().and_then(|handler| handler.response_snapshot())
            }
        };
        let body_text = match &outcome {
            RequestOutcome::Success(success) if !success.body.is_empty() => {
                Some(success.body_text())
            }
            _ => handler.as_ref().and_then(|handler| handler.body_text()),
        };
        self.observer
            .did_perform_request(&descriptor, response.as_ref(), body_text.as_deref());
        self.registry.remove(task_id);

        outcome
    }
}

impl TransportDelegate for SessionController {
    fn did_receive_response(&self, task: TaskId, response: ResponseSnapshot) {
        if let Some(handler) = self.registry.lookup(task) {
            handler.handle_response(response);
        } else {
            tracing::trace!(task_id = %task, "response for unregistered task dropped");
        }
    }

    fn did_receive_data(&self, task: TaskId, chunk: Bytes) {
        if let Some(handler) = self.registry.lookup(task) {
            handler.handle_data(&chunk);
        } else {
            tracing::trace!(task_id = %task, "data for unregistered task dropped");
        }
    }

    fn did_send_body_data(&self, task: TaskId, sent: u64, total: u64) {
        if let Some(handler) = self.registry.lookup(task) {
            handler.handle_sent(sent, total);
        }
    }

    fn did_complete(&self, task: TaskId, completion: TaskCompletion) {
        if let Some(handler) = self.registry.lookup(task) {
            handler.handle_completion(completion);
        } else {
            tracing::trace!(task_id = %task, "completion for unregistered task dropped");
        }
    }

    fn proposed_cache_response(
        &self,
        task: TaskId,
        _response: &ResponseSnapshot,
    ) -> CacheDecision {
        // Blanket hardening: nothing this session fetches is ever cached,
        // independent of the challenge outcome for the connection.
        tracing::trace!(task_id = %task, "cache proposal declined");
        CacheDecision::DoNotCache
    }
}
