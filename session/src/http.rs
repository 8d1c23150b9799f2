//! The reqwest-backed transport.
//!
//! [`HttpTransport`] is the shipped [`Transport`]: it allocates task
//! identifiers, drives each started task on its own spawned future, and
//! delivers delegate callbacks strictly serially per task. TLS trust is
//! decided by the pinning verifier when a validator is configured; a rejected
//! handshake surfaces as an ordinary connect error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::future::{AbortHandle, Abortable};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::AsyncReadExt;

use courier_pinning::{CertificateValidator, pinned_client_config};
use courier_types::{Method, ResponseSnapshot, TaskId, TransportError};

use crate::transport::{TaskCompletion, Transport, TransportDelegate, TransportRequest};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Transport construction knobs.
///
/// Production sessions supply a pin validator; trust for every TLS connection
/// is then decided solely by the pinned keys. Without one, the client keeps
/// the platform's standard certificate validation (useful against plain-HTTP
/// test servers).
pub struct HttpTransportConfig {
    pub pin_validator: Option<CertificateValidator>,
    pub connect_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            pin_validator: None,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }
}

enum TaskState {
    Created(TransportRequest),
    Running(AbortHandle),
}

/// HTTP transport over a hardened reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
    delegate: OnceLock<Weak<dyn TransportDelegate>>,
    next_task: AtomicU64,
    tasks: Arc<DashMap<TaskId, TaskState>>,
    invalidated: AtomicBool,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)));

        if let Some(validator) = config.pin_validator {
            let tls = pinned_client_config(validator).map_err(|error| {
                TransportError::Configuration {
                    message: format!("pinned TLS configuration rejected: {error}"),
                }
            })?;
            builder = builder.use_preconfigured_tls(tls);
        }

        let client = builder.build().map_err(|error| TransportError::Configuration {
            message: error.to_string(),
        })?;

        Ok(Self {
            client,
            delegate: OnceLock::new(),
            next_task: AtomicU64::new(0),
            tasks: Arc::new(DashMap::new()),
            invalidated: AtomicBool::new(false),
        })
    }

    fn live_delegate(&self) -> Option<Arc<dyn TransportDelegate>> {
        self.delegate.get().and_then(Weak::upgrade)
    }
}

impl Transport for HttpTransport {
    fn set_delegate(&self, delegate: Weak<dyn TransportDelegate>) {
        if self.delegate.set(delegate).is_err() {
            tracing::warn!("transport delegate already wired; ignoring replacement");
        }
    }

    fn create_task(&self, request: TransportRequest) -> Result<TaskId, TransportError> {
        if self.invalidated.load(Ordering::Acquire) {
            return Err(TransportError::SessionInvalidated);
        }
        let task = TaskId::new(self.next_task.fetch_add(1, Ordering::Relaxed) + 1);
        self.tasks.insert(task, TaskState::Created(request));
        tracing::debug!(task_id = %task, "transport task created");
        Ok(task)
    }

    fn start_task(&self, task: TaskId) {
        let Some((_, state)) = self.tasks.remove(&task) else {
            tracing::warn!(task_id = %task, "start requested for unknown task");
            return;
        };
        let TaskState::Created(request) = state else {
            tracing::warn!(task_id = %task, "start requested for already-running task");
            return;
        };

        let (abort, registration) = AbortHandle::new_pair();
        self.tasks.insert(task, TaskState::Running(abort));

        // An invalidation racing this start either drains the entry inserted
        // above or is observed here; the handler's settled guard absorbs a
        // doubled cancellation completion.
        if self.invalidated.load(Ordering::Acquire) {
            if let Some((_, TaskState::Running(abort))) = self.tasks.remove(&task) {
                abort.abort();
            }
            if let Some(delegate) = self.live_delegate() {
                delegate.did_complete(task, TaskCompletion::Cancelled);
            }
            return;
        }

        let client = self.client.clone();
        let delegate = self.delegate.get().cloned();
        let tasks = Arc::clone(&self.tasks);
        let drive = async move {
            run_task(client, delegate, task, request).await;
            tasks.remove(&task);
        };
        tokio::spawn(Abortable::new(drive, registration));
    }

    fn invalidate_and_cancel(&self) {
        if self.invalidated.swap(true, Ordering::AcqRel) {
            return;
        }
        let delegate = self.live_delegate();
        let outstanding: Vec<TaskId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        tracing::debug!(tasks = outstanding.len(), "transport invalidated");
        for task in outstanding {
            if let Some((_, state)) = self.tasks.remove(&task) {
                if let TaskState::Running(abort) = state {
                    abort.abort();
                }
                if let Some(delegate) = &delegate {
                    delegate.did_complete(task, TaskCompletion::Cancelled);
                }
            }
        }
    }
}

async fn run_task(
    client: reqwest::Client,
    delegate: Option<Weak<dyn TransportDelegate>>,
    task: TaskId,
    request: TransportRequest,
) {
    let deliver = |event: TaskCompletion| {
        if let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) {
            delegate.did_complete(task, event);
        }
    };

    let builder = match build_request(&client, task, &request, &delegate).await {
        Ok(builder) => builder,
        Err(error) => {
            deliver(TaskCompletion::Failed(error));
            return;
        }
    };

    let response = match builder.send().await {
        Ok(response) => response,
        Err(error) => {
            deliver(TaskCompletion::Failed(classify(&error)));
            return;
        }
    };

    let snapshot = snapshot_of(&response);
    if let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) {
        delegate.did_receive_response(task, snapshot.clone());
        // The transport keeps no cache, but the proposal contract holds for
        // every response regardless.
        let decision = delegate.proposed_cache_response(task, &snapshot);
        tracing::trace!(task_id = %task, ?decision, "cache proposal answered");
    }

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => {
                if let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) {
                    delegate.did_receive_data(task, chunk);
                }
            }
            Err(error) => {
                deliver(TaskCompletion::Failed(TransportError::Interrupted {
                    message: error.to_string(),
                }));
                return;
            }
        }
    }

    deliver(TaskCompletion::Finished);
}

async fn build_request(
    client: &reqwest::Client,
    task: TaskId,
    request: &TransportRequest,
    delegate: &Option<Weak<dyn TransportDelegate>>,
) -> Result<reqwest::RequestBuilder, TransportError> {
    let descriptor = &request.descriptor;
    let mut headers = HeaderMap::new();
    for (name, value) in descriptor.headers() {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| {
            TransportError::InvalidRequest {
                message: format!("header name {name:?}: {error}"),
            }
        })?;
        let value = HeaderValue::from_str(value).map_err(|error| {
            TransportError::InvalidRequest {
                message: format!("header value for {name:?}: {error}"),
            }
        })?;
        headers.append(name, value);
    }

    let mut builder = client
        .request(method_of(descriptor.method()), descriptor.url())
        .headers(headers);

    if let Some(source) = &request.source_path {
        let file = tokio::fs::File::open(source)
            .await
            .map_err(TransportError::File)?;
        let total = file
            .metadata()
            .await
            .map(|metadata| metadata.len())
            .unwrap_or(0);
        let stream = upload_stream(file, task, delegate.clone(), total);
        builder = builder.body(reqwest::Body::wrap_stream(stream));
    } else if let Some(body) = descriptor.body() {
        builder = builder.body(body.to_vec());
    }

    Ok(builder)
}

/// Stream the upload source in chunks, reporting cumulative bytes sent as
/// each chunk is pulled onto the wire.
fn upload_stream(
    file: tokio::fs::File,
    task: TaskId,
    delegate: Option<Weak<dyn TransportDelegate>>,
    total: u64,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    futures_util::stream::unfold((file, 0u64), move |(mut file, sent)| {
        let delegate = delegate.clone();
        async move {
            let mut buffer = vec![0u8; UPLOAD_CHUNK_BYTES];
            match file.read(&mut buffer).await {
                Ok(0) => None,
                Ok(read) => {
                    buffer.truncate(read);
                    let sent = sent + read as u64;
                    if let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) {
                        delegate.did_send_body_data(task, sent, total);
                    }
                    Some((Ok(Bytes::from(buffer)), (file, sent)))
                }
                Err(error) => Some((Err(error), (file, sent))),
            }
        }
    })
}

fn method_of(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Patch => reqwest::Method::PATCH,
    }
}

fn snapshot_of(response: &reqwest::Response) -> ResponseSnapshot {
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    ResponseSnapshot::new(response.status().as_u16(), headers)
}

fn classify(error: &reqwest::Error) -> TransportError {
    if error.is_connect() || error.is_timeout() {
        TransportError::Connect {
            message: error.to_string(),
        }
    } else if error.is_builder() || error.is_request() {
        TransportError::InvalidRequest {
            message: error.to_string(),
        }
    } else {
        TransportError::Interrupted {
            message: error.to_string(),
        }
    }
}
