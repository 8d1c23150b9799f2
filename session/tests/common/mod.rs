//! Shared test support: a scripted transport and recording observers.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;

use courier_session::{
    CacheDecision, RequestKind, SessionController, SessionObserver, TaskCompletion, Transport,
    TransportDelegate, TransportRequest,
};
use courier_types::{RequestDescriptor, ResponseSnapshot, TaskId, TransportError};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the mock does once a task is started.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Deliver a response, the body in `chunk_size` pieces (pausing
    /// `chunk_delay` before each), then a finished completion.
    Respond {
        status: u16,
        body: Vec<u8>,
        chunk_size: usize,
        chunk_delay: Duration,
    },
    /// Deliver a connection failure without any response.
    FailConnect { message: String },
}

impl MockBehavior {
    pub fn ok(body: &[u8]) -> Self {
        Self::Respond {
            status: 200,
            body: body.to_vec(),
            chunk_size: 4,
            chunk_delay: Duration::ZERO,
        }
    }
}

/// Scripted transport delivering callbacks from its own thread, the way a
/// real transport delivers them from an internal pool.
pub struct MockTransport {
    behavior: MockBehavior,
    delegate: OnceLock<Weak<dyn TransportDelegate>>,
    next: AtomicUsize,
    created: AtomicUsize,
    pending: Mutex<HashMap<TaskId, TransportRequest>>,
    running: Mutex<HashSet<TaskId>>,
    cache_decisions: Arc<Mutex<Vec<CacheDecision>>>,
    invalidated: Mutex<bool>,
}

impl MockTransport {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            delegate: OnceLock::new(),
            next: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            pending: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            cache_decisions: Arc::new(Mutex::new(Vec::new())),
            invalidated: Mutex::new(false),
        })
    }

    pub fn created_tasks(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Every answer the delegate gave to a cache proposal.
    pub fn cache_decisions(&self) -> Vec<CacheDecision> {
        self.cache_decisions.lock().unwrap().clone()
    }

    fn live_delegate(&self) -> Option<Arc<dyn TransportDelegate>> {
        self.delegate.get().and_then(Weak::upgrade)
    }
}

impl Transport for MockTransport {
    fn set_delegate(&self, delegate: Weak<dyn TransportDelegate>) {
        let _ = self.delegate.set(delegate);
    }

    fn create_task(&self, request: TransportRequest) -> Result<TaskId, TransportError> {
        if *self.invalidated.lock().unwrap() {
            return Err(TransportError::SessionInvalidated);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let task = TaskId::new(self.next.fetch_add(1, Ordering::SeqCst) as u64 + 1);
        self.pending.lock().unwrap().insert(task, request);
        Ok(task)
    }

    fn start_task(&self, task: TaskId) {
        let Some(request) = self.pending.lock().unwrap().remove(&task) else {
            panic!("start_task for unknown task {task}");
        };
        let Some(delegate) = self.live_delegate() else {
            return;
        };
        self.running.lock().unwrap().insert(task);

        let behavior = self.behavior.clone();
        let decisions = Arc::clone(&self.cache_decisions);
        std::thread::spawn(move || match behavior {
            MockBehavior::FailConnect { message } => {
                delegate.did_complete(
                    task,
                    TaskCompletion::Failed(TransportError::Connect { message }),
                );
            }
            MockBehavior::Respond {
                status,
                body,
                chunk_size,
                chunk_delay,
            } => {
                let snapshot = ResponseSnapshot::new(
                    status,
                    vec![("Content-Length".to_string(), body.len().to_string())],
                );
                delegate.did_receive_response(task, snapshot.clone());
                let decision = delegate.proposed_cache_response(task, &snapshot);
                decisions.lock().unwrap().push(decision);

                if request.kind == RequestKind::Upload {
                    let total = request
                        .source_path
                        .as_ref()
                        .and_then(|path| std::fs::metadata(path).ok())
                        .map_or(0, |metadata| metadata.len());
                    delegate.did_send_body_data(task, total / 2, total);
                    delegate.did_send_body_data(task, total, total);
                }

                for chunk in body.chunks(chunk_size.max(1)) {
                    if !chunk_delay.is_zero() {
                        std::thread::sleep(chunk_delay);
                    }
                    delegate.did_receive_data(task, Bytes::copy_from_slice(chunk));
                }
                delegate.did_complete(task, TaskCompletion::Finished);
            }
        });
    }

    fn invalidate_and_cancel(&self) {
        *self.invalidated.lock().unwrap() = true;
        let delegate = self.live_delegate();
        let running: Vec<TaskId> = self.running.lock().unwrap().drain().collect();
        for task in running {
            if let Some(delegate) = &delegate {
                delegate.did_complete(task, TaskCompletion::Cancelled);
            }
        }
    }
}

/// Observer recording every notification it receives.
#[derive(Default)]
pub struct RecordingObserver {
    pub will: Mutex<Vec<String>>,
    pub did: Mutex<Vec<DidRecord>>,
}

pub struct DidRecord {
    pub url: String,
    pub status: Option<u16>,
    pub body_text: Option<String>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn will_count(&self) -> usize {
        self.will.lock().unwrap().len()
    }

    pub fn did_count(&self) -> usize {
        self.did.lock().unwrap().len()
    }
}

impl SessionObserver for RecordingObserver {
    fn will_perform_request(&self, descriptor: &RequestDescriptor) {
        self.will.lock().unwrap().push(descriptor.url().to_string());
    }

    fn did_perform_request(
        &self,
        descriptor: &RequestDescriptor,
        response: Option<&ResponseSnapshot>,
        body_text: Option<&str>,
    ) {
        self.did.lock().unwrap().push(DidRecord {
            url: descriptor.url().to_string(),
            status: response.map(|response| response.status),
            body_text: body_text.map(ToString::to_string),
        });
    }
}

/// Observer that samples the controller's registry size at `did_perform`
/// time, to pin down the notify-then-remove ordering.
#[derive(Default)]
pub struct RegistryProbeObserver {
    controller: OnceLock<Weak<SessionController>>,
    pub outstanding_at_did: Mutex<Vec<usize>>,
}

impl RegistryProbeObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, controller: &Arc<SessionController>) {
        let _ = self.controller.set(Arc::downgrade(controller));
    }
}

impl SessionObserver for RegistryProbeObserver {
    fn did_perform_request(
        &self,
        _descriptor: &RequestDescriptor,
        _response: Option<&ResponseSnapshot>,
        _body_text: Option<&str>,
    ) {
        if let Some(controller) = self.controller.get().and_then(Weak::upgrade) {
            self.outstanding_at_did
                .lock()
                .unwrap()
                .push(controller.outstanding_tasks());
        }
    }
}
