//! Request outcomes.
//!
//! Every request attempt resolves to exactly one of three outcomes: a
//! successful response, a transport failure, or a cancellation marker.
//! Cancellation is deliberately not an error variant - callers that race
//! their own tokens against in-flight work need to tell the two apart.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the transport layer.
///
/// Certificate-pin rejection has no variant of its own: a rejected handshake
/// is reported by the transport as an ordinary connection failure, so there is
/// no secondary code path that could accept a connection after pin validation
/// failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection-level failure: DNS, TCP connect, or TLS handshake.
    #[error("connection failed: {message}")]
    Connect { message: String },

    /// The descriptor could not be turned into a transport request.
    #[error("request could not be built: {message}")]
    InvalidRequest { message: String },

    /// The response body stream failed after the response started.
    #[error("transfer interrupted: {message}")]
    Interrupted { message: String },

    /// I/O failure on an upload source or download destination file.
    #[error("file i/o failed: {0}")]
    File(#[from] std::io::Error),

    /// The session was invalidated while the task was outstanding.
    #[error("session has been invalidated")]
    SessionInvalidated,

    /// The transport itself could not be constructed from its configuration.
    #[error("transport configuration rejected: {message}")]
    Configuration { message: String },
}

/// Status and headers of the last response seen for a task.
///
/// This is the snapshot handlers expose for observer logging; it carries no
/// body so it stays cheap to clone while a download is still streaming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseSnapshot {
    #[must_use]
    pub fn new(status: u16, headers: Vec<(String, String)>) -> Self {
        Self { status, headers }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A settled successful response: status, headers, and the accumulated body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SuccessResponse {
    /// Lossy UTF-8 view of the body, used for observer logging.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    #[must_use]
    pub fn snapshot(&self) -> ResponseSnapshot {
        ResponseSnapshot::new(self.status, self.headers.clone())
    }
}

/// The three-way result of one request attempt.
#[derive(Debug)]
pub enum RequestOutcome {
    Success(SuccessResponse),
    Failure(TransportError),
    Cancelled,
}

impl RequestOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The response snapshot, when one was seen before settlement.
    #[must_use]
    pub fn response(&self) -> Option<ResponseSnapshot> {
        match self {
            Self::Success(response) => Some(response.snapshot()),
            Self::Failure(_) | Self::Cancelled => None,
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(response) => write!(f, "success ({})", response.status),
            Self::Failure(error) => write!(f, "failure ({error})"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}
