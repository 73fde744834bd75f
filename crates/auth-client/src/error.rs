//! Error types surfaced to callers of the authenticated client

use std::fmt;

use bytes::Bytes;
use transport::{ApiResponse, StatusCode};

/// A non-2xx response kept intact for the caller.
#[derive(Debug, Clone)]
pub struct FailedResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl FailedResponse {
    /// Server-supplied message: `message` or `error.message` in a JSON body.
    pub fn message(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        value
            .get("message")
            .or_else(|| value.pointer("/error/message"))
            .and_then(|m| m.as_str())
            .map(str::to_owned)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl From<ApiResponse> for FailedResponse {
    fn from(response: ApiResponse) -> Self {
        Self {
            status: response.status,
            body: response.body,
        }
    }
}

/// Why a refresh cycle failed. Cloned to every waiter of the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    /// Status from the refresh endpoint, if it answered at all
    pub status: Option<StatusCode>,
    pub reason: String,
}

impl RefreshFailure {
    pub fn new(status: Option<StatusCode>, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status})", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Errors from the authenticated client.
///
/// A stale credential never shows up here: it is either recovered by a
/// refresh or turned into `RefreshFailed`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("access denied ({})", .0.status)]
    Forbidden(FailedResponse),

    #[error("not authenticated ({})", .0.status)]
    NoSession(FailedResponse),

    /// A stale credential could not be refreshed. `response` is the
    /// request's own 406; `failure` says why the refresh didn't recover it.
    #[error("session refresh failed: {failure}")]
    RefreshFailed {
        response: FailedResponse,
        failure: RefreshFailure,
    },

    #[error("request failed with status {}", .0.status)]
    Status(FailedResponse),

    #[error("transport error: {0}")]
    Transport(#[from] transport::Error),

    #[error("login rejected ({})", .0.status)]
    LoginRejected(FailedResponse),

    #[error("invalid token bundle: {0}")]
    InvalidBundle(String),

    #[error("session store error: {0}")]
    Session(#[from] storefront_session::Error),
}

impl Error {
    /// The original response, when the failure came with one.
    pub fn response(&self) -> Option<&FailedResponse> {
        match self {
            Error::Forbidden(r)
            | Error::NoSession(r)
            | Error::Status(r)
            | Error::LoginRejected(r)
            | Error::RefreshFailed { response: r, .. } => Some(r),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|r| r.status)
    }

    /// Whether the session was lost as part of this failure.
    pub fn ended_session(&self) -> bool {
        matches!(
            self,
            Error::Forbidden(_) | Error::NoSession(_) | Error::RefreshFailed { .. }
        )
    }

    /// One line for the user: the server's message when it sent one,
    /// otherwise the error itself. A failed refresh always reports the
    /// refresh failure, not the 406 body.
    pub fn user_message(&self) -> String {
        if matches!(self, Error::RefreshFailed { .. }) {
            return self.to_string();
        }
        self.response()
            .and_then(FailedResponse::message)
            .unwrap_or_else(|| self.to_string())
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
