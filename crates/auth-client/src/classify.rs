//! Failure classification for backend responses
//!
//! The backend signals auth state through three fixed statuses: 403 for an
//! authenticated user without permission, 401 for a missing or unusable
//! session, and 406 for an expired credential that a refresh can recover.
//! A 406 on a request that was already replayed is terminal: classifying it
//! as anything refreshable would loop forever.

use transport::StatusCode;

/// What a failed response means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 401: never authenticated, or the session is gone
    NoSession,
    /// 403: authenticated but not permitted
    Forbidden,
    /// 406 on a first attempt: credential expired, refreshable
    StaleCredential,
    /// Everything else, including 406 on a replay
    Other,
}

impl FailureKind {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::NoSession => "no_session",
            FailureKind::Forbidden => "forbidden",
            FailureKind::StaleCredential => "stale_credential",
            FailureKind::Other => "other",
        }
    }
}

/// Classify a failed response.
///
/// Precedence: 403, then 401, then 406 only while `retried` is false.
pub fn classify_status(status: StatusCode, retried: bool) -> FailureKind {
    match status {
        StatusCode::FORBIDDEN => FailureKind::Forbidden,
        StatusCode::UNAUTHORIZED => FailureKind::NoSession,
        StatusCode::NOT_ACCEPTABLE if !retried => FailureKind::StaleCredential,
        _ => FailureKind::Other,
    }
}
