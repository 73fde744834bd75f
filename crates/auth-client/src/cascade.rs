//! Failure cascade policy
//!
//! Maps a classified failure to what happens next, and owns the one global
//! side effect this layer has: tearing the session down. The user-facing
//! effects (an alert, a jump to the login screen) go through the
//! `SessionEvents` trait so a UI, a CLI, and tests can each supply their own.
//!
//! Transitions:
//! - Forbidden → notify AccessDenied, clear, redirect, reject
//! - NoSession → clear, redirect, reject
//! - StaleCredential → refresh (see `refresh`)
//! - refresh failed → notify InvalidSession, clear, redirect (once per cycle)
//! - Other → reject, session untouched

use std::sync::Arc;

use storefront_session::SessionStore;
use tracing::{info, warn};

use crate::classify::FailureKind;

/// User-facing notices raised by a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    AccessDenied,
    InvalidSession,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::AccessDenied => "Access denied.",
            Notice::InvalidSession => "Your session is no longer valid. Please log in again.",
        }
    }
}

/// Sink for the UI side effects of a teardown.
pub trait SessionEvents: Send + Sync {
    /// Show a notice to the user.
    fn notify(&self, notice: Notice);

    /// Send the user back to the login flow.
    fn redirect_to_login(&self);
}

/// `SessionEvents` that only logs. Used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl SessionEvents for LogEvents {
    fn notify(&self, notice: Notice) {
        warn!(notice = ?notice, "{}", notice.message());
    }

    fn redirect_to_login(&self) {
        info!("login required");
    }
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Forbidden,
    NoSession,
    RefreshFailed,
    Logout,
}

impl TeardownReason {
    pub fn label(&self) -> &'static str {
        match self {
            TeardownReason::Forbidden => "forbidden",
            TeardownReason::NoSession => "no_session",
            TeardownReason::RefreshFailed => "refresh_failed",
            TeardownReason::Logout => "logout",
        }
    }

    /// Notice shown before redirecting, if any.
    pub fn notice(&self) -> Option<Notice> {
        match self {
            TeardownReason::Forbidden => Some(Notice::AccessDenied),
            TeardownReason::RefreshFailed => Some(Notice::InvalidSession),
            TeardownReason::NoSession | TeardownReason::Logout => None,
        }
    }
}

/// What the pipeline does with a failed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Join or start a refresh cycle, then replay once
    Refresh,
    /// Tear the session down and reject
    Teardown(TeardownReason),
    /// Reject unchanged
    Reject,
}

/// Decide the next step for a failure kind.
///
/// 401 always clears and redirects, whatever screen the user is on.
pub fn decide(kind: FailureKind) -> Decision {
    match kind {
        FailureKind::Forbidden => Decision::Teardown(TeardownReason::Forbidden),
        FailureKind::NoSession => Decision::Teardown(TeardownReason::NoSession),
        FailureKind::StaleCredential => Decision::Refresh,
        FailureKind::Other => Decision::Reject,
    }
}

/// Executes teardowns against the session store and event sink.
#[derive(Clone)]
pub struct CascadePolicy {
    store: Arc<SessionStore>,
    events: Arc<dyn SessionEvents>,
}

impl CascadePolicy {
    pub fn new(store: Arc<SessionStore>, events: Arc<dyn SessionEvents>) -> Self {
        Self { store, events }
    }

    /// Notify (when the reason has a notice), clear the session, redirect.
    ///
    /// Never fails: a store that can't delete its record is logged, and the
    /// in-memory session is cleared regardless.
    pub async fn teardown(&self, reason: TeardownReason) {
        if let Some(notice) = reason.notice() {
            self.events.notify(notice);
        }
        if let Err(e) = self.store.clear().await {
            warn!(reason = reason.label(), error = %e, "failed to remove session record");
        }
        self.events.redirect_to_login();
        crate::metrics::record_teardown(reason);
        info!(reason = reason.label(), "session torn down");
    }
}
