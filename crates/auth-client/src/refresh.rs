//! Single-flight credential refresh
//!
//! At most one refresh call is in flight at a time. The first request to see
//! a stale credential opens a `RefreshCycle` and spawns the refresh; every
//! request that goes stale while the cycle is pending joins its waiter list
//! instead of issuing a call of its own. "Is a cycle pending" and "join or
//! open" happen under one lock, so two requests failing at the same instant
//! can't both open a cycle.
//!
//! When the refresh settles:
//! 1. Success: the new credential is written to the session store, then
//!    every waiter is released and replays its own request once.
//! 2. Failure: the session is torn down once for the whole cycle, then
//!    every waiter is released with the same `RefreshFailure`.
//!
//! 3. Abandoned: the session was cleared (logout, 403) while the refresh was
//!    in flight. The new credential is dropped, nothing is written, and
//!    waiters are released with a failure without a second teardown.
//!
//! A request that went stale on a credential the store has since replaced
//! replays straight away instead of opening another cycle.
//!
//! The cycle is removed before waiters are released, so the next stale
//! credential starts a fresh cycle. The refresh runs in its own task: a
//! caller that stops waiting does not cancel it or strand the others. There
//! is no timeout here; a hung refresh endpoint holds every waiter until the
//! transport's own timeout fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use common::Credential;
use storefront_session::{Error as SessionError, SessionStore};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};
use transport::Transport;

use crate::cascade::{CascadePolicy, TeardownReason};
use crate::endpoints::{self, Endpoints};
use crate::error::RefreshFailure;

type CycleOutcome = std::result::Result<(), RefreshFailure>;

const SESSION_ENDED: &str = "session ended during refresh";

/// One pending refresh and the requests waiting on it.
struct RefreshCycle {
    id: u64,
    started: Instant,
    waiters: Vec<oneshot::Sender<CycleOutcome>>,
}

struct Shared {
    cycle: Mutex<Option<RefreshCycle>>,
    next_cycle_id: AtomicU64,
    refresh_calls: AtomicU64,
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    store: Arc<SessionStore>,
    cascade: CascadePolicy,
}

/// Shares one refresh call among all concurrently stale requests.
///
/// Cheap to clone; clones coordinate through the same cycle slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
}

impl RefreshCoordinator {
    /// `transport` must be the raw transport, not the authenticated pipeline.
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        store: Arc<SessionStore>,
        cascade: CascadePolicy,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cycle: Mutex::new(None),
                next_cycle_id: AtomicU64::new(1),
                refresh_calls: AtomicU64::new(0),
                transport,
                endpoints,
                store,
                cascade,
            }),
        }
    }

    /// Wait until the session holds a fresh credential.
    ///
    /// `sent_with` is the credential the stale request carried. Joins the
    /// pending cycle if there is one. Otherwise, if the store already holds a
    /// different credential, returns at once; if not, opens a cycle and
    /// starts the refresh. On `Ok` the new credential is already in the
    /// session store; on `Err` the session has already been torn down.
    pub async fn await_refresh(
        &self,
        request_id: &str,
        sent_with: Option<&Credential>,
    ) -> std::result::Result<(), RefreshFailure> {
        let (tx, rx) = oneshot::channel();

        let opened = {
            let mut slot = self.shared.cycle.lock().await;
            match slot.as_mut() {
                Some(cycle) => {
                    cycle.waiters.push(tx);
                    debug!(
                        request_id,
                        cycle = cycle.id,
                        waiters = cycle.waiters.len(),
                        "joined pending refresh"
                    );
                    crate::metrics::record_refresh_joined();
                    None
                }
                None => {
                    match self.shared.store.credential().await {
                        None => {
                            debug!(request_id, "session already ended, not refreshing");
                            return Err(RefreshFailure::new(None, SESSION_ENDED));
                        }
                        Some(current) if sent_with != Some(&current) => {
                            debug!(request_id, "credential already rotated, replaying");
                            return Ok(());
                        }
                        Some(_) => {}
                    }
                    let id = self.shared.next_cycle_id.fetch_add(1, Ordering::Relaxed);
                    *slot = Some(RefreshCycle {
                        id,
                        started: Instant::now(),
                        waiters: vec![tx],
                    });
                    Some(id)
                }
            }
        };

        if let Some(id) = opened {
            info!(request_id, cycle = id, "stale credential, refreshing session");
            let shared = self.shared.clone();
            tokio::spawn(async move { shared.run_cycle(id).await });
        }

        rx.await.unwrap_or_else(|_| {
            Err(RefreshFailure::new(
                None,
                "refresh cycle ended without a result",
            ))
        })
    }

    /// Whether a refresh cycle is pending.
    pub async fn is_pending(&self) -> bool {
        self.shared.cycle.lock().await.is_some()
    }

    /// Requests waiting on the pending cycle (0 when none is pending).
    pub async fn waiting(&self) -> usize {
        self.shared
            .cycle
            .lock()
            .await
            .as_ref()
            .map_or(0, |cycle| cycle.waiters.len())
    }

    /// Refresh calls issued since construction.
    pub fn refresh_calls(&self) -> u64 {
        self.shared.refresh_calls.load(Ordering::Relaxed)
    }
}

impl Shared {
    async fn run_cycle(&self, id: u64) {
        self.refresh_calls.fetch_add(1, Ordering::Relaxed);

        let refreshed = endpoints::refresh(self.transport.as_ref(), &self.endpoints).await;
        let (outcome, label): (CycleOutcome, &'static str) = match refreshed {
            Ok(bundle) => match self.store.apply_refresh(bundle).await {
                Ok(_) => (Ok(()), "success"),
                Err(SessionError::SessionEnded) => {
                    info!(cycle = id, "session ended while refreshing, dropping new credential");
                    (Err(RefreshFailure::new(None, SESSION_ENDED)), "abandoned")
                }
                Err(e) => (
                    Err(RefreshFailure::new(None, format!("persisting refreshed session: {e}"))),
                    "failure",
                ),
            },
            Err(failure) => {
                if self.store.is_authenticated().await {
                    (Err(failure), "failure")
                } else {
                    debug!(cycle = id, error = %failure, "refresh failed after session ended");
                    (Err(failure), "abandoned")
                }
            }
        };

        // Teardown happens once here, never per waiter. An abandoned cycle
        // was already torn down by whatever cleared the session.
        if let (Err(failure), "failure") = (&outcome, label) {
            warn!(cycle = id, error = %failure, "refresh failed, ending session");
            self.cascade.teardown(TeardownReason::RefreshFailed).await;
        }

        let Some(cycle) = self.cycle.lock().await.take() else {
            warn!(cycle = id, "refresh cycle vanished before it settled");
            return;
        };

        let elapsed = cycle.started.elapsed();
        crate::metrics::record_refresh(label, elapsed.as_secs_f64());
        info!(
            cycle = cycle.id,
            outcome = label,
            waiters = cycle.waiters.len(),
            elapsed_ms = whole_millis(elapsed),
            "refresh cycle settled"
        );

        for waiter in cycle.waiters {
            // A waiter that stopped listening has nothing left to replay.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Milliseconds for log fields, saturating instead of wrapping.
fn whole_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, RecordingEvents, Reply, authenticated_store, wait_for_waiters};
    use crate::cascade::Notice;

    fn coordinator(
        backend: &Arc<FakeBackend>,
        store: &Arc<SessionStore>,
        events: &Arc<RecordingEvents>,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(
            backend.clone(),
            Endpoints::default(),
            store.clone(),
            CascadePolicy::new(store.clone(), events.clone()),
        )
    }

    #[tokio::test]
    async fn success_writes_credential_before_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::refresh_ok("T2"));
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();

        coord.await_refresh("req_a", Some(&t1)).await.unwrap();

        assert_eq!(store.credential().await.unwrap().expose(), "T2");
        assert_eq!(coord.refresh_calls(), 1);
        assert!(!coord.is_pending().await);
        assert_eq!(events.redirects(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::refresh_ok("T2"));
        backend.hold_refresh();
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();

        let mut handles = vec![];
        for i in 0..5 {
            let coord = coord.clone();
            let t1 = t1.clone();
            handles.push(tokio::spawn(async move {
                coord.await_refresh(&format!("req_{i}"), Some(&t1)).await
            }));
        }
        wait_for_waiters(&coord, 5).await;
        assert!(coord.is_pending().await);
        backend.release_refresh();

        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(coord.refresh_calls(), 1);
        assert_eq!(backend.sent_to("/api/v1/refresh").len(), 1);
        assert_eq!(coord.waiting().await, 0);
    }

    #[tokio::test]
    async fn failure_tears_down_once_for_all_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::status(401, r#"{"message":"refresh expired"}"#));
        backend.hold_refresh();
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();

        let mut handles = vec![];
        for i in 0..3 {
            let coord = coord.clone();
            let t1 = t1.clone();
            handles.push(tokio::spawn(async move {
                coord.await_refresh(&format!("req_{i}"), Some(&t1)).await
            }));
        }
        wait_for_waiters(&coord, 3).await;
        backend.release_refresh();

        for h in handles {
            let failure = h.await.unwrap().unwrap_err();
            assert_eq!(failure.status, Some(transport::StatusCode::UNAUTHORIZED));
        }
        assert!(!store.is_authenticated().await);
        assert_eq!(events.notices(), vec![Notice::InvalidSession]);
        assert_eq!(events.redirects(), 1);
    }

    #[tokio::test]
    async fn settled_cycle_is_replaced_by_a_new_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::refresh_ok("T2"));
        backend.on_refresh(Reply::refresh_ok("T3"));
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();

        coord.await_refresh("req_a", Some(&t1)).await.unwrap();
        let t2 = store.credential().await.unwrap();
        assert_eq!(t2.expose(), "T2");
        coord.await_refresh("req_b", Some(&t2)).await.unwrap();
        assert_eq!(store.credential().await.unwrap().expose(), "T3");
        assert_eq!(coord.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn dropped_opener_does_not_strand_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::refresh_ok("T2"));
        backend.hold_refresh();
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();

        let opener = {
            let coord = coord.clone();
            let t1 = t1.clone();
            tokio::spawn(async move { coord.await_refresh("req_opener", Some(&t1)).await })
        };
        wait_for_waiters(&coord, 1).await;
        let joiner = {
            let coord = coord.clone();
            let t1 = t1.clone();
            tokio::spawn(async move { coord.await_refresh("req_joiner", Some(&t1)).await })
        };
        wait_for_waiters(&coord, 2).await;

        opener.abort();
        backend.release_refresh();

        joiner.await.unwrap().unwrap();
        assert_eq!(store.credential().await.unwrap().expose(), "T2");
        assert_eq!(coord.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn malformed_refresh_body_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::ok(r#"{"response":{}}"#));
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();

        let failure = coord.await_refresh("req_a", Some(&t1)).await.unwrap_err();
        assert!(failure.status.is_none());
        assert!(!store.is_authenticated().await);
        assert_eq!(events.redirects(), 1);
    }

    #[test]
    fn elapsed_millis_saturate() {
        assert_eq!(whole_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn late_stale_response_after_rotation_replays_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::refresh_ok("T2"));
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();

        coord.await_refresh("req_a", Some(&t1)).await.unwrap();
        // A second request sent with T1 goes stale after the cycle settled.
        coord.await_refresh("req_late", Some(&t1)).await.unwrap();

        assert_eq!(coord.refresh_calls(), 1);
        assert_eq!(backend.sent_to("/api/v1/refresh").len(), 1);
        assert_eq!(store.credential().await.unwrap().expose(), "T2");
    }

    #[tokio::test]
    async fn ended_session_is_not_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::refresh_ok("T2"));
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();
        store.clear().await.unwrap();

        let failure = coord.await_refresh("req_a", Some(&t1)).await.unwrap_err();
        assert_eq!(failure.reason, "session ended during refresh");
        assert_eq!(coord.refresh_calls(), 0);
        assert!(!store.is_authenticated().await);
        assert_eq!(events.redirects(), 0);
    }

    #[tokio::test]
    async fn clear_during_refresh_drops_new_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(storefront_session::DEFAULT_RECORD_FILE);
        let store = authenticated_store(&dir, "T1").await;
        let backend = Arc::new(FakeBackend::new());
        backend.on_refresh(Reply::refresh_ok("T2"));
        backend.hold_refresh();
        let events = Arc::new(RecordingEvents::default());
        let coord = coordinator(&backend, &store, &events);
        let t1 = store.credential().await.unwrap();

        let waiter = {
            let coord = coord.clone();
            let t1 = t1.clone();
            tokio::spawn(async move { coord.await_refresh("req_a", Some(&t1)).await })
        };
        wait_for_waiters(&coord, 1).await;
        store.clear().await.unwrap();
        backend.release_refresh();

        let failure = waiter.await.unwrap().unwrap_err();
        assert_eq!(failure.reason, "session ended during refresh");
        assert!(!store.is_authenticated().await);
        assert!(!path.exists(), "refreshed credential was written after clear");
        assert_eq!(events.redirects(), 0, "abandoned cycle must not tear down again");
        assert!(!coord.is_pending().await);
    }
}
