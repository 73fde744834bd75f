//! In-process fakes shared by the unit tests

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storefront_session::{Session, SessionStore, TokenBundle};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use transport::{ApiRequest, ApiResponse, StatusCode, Transport};

use crate::cascade::{Notice, SessionEvents};
use crate::endpoints::Endpoints;
use crate::refresh::RefreshCoordinator;

/// A canned response.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    status: u16,
    body: String,
}

impl Reply {
    pub(crate) fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub(crate) fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    pub(crate) fn login_ok(token: &str) -> Self {
        Self::ok(
            &serde_json::json!({
                "content": {"token": token, "userId": 42, "userName": "Kim", "userRole": "OWNER"}
            })
            .to_string(),
        )
    }

    pub(crate) fn refresh_ok(token: &str) -> Self {
        Self::ok(&serde_json::json!({"response": {"content": {"token": token}}}).to_string())
    }

    fn into_response(self) -> ApiResponse {
        ApiResponse::new(
            StatusCode::from_u16(self.status).unwrap(),
            self.body.into_bytes(),
        )
    }
}

/// How the fake answers a resource path.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    /// `reply` for `Bearer <token>`, 406 for any other credential, 401 without one
    Guarded { token: String, reply: Reply },
    Fixed(Reply),
    /// No response at all
    Unreachable,
}

impl Route {
    pub(crate) fn guarded(token: &str, reply: Reply) -> Self {
        Route::Guarded {
            token: token.to_string(),
            reply,
        }
    }
}

#[derive(Default)]
struct State {
    sent: Vec<ApiRequest>,
    login: Option<Reply>,
    refresh: Vec<Reply>,
    refreshes_answered: usize,
    logout: Option<Reply>,
    routes: HashMap<String, Route>,
}

/// Scriptable backend implementing `Transport`.
///
/// Records every request it sees. The refresh endpoint can be held closed
/// so tests can pile waiters onto a pending cycle before it settles.
pub(crate) struct FakeBackend {
    endpoints: Endpoints,
    state: Mutex<State>,
    refresh_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            endpoints: Endpoints::default(),
            state: Mutex::new(State::default()),
            refresh_gate: Mutex::new(None),
        }
    }

    pub(crate) fn on_login(&self, reply: Reply) {
        self.state.lock().unwrap().login = Some(reply);
    }

    /// Queue a refresh answer. The last one queued repeats.
    pub(crate) fn on_refresh(&self, reply: Reply) {
        self.state.lock().unwrap().refresh.push(reply);
    }

    pub(crate) fn on_logout(&self, reply: Reply) {
        self.state.lock().unwrap().logout = Some(reply);
    }

    pub(crate) fn route(&self, path: &str, route: Route) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), route);
    }

    /// Park refresh calls until `release_refresh`.
    pub(crate) fn hold_refresh(&self) {
        *self.refresh_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release_refresh(&self) {
        if let Some(gate) = self.refresh_gate.lock().unwrap().as_ref() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub(crate) fn sent_to(&self, path: &str) -> Vec<ApiRequest> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn reply_for(&self, request: &ApiRequest) -> Option<Reply> {
        let mut state = self.state.lock().unwrap();
        state.sent.push(request.clone());

        if request.path == self.endpoints.login {
            return Some(state.login.clone().unwrap_or_else(|| Reply::login_ok("T1")));
        }
        if request.path == self.endpoints.refresh {
            let n = state.refreshes_answered;
            state.refreshes_answered += 1;
            let idx = n.min(state.refresh.len().saturating_sub(1));
            return Some(
                state
                    .refresh
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| Reply::status(500, "no refresh scripted")),
            );
        }
        if request.path == self.endpoints.logout {
            return Some(state.logout.clone().unwrap_or_else(|| Reply::ok("{}")));
        }

        match state.routes.get(&request.path) {
            Some(Route::Guarded { token, reply }) => match request.authorization() {
                Some(auth) if auth == format!("Bearer {token}") => Some(reply.clone()),
                Some(_) => Some(Reply::status(406, r#"{"message":"token expired"}"#)),
                None => Some(Reply::status(401, r#"{"message":"login required"}"#)),
            },
            Some(Route::Fixed(reply)) => Some(reply.clone()),
            Some(Route::Unreachable) => None,
            None => Some(Reply::status(404, r#"{"message":"not found"}"#)),
        }
    }
}

impl Transport for FakeBackend {
    fn id(&self) -> &str {
        "fake"
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            let reply = self.reply_for(request);

            if request.path == self.endpoints.refresh {
                let gate = self.refresh_gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    let _permit = gate.acquire().await.unwrap();
                }
            }

            reply
                .map(Reply::into_response)
                .ok_or_else(|| transport::Error::Connect("connection refused".into()))
        })
    }
}

/// `SessionEvents` that records what it was asked to do.
#[derive(Default)]
pub(crate) struct RecordingEvents {
    notices: Mutex<Vec<Notice>>,
    redirects: AtomicUsize,
}

impl RecordingEvents {
    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub(crate) fn redirects(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl SessionEvents for RecordingEvents {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn redirect_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }
}

/// A store in `dir` holding a full session for `token`.
pub(crate) async fn authenticated_store(dir: &TempDir, token: &str) -> Arc<SessionStore> {
    let store = SessionStore::load(dir.path().join("auth-info.json"))
        .await
        .unwrap();
    store
        .write(Session::from_bundle(TokenBundle {
            token: token.into(),
            user_id: Some("42".into()),
            user_name: Some("Kim".into()),
            user_role: Some("OWNER".into()),
        }))
        .await
        .unwrap();
    Arc::new(store)
}

/// Poll until `n` requests are parked on the pending cycle.
pub(crate) async fn wait_for_waiters(coordinator: &RefreshCoordinator, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.waiting().await < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never saw {n} waiters on the refresh cycle"));
}
