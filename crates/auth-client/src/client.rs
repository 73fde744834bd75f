//! The authenticated request pipeline

use std::sync::Arc;

use serde::Serialize;
use storefront_session::{Session, SessionStore};
use tracing::{debug, info, instrument, warn};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::augment::RequestContext;
use crate::cascade::{CascadePolicy, Decision, SessionEvents, TeardownReason, decide};
use crate::classify::classify_status;
use crate::endpoints::{self, Endpoints};
use crate::error::{Error, Result};
use crate::refresh::RefreshCoordinator;

/// Sends requests with the session's credential and recovers from stale
/// credentials. Cheap to clone; clones share the session and the refresh
/// coordinator.
#[derive(Clone)]
pub struct AuthClient {
    transport: Arc<dyn Transport>,
    store: Arc<SessionStore>,
    cascade: CascadePolicy,
    coordinator: RefreshCoordinator,
    endpoints: Endpoints,
}

impl AuthClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<SessionStore>,
        events: Arc<dyn SessionEvents>,
        endpoints: Endpoints,
    ) -> Self {
        let cascade = CascadePolicy::new(store.clone(), events);
        let coordinator = RefreshCoordinator::new(
            transport.clone(),
            endpoints.clone(),
            store.clone(),
            cascade.clone(),
        );
        Self {
            transport,
            store,
            cascade,
            coordinator,
            endpoints,
        }
    }

    /// Send `request` through the pipeline.
    ///
    /// Resolves with the 2xx response, or with the failure after the cascade
    /// policy has run. A stale credential is refreshed and the request
    /// replayed at most once; the caller only sees the replay's outcome.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.run(RequestContext::new(request)).await
    }

    #[instrument(
        skip_all,
        fields(request_id = %ctx.id(), method = %ctx.request().method, path = %ctx.request().path)
    )]
    async fn run(&self, mut ctx: RequestContext) -> Result<ApiResponse> {
        loop {
            let session = self.store.read().await;
            let outbound = ctx.outbound(&session);
            let sent_with = session.credential().cloned();

            let response = match self.transport.send(&outbound).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(transport = self.transport.id(), error = %e, "no response");
                    crate::metrics::record_request("transport_error");
                    return Err(e.into());
                }
            };

            if response.is_success() {
                let outcome = if ctx.is_retried() { "replayed" } else { "success" };
                crate::metrics::record_request(outcome);
                return Ok(response);
            }

            let kind = classify_status(response.status, ctx.is_retried());
            debug!(
                status = response.status.as_u16(),
                kind = kind.label(),
                retried = ctx.is_retried(),
                "request failed"
            );

            match decide(kind) {
                Decision::Refresh => {
                    if let Err(failure) = self
                        .coordinator
                        .await_refresh(ctx.id(), sent_with.as_ref())
                        .await
                    {
                        crate::metrics::record_request("refresh_failed");
                        return Err(Error::RefreshFailed {
                            response: response.into(),
                            failure,
                        });
                    }
                    ctx.mark_retried();
                    debug!("replaying with refreshed credential");
                }
                Decision::Teardown(reason) => {
                    self.cascade.teardown(reason).await;
                    crate::metrics::record_request(kind.label());
                    return Err(match reason {
                        TeardownReason::Forbidden => Error::Forbidden(response.into()),
                        _ => Error::NoSession(response.into()),
                    });
                }
                Decision::Reject => {
                    crate::metrics::record_request("rejected");
                    return Err(Error::Status(response.into()));
                }
            }
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(ApiRequest::post(path).with_json(body)?).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(ApiRequest::put(path).with_json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Log in and replace the session wholesale.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let bundle =
            endpoints::login(self.transport.as_ref(), &self.endpoints, username, password).await?;
        let session = Session::from_bundle(bundle);
        self.store.write(session.clone()).await?;
        info!(
            user_id = session.user_id().unwrap_or("-"),
            role = session.role().unwrap_or("-"),
            "logged in"
        );
        Ok(session)
    }

    /// End the session. The server call is best-effort; the local session
    /// is torn down either way.
    pub async fn logout(&self) {
        let session = self.store.read().await;
        if session.is_authenticated() {
            if let Err(e) = endpoints::logout(self.transport.as_ref(), &self.endpoints, &session).await {
                warn!(error = %e, "logout call failed, clearing local session anyway");
            }
        }
        self.cascade.teardown(TeardownReason::Logout).await;
    }

    /// Snapshot of the current session.
    pub async fn session(&self) -> Session {
        self.store.read().await
    }

    pub fn session_store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }
}
