//! Login, refresh and logout endpoint calls
//!
//! All three go straight to the raw transport, never through the
//! authenticated pipeline. For refresh this is what breaks the recursion: a
//! refresh that itself came back 406 must not start another refresh. The
//! refresh call carries no `Authorization` header; the backend identifies the
//! session by the cookie set at login.
//!
//! Success bodies wrap the token bundle as `{"content": ...}` (login) or
//! `{"response": {"content": ...}}` (refresh). Both shapes are accepted on
//! both endpoints.

use serde::Deserialize;
use storefront_session::{Session, TokenBundle};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::augment::augment;
use crate::error::{Error, FailedResponse, RefreshFailure, Result};

/// Endpoint paths, relative to the transport's base URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/api/v1/login".into(),
            refresh: "/api/v1/refresh".into(),
            logout: "/api/v1/logout".into(),
        }
    }
}

/// POST form-encoded credentials, returning the token bundle.
pub async fn login(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    username: &str,
    password: &str,
) -> Result<TokenBundle> {
    let request = ApiRequest::post(&endpoints.login)
        .with_form(&[("username", username), ("password", password)]);
    let response = transport.send(&request).await?;

    if !response.is_success() {
        return Err(Error::LoginRejected(response.into()));
    }

    extract_bundle(&response).map_err(Error::InvalidBundle)
}

/// GET a fresh token bundle using the refresh cookie.
pub async fn refresh(
    transport: &dyn Transport,
    endpoints: &Endpoints,
) -> std::result::Result<TokenBundle, RefreshFailure> {
    let request = ApiRequest::get(&endpoints.refresh);
    let response = transport
        .send(&request)
        .await
        .map_err(|e| RefreshFailure::new(None, format!("refresh request failed: {e}")))?;

    if !response.is_success() {
        let status = response.status;
        let reason = FailedResponse::from(response)
            .message()
            .unwrap_or_else(|| "refresh endpoint rejected the session".into());
        return Err(RefreshFailure::new(Some(status), reason));
    }

    extract_bundle(&response).map_err(|reason| RefreshFailure::new(None, reason))
}

/// Tell the backend the session is over. Carries the current credential.
pub async fn logout(
    transport: &dyn Transport,
    endpoints: &Endpoints,
    session: &Session,
) -> Result<()> {
    let mut request = ApiRequest::post(&endpoints.logout);
    augment(&mut request, session);
    let response = transport.send(&request).await?;

    if !response.is_success() {
        return Err(Error::Status(response.into()));
    }
    Ok(())
}

/// Pull the token bundle out of either success envelope.
pub(crate) fn extract_bundle(response: &ApiResponse) -> std::result::Result<TokenBundle, String> {
    let value: serde_json::Value = response.json().map_err(|e| e.to_string())?;
    let content = value
        .get("content")
        .or_else(|| value.pointer("/response/content"))
        .ok_or_else(|| "response carries no token bundle".to_string())?;
    let bundle: TokenBundle = serde_json::from_value(content.clone())
        .map_err(|e| format!("malformed token bundle: {e}"))?;

    if bundle.token.trim().is_empty() {
        return Err("token bundle has an empty token".into());
    }
    Ok(bundle)
}
