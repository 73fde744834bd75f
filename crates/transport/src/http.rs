//! reqwest-backed transport.
//!
//! One `reqwest::Client` with a cookie jar serves every call. The refresh
//! endpoint authenticates with the cookie set at login, so the authenticated
//! pipeline and the raw refresh path must share this instance.

use crate::{ApiRequest, ApiResponse, Body, Error, Result, Transport};
use reqwest::header::CONTENT_TYPE;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// HTTP transport rooted at a base URL.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport with a fresh cookie-enabled client.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Request(format!("building HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, timeout))
    }

    /// Build a transport around an existing client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join the base URL and a request path. Absolute URLs pass through.
    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url_for(&request.path);
            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .headers(request.headers.clone())
                .timeout(self.timeout);

            builder = match &request.body {
                Body::Empty => builder,
                Body::Json(value) => builder.json(value),
                Body::Form(fields) => builder.form(fields),
                Body::Bytes { content_type, data } => builder
                    .header(CONTENT_TYPE, content_type.as_str())
                    .body(data.clone()),
            };

            let response = builder.send().await.map_err(map_send_error)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::Body(e.to_string()))?;

            debug!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                "response received"
            );

            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_connect() {
        Error::Connect(e.to_string())
    } else {
        Error::Request(e.to_string())
    }
}
