//! Request augmentation and per-request replay state

use storefront_session::Session;
use transport::ApiRequest;
use transport::header::{AUTHORIZATION, HeaderValue};
use tracing::warn;

/// One caller's request as it moves through the pipeline.
///
/// `retried` flips at most once, when the request is replayed after a
/// refresh. It is what lets the classifier treat a second 406 as terminal.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: String,
    request: ApiRequest,
    retried: bool,
}

impl RequestContext {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            id: format!("req_{}", uuid::Uuid::new_v4().as_simple()),
            request,
            retried: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The caller's request, before augmentation.
    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Mark the context as replayed. Returns false if it already was.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }

    /// Copy of the request stamped with `session`'s credential.
    pub fn outbound(&self, session: &Session) -> ApiRequest {
        let mut request = self.request.clone();
        augment(&mut request, session);
        request
    }
}

/// Set `Authorization: Bearer <credential>` from the session.
///
/// Without a credential the request goes out unauthenticated and the server
/// decides. Any caller-supplied `Authorization` header is dropped either way:
/// the session store is the only source of credentials.
pub fn augment(request: &mut ApiRequest, session: &Session) {
    request.headers.remove(AUTHORIZATION);

    let Some(credential) = session.credential() else {
        return;
    };

    match HeaderValue::from_str(&credential.bearer()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }
        Err(e) => {
            warn!(error = %e, "credential is not a valid header value, sending unauthenticated");
        }
    }
}
