//! Authenticated HTTP client for the storefront backend
//!
//! Every outbound call runs through one pipeline: the augmenter stamps the
//! current bearer credential, the transport sends it, and a failed response
//! is classified against the backend's fixed status contract
//! (403 forbidden, 401 no session, 406 stale credential). The cascade policy
//! then either rejects, tears the session down, or hands the request to the
//! refresh coordinator, which shares one refresh call between every request
//! that went stale at the same time and replays each of them once.
//!
//! Request lifecycle:
//! 1. `AuthClient::send()` wraps the request in a `RequestContext` (`retried = false`)
//! 2. `augment()` sets `Authorization: Bearer <credential>` from the session store
//! 3. 2xx → returned to the caller
//! 4. 406 on a first attempt → `RefreshCoordinator::await_refresh()`, then one replay
//! 5. 403/401 → session teardown (clear + login redirect), rejected to the caller
//! 6. Anything else (including 406 on a replay) → rejected unchanged

pub mod augment;
pub mod cascade;
pub mod classify;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod metrics;
pub mod refresh;

#[cfg(test)]
pub(crate) mod testing;

pub use augment::{RequestContext, augment};
pub use cascade::{CascadePolicy, Decision, LogEvents, Notice, SessionEvents, TeardownReason};
pub use classify::{FailureKind, classify_status};
pub use client::AuthClient;
pub use endpoints::Endpoints;
pub use error::{Error, FailedResponse, RefreshFailure, Result};
pub use refresh::RefreshCoordinator;
