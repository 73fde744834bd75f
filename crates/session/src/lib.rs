//! Authenticated session state for the storefront client
//!
//! Holds the signed-in identity (bearer credential, user id, display name,
//! role) and persists it as a single JSON record so it survives restarts.
//! The store is an owned object rather than ambient global state: the
//! request pipeline and the refresh coordinator share it through an `Arc`,
//! and tests build as many independent stores as they need.
//!
//! Session lifecycle:
//! 1. `SessionStore::load()` restores the record at startup (or starts anonymous)
//! 2. Login writes a full `Session` built from the returned `TokenBundle`
//! 3. A successful refresh rotates the credential via `SessionStore::apply_refresh()`
//! 4. Logout or an irrecoverable auth failure calls `SessionStore::clear()`

pub mod error;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use session::{Session, TokenBundle};
pub use store::{DEFAULT_RECORD_FILE, SessionStore};
