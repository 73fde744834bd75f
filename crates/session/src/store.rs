//! Durable session store
//!
//! Keeps the current `Session` in memory behind a tokio Mutex and mirrors it
//! to one JSON record on disk. Every mutation holds the lock across the disk
//! write, so the in-memory value and the record always describe the same
//! four fields. Writes use temp-file + rename; clearing removes the record
//! outright instead of blanking fields. Only when the record can't be
//! removed is it truncated to zero bytes, which loads as anonymous.
//!
//! Nothing here touches UI state, so the refresh coordinator can call it
//! from a background task.

use std::path::{Path, PathBuf};

use common::Credential;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{Session, TokenBundle};

/// Default file name of the persisted session record.
pub const DEFAULT_RECORD_FILE: &str = "auth-info.json";

/// Process-wide session state with durable backing.
pub struct SessionStore {
    path: PathBuf,
    state: Mutex<Session>,
}

impl SessionStore {
    /// Restore the session from `path`.
    ///
    /// A missing or blank record means an anonymous session. A record that can't be
    /// parsed is discarded (and removed) rather than failing startup: the
    /// user simply has to log in again.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let session = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => {
                info!(path = %path.display(), "blank session record, starting anonymous");
                Session::anonymous()
            }
            Ok(contents) => match serde_json::from_str::<TokenBundle>(&contents) {
                Ok(bundle) => {
                    let session = Session::from_bundle(bundle);
                    info!(
                        path = %path.display(),
                        authenticated = session.is_authenticated(),
                        "restored session"
                    );
                    session
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable session record");
                    if let Err(e) = erase_record(&path).await {
                        warn!(path = %path.display(), error = %e, "could not erase unreadable session record");
                    }
                    Session::anonymous()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no session record, starting anonymous");
                Session::anonymous()
            }
            Err(e) => return Err(Error::Io(format!("reading session record: {e}"))),
        };

        Ok(Self {
            path,
            state: Mutex::new(session),
        })
    }

    /// Snapshot of the current session.
    pub async fn read(&self) -> Session {
        self.state.lock().await.clone()
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.state.lock().await.credential().cloned()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.lock().await.is_authenticated()
    }

    /// Replace the whole session and persist it.
    ///
    /// The record is written before the in-memory value changes; if the
    /// write fails, readers keep seeing the previous session.
    pub async fn write(&self, session: Session) -> Result<()> {
        let mut state = self.state.lock().await;
        self.persist(&session).await?;
        *state = session;
        debug!("session written");
        Ok(())
    }

    /// Rotate the credential from a refresh bundle in one atomic step.
    ///
    /// Identity fields missing from the bundle are kept. Returns the session
    /// now in effect. A refresh never creates a session: if the session was
    /// cleared while the refresh was in flight, nothing is written and
    /// `Error::SessionEnded` is returned.
    pub async fn apply_refresh(&self, bundle: TokenBundle) -> Result<Session> {
        let mut state = self.state.lock().await;
        if !state.is_authenticated() {
            return Err(Error::SessionEnded);
        }
        let next = state.refreshed(bundle);
        self.persist(&next).await?;
        *state = next.clone();
        debug!("session credential rotated");
        Ok(next)
    }

    /// Reset to the anonymous session and delete the record.
    ///
    /// The record is erased first. Memory is reset even when erasing fails,
    /// so no later request carries the old credential; the error is still
    /// returned. Idempotent: clearing an already-empty store is a no-op.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let was_authenticated = state.is_authenticated();
        let erased = erase_record(&self.path).await;
        *state = Session::anonymous();
        erased?;
        if was_authenticated {
            info!("session cleared");
        }
        Ok(())
    }

    /// Location of the persisted record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        match session.to_bundle() {
            Some(bundle) => write_atomic(&self.path, &bundle).await,
            None => erase_record(&self.path).await,
        }
    }
}

/// Write the record atomically (temp file in the same directory, then
/// rename). Permissions are 0600 since the record holds a bearer token.
async fn write_atomic(path: &Path, bundle: &TokenBundle) -> Result<()> {
    let json = serde_json::to_string_pretty(bundle)
        .map_err(|e| Error::Record(format!("serializing session: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_RECORD_FILE);
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session record: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session record permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session record: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}

/// Delete the record, or truncate it in place when it can't be deleted
/// (a read-only directory). `load` reads a blank record as anonymous.
async fn erase_record(path: &Path) -> Result<()> {
    let Err(remove_err) = remove_record(path).await else {
        return Ok(());
    };
    warn!(path = %path.display(), error = %remove_err, "could not remove session record, blanking it");
    tokio::fs::write(path, b"")
        .await
        .map_err(|e| Error::Io(format!("blanking session record: {e}")))
}

async fn remove_record(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "removed session record");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(format!("removing session record: {e}"))),
    }
}
