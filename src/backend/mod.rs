// Backend collaborators for FlashChat
// The feed and the screens only talk to these traits; the local
// implementations below back the terminal client and the tests.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::models::{DocumentId, Fields, Identity, Snapshot};

pub mod auth;
pub mod store;

pub use auth::LocalIdentityProvider;
pub use store::LocalStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("The email address is badly formatted: {0}")]
    InvalidEmail(String),

    #[error("The password must be 6 characters long or more")]
    WeakPassword,

    #[error("The email address is already in use by another account: {0}")]
    EmailAlreadyInUse(String),

    #[error("There is no user record corresponding to {0}")]
    UserNotFound(String),

    #[error("The password is invalid")]
    WrongPassword,

    #[error("No user is signed in")]
    NotSignedIn,

    #[error("Account storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Invalid collection name: {0:?}")]
    InvalidCollection(String),

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Store data is corrupt: {0}")]
    Corrupt(String),
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

impl From<io::Error> for AuthError {
    fn from(e: io::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Storage(e.to_string())
    }
}

/// Live, ordered snapshots of one collection. Dropping the stream cancels
/// the subscription.
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, StoreError>>;

/// Email/password authentication and the current signed-in identity
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Registers a new account and signs it in
    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    fn current_identity(&self) -> Option<Identity>;

    fn sign_out(&self) -> Result<(), AuthError>;
}

/// A realtime document store keyed by collection
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, collection: &str, fields: Fields) -> Result<DocumentId, StoreError>;

    /// Yields the current snapshot immediately, then a full snapshot after
    /// every change, sorted ascending by `order_field`.
    async fn subscribe_ordered(
        &self,
        collection: &str,
        order_field: &str,
    ) -> Result<SnapshotStream, StoreError>;
}

/// Exclusive advisory lock on `<path>.lock`, released on drop. Every process
/// rewriting a shared data file holds it across its read-modify-write.
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    pub(crate) fn acquire(path: &Path) -> io::Result<Self> {
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        let lock_path = PathBuf::from(lock_name);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock()?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Serialize `value` into a fresh temp file beside `path` and rename it into
/// place, so readers only ever see complete files
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Run file I/O on the blocking pool instead of a runtime worker
pub(crate) async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(io::Error::other)
}
