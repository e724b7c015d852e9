//! Local email/password identity provider
//!
//! Accounts live in memory and, when a path is given, in a JSON file so they
//! survive restarts. A file-backed provider rereads the file before every
//! sign in and registers new accounts under the file lock, so several
//! clients can share one accounts file. Passwords are never stored: each
//! account keeps a random salt and the SHA-256 digest of salt and password.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as TokioMutex;

use super::{run_blocking, write_json_atomic, AuthError, FileLock, IdentityProvider};
use crate::models::Identity;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    email: String,
    salt: String,
    digest: String,
    created_at: i64,
}

type Accounts = BTreeMap<String, Account>;

pub struct LocalIdentityProvider {
    path: Option<PathBuf>,
    accounts: TokioMutex<Accounts>,
    current: Mutex<Option<Identity>>,
}

impl LocalIdentityProvider {
    /// Accounts are kept only for the lifetime of this value
    pub fn in_memory() -> Self {
        LocalIdentityProvider {
            path: None,
            accounts: TokioMutex::new(BTreeMap::new()),
            current: Mutex::new(None),
        }
    }

    /// Load accounts from `path`, which need not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let accounts = read_accounts(&path)?;
        info!("Loaded {} accounts from {}", accounts.len(), path.display());

        Ok(LocalIdentityProvider {
            path: Some(path),
            accounts: TokioMutex::new(accounts),
            current: Mutex::new(None),
        })
    }

    fn set_current(&self, identity: Option<Identity>) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = identity;
    }
}

/// Trim and lowercase an email, rejecting anything that is not `local@domain.tld`
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let invalid = || AuthError::InvalidEmail(email.clone());

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let has_tld = match domain.rsplit_once('.') {
        Some((name, tld)) => !name.is_empty() && !tld.is_empty(),
        None => false,
    };
    if !has_tld {
        return Err(invalid());
    }
    Ok(email)
}

fn digest_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn new_salt() -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

fn read_accounts(path: &Path) -> Result<Accounts, AuthError> {
    if !path.exists() {
        return Ok(Accounts::new());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Accounts::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

/// Add `account` to the file at `path` unless another client registered the
/// email first. Returns every account on file afterwards.
fn register_on_disk(path: &Path, account: Account) -> Result<Accounts, AuthError> {
    let _file_lock = FileLock::acquire(path)?;
    let mut accounts = read_accounts(path)?;
    if accounts.contains_key(&account.email) {
        return Err(AuthError::EmailAlreadyInUse(account.email));
    }
    accounts.insert(account.email.clone(), account);
    write_json_atomic(path, &accounts)?;
    debug!("Persisted {} accounts to {}", accounts.len(), path.display());
    Ok(accounts)
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email)?;
        let mut accounts = self.accounts.lock().await;
        if let Some(path) = &self.path {
            let path = path.clone();
            *accounts = run_blocking(move || read_accounts(&path)).await??;
        }

        let account = accounts
            .get(&email)
            .ok_or_else(|| AuthError::UserNotFound(email.clone()))?;
        if digest_password(&account.salt, password) != account.digest {
            warn!("Rejected sign in for {}: wrong password", email);
            return Err(AuthError::WrongPassword);
        }

        info!("Signed in as {}", email);
        self.set_current(Some(account.email.clone()));
        Ok(account.email.clone())
    }

    async fn create_account(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let salt = new_salt();
        let account = Account {
            email: email.clone(),
            digest: digest_password(&salt, password),
            salt,
            created_at: chrono::Utc::now().timestamp(),
        };

        let mut accounts = self.accounts.lock().await;
        match &self.path {
            Some(path) => {
                let path = path.clone();
                *accounts = run_blocking(move || register_on_disk(&path, account)).await??;
            }
            None => {
                if accounts.contains_key(&email) {
                    return Err(AuthError::EmailAlreadyInUse(email));
                }
                accounts.insert(email.clone(), account);
            }
        }

        info!("Created account {}", email);
        self.set_current(Some(email.clone()));
        Ok(email)
    }

    fn current_identity(&self) -> Option<Identity> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn sign_out(&self) -> Result<(), AuthError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match current.take() {
            Some(identity) => {
                info!("Signed out {}", identity);
                Ok(())
            }
            None => Err(AuthError::NotSignedIn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  A@X.com ").unwrap(), "a@x.com");
        assert!(normalize_email("ax.com").is_err());
        assert!(normalize_email("@x.com").is_err());
        assert!(normalize_email("a@x").is_err());
        assert!(normalize_email("a@.com").is_err());
        assert!(normalize_email("a b@x.com").is_err());
        assert!(normalize_email("a@b@x.com").is_err());
    }

    #[test]
    fn test_digest_depends_on_salt() {
        let a = digest_password("00", "secret1");
        let b = digest_password("01", "secret1");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, digest_password("00", "secret1"));
    }
}
