//! Accounts and credential storage.
//!
//! A successful login yields an [`Account`] holding a resume token. The
//! client saves it in a [`CredentialStore`] and uses it to log in again
//! silently after every reconnect or restart.

use crate::error::{ClientError, ClientResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// A logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// User ID.
    pub user_id: String,
    /// Token accepted by the `login` method as `{resume: token}`.
    pub resume_token: String,
    /// Token expiry in milliseconds since the Unix epoch.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Account {
    /// Creates an account.
    pub fn new(
        user_id: impl Into<String>,
        resume_token: impl Into<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            resume_token: resume_token.into(),
            expires_at,
        }
    }

    /// Parses the result of a `login` method: `{id, token, tokenExpires}`.
    ///
    /// `tokenExpires` may be a plain number or an EJSON date
    /// (`{"$date": millis}`).
    pub fn from_login_result(result: &Value) -> Option<Self> {
        let user_id = result.get("id")?.as_str()?;
        let token = result.get("token")?.as_str()?;
        let expires_at = result.get("tokenExpires").and_then(|expires| {
            expires
                .as_i64()
                .or_else(|| expires.get("$date").and_then(Value::as_i64))
        });
        Some(Self::new(user_id, token, expires_at))
    }

    /// Returns true if the token expired at or before `now_millis`.
    #[must_use]
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_millis)
    }

    /// Parameters for a resume login.
    #[must_use]
    pub fn resume_params(&self) -> Vec<Value> {
        vec![serde_json::json!({ "resume": self.resume_token })]
    }
}

/// Persistent storage for the current account.
pub trait CredentialStore: Send {
    /// Loads the saved account.
    fn load(&self) -> ClientResult<Option<Account>>;

    /// Saves an account, replacing any previous one.
    fn save(&self, account: &Account) -> ClientResult<()>;

    /// Forgets the saved account.
    fn clear(&self) -> ClientResult<()>;
}

/// A credential store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    account: Mutex<Option<Account>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `account`.
    pub fn with_account(account: Account) -> Self {
        Self {
            account: Mutex::new(Some(account)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> ClientResult<Option<Account>> {
        Ok(self.account.lock().clone())
    }

    fn save(&self, account: &Account) -> ClientResult<()> {
        *self.account.lock() = Some(account.clone());
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        *self.account.lock() = None;
        Ok(())
    }
}

/// A credential store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Creates a store at `path`. The file is created on the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn credential_error(err: impl std::fmt::Display) -> ClientError {
    ClientError::Credential(err.to_string())
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> ClientResult<Option<Account>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(credential_error(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(credential_error)
    }

    fn save(&self, account: &Account) -> ClientResult<()> {
        let json = serde_json::to_vec_pretty(account).map_err(credential_error)?;
        // Replace atomically
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(credential_error)?;
        fs::rename(&tmp, &self.path).map_err(credential_error)
    }

    fn clear(&self) -> ClientResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(credential_error(e)),
        }
    }
}
