//! Persisted sign-in state.
//!
//! Credentials are stored as JSON at `<storage_dir>/credentials.json`.
//! Writes are atomic via a temp-rename pattern so a crash mid-write never
//! leaves a truncated file behind.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::auth::{BearerAuth, TokenFactory};

const CREDENTIALS_FILE: &str = "credentials.json";

/// What survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Bearer token, or `None` when signed out.
    #[serde(default)]
    pub token: Option<String>,
    /// Whether the user finished the first-login password change.
    #[serde(default)]
    pub first_login_completed: bool,
}

/// File-backed credential storage feeding the shared bearer token.
///
/// Every change is written through to disk and to the [`BearerAuth`]
/// shared with the REST client and push channels, so the next request or
/// (re)connect attempt uses it.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<Credentials>,
    auth: BearerAuth,
}

impl CredentialStore {
    /// Load credentials from `dir`, creating nothing until the first write.
    ///
    /// # Arguments
    ///
    /// * `dir` - Storage directory. Need not exist yet.
    ///
    /// # Returns
    ///
    /// A store holding the persisted credentials, or empty credentials if
    /// the file is missing or unreadable as JSON. Parse failures are logged
    /// as warnings via `tracing::warn!`.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` only for unexpected I/O failures (e.g. permission
    /// denied).
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let path = dir.as_ref().join(CREDENTIALS_FILE);
        let credentials = load(&path)?;
        let auth = BearerAuth::new(Arc::new(RwLock::new(
            credentials.token.clone().unwrap_or_default(),
        )));
        tracing::debug!(
            path = %path.display(),
            signed_in = credentials.token.is_some(),
            "credentials loaded"
        );
        Ok(Self {
            path,
            state: Mutex::new(credentials),
            auth,
        })
    }

    /// Location of the credentials file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current credentials.
    pub fn credentials(&self) -> Credentials {
        self.lock().clone()
    }

    /// The current token.
    pub fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    pub fn has_completed_first_login(&self) -> bool {
        self.lock().first_login_completed
    }

    /// Store a new token (e.g. after sign-in) and persist it.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the file cannot be written. The in-memory
    /// token is updated regardless.
    pub fn set_token(&self, token: impl Into<String>) -> io::Result<()> {
        let token = token.into();
        let mut state = self.lock();
        state.token = (!token.is_empty()).then(|| token.clone());
        *self.auth.token.write().unwrap_or_else(PoisonError::into_inner) = token;
        save(&self.path, &state)
    }

    /// Record that the first-login flow is done and persist it.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the file cannot be written.
    pub fn mark_first_login_completed(&self) -> io::Result<()> {
        let mut state = self.lock();
        state.first_login_completed = true;
        save(&self.path, &state)
    }

    /// Forget everything: empty the shared token and delete the file.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the file exists but cannot be removed.
    pub fn clear(&self) -> io::Result<()> {
        *self.lock() = Credentials::default();
        self.auth
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// The bearer auth shared with the REST client.
    pub fn bearer(&self) -> BearerAuth {
        self.auth.clone()
    }

    /// A token factory for push channels.
    pub fn token_factory(&self) -> TokenFactory {
        self.auth.factory()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Credentials> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load(path: &Path) -> io::Result<Credentials> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Credentials::default()),
        Err(e) => return Err(e),
    };
    match serde_json::from_slice::<Credentials>(&bytes) {
        Ok(credentials) => Ok(credentials),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to deserialize credentials; starting signed out"
            );
            Ok(Credentials::default())
        }
    }
}

fn save(path: &Path, credentials: &Credentials) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(credentials)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_signed_out() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = CredentialStore::open(dir.path()).unwrap();
        assert_eq!(store.credentials(), Credentials::default());
        assert!(store.bearer().header_value().is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn set_token_persists_and_feeds_bearer() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = CredentialStore::open(dir.path()).unwrap();
        let factory = store.token_factory();

        store.set_token("abc").unwrap();

        assert_eq!(store.bearer().header_value().as_deref(), Some("Bearer abc"));
        assert_eq!(factory().as_deref(), Some("abc"));
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["token"], "abc");
        assert_eq!(raw["firstLoginCompleted"], false);
        assert!(!dir.path().join("credentials.json.tmp").exists());
    }

    #[test]
    fn reopen_restores_state() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        {
            let store = CredentialStore::open(dir.path()).unwrap();
            store.set_token("abc").unwrap();
            store.mark_first_login_completed().unwrap();
        }
        let store = CredentialStore::open(dir.path()).unwrap();
        assert_eq!(store.token().as_deref(), Some("abc"));
        assert!(store.has_completed_first_login());
        assert_eq!(store.bearer().current().as_deref(), Some("abc"));
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::write(dir.path().join("credentials.json"), b"{not json").unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        assert_eq!(store.token(), None);
    }

    #[test]
    fn clear_removes_file_and_token() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = CredentialStore::open(dir.path()).unwrap();
        let bearer = store.bearer();
        store.set_token("abc").unwrap();

        store.clear().unwrap();

        assert!(!store.path().exists());
        assert!(bearer.header_value().is_none());
        assert_eq!(store.credentials(), Credentials::default());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn creates_missing_storage_dir_on_write() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let nested = dir.path().join("a").join("b");
        let store = CredentialStore::open(&nested).unwrap();
        store.set_token("t").unwrap();
        assert!(nested.join("credentials.json").exists());
    }
}
