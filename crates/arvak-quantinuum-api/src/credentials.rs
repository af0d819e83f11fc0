//! Credential storage backends.
//!
//! A [`CredentialStore`] holds the username, the long-lived refresh token and
//! the short-lived access (id) token used by the [`Authenticator`].  Two
//! backends are provided:
//!
//! - [`MemoryCredentialStore`]: everything lives in memory for the lifetime
//!   of the client.  It can also hold a password for a single login cycle.
//! - [`FileCredentialStore`]: the username and refresh token survive process
//!   restarts in a JSON file readable only by the current user.  The access
//!   token is kept in memory and the password is never stored.
//!
//! Callers must not assume persistence: both backends implement the same
//! trait and can be swapped freely.
//!
//! [`Authenticator`]: crate::auth::Authenticator

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{QuantinuumError, QuantinuumResult};

/// A string that is zeroed when dropped.
pub type Secret = Zeroizing<String>;

/// File name of the durable credential store inside the config directory.
pub const CREDENTIALS_FILE: &str = "quantinuum_credentials.json";

/// Access tokens expiring within this window are treated as already expired.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Username, password and tokens for one Quantinuum account.
///
/// All fields are zeroed on drop.
#[derive(Default, Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    /// Account email.
    pub username: Option<String>,
    /// Password, kept for one login cycle only.
    pub password: Option<String>,
    /// Refresh token used to mint new access tokens.
    pub refresh_token: Option<String>,
    /// Short-lived id-token sent in the `Authorization` header.
    pub access_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Storage for Quantinuum credentials.
pub trait CredentialStore: Send {
    /// Stored username, if any.
    fn username(&self) -> Option<String>;

    /// Stored refresh token, if any.
    fn refresh_token(&self) -> Option<Secret>;

    /// Stored access token, if present and not expired.
    fn access_token(&self) -> Option<Secret>;

    /// Replace both tokens.
    fn save_tokens(&mut self, access_token: &str, refresh_token: &str) -> QuantinuumResult<()>;

    /// Remember the username.
    fn save_username(&mut self, username: &str) -> QuantinuumResult<()>;

    /// Forget the access token so the next login refreshes it.
    fn clear_access_token(&mut self);

    /// Remove every stored credential.
    fn delete_all(&mut self) -> QuantinuumResult<()>;

    /// Take the cached password, if this store keeps one.
    ///
    /// The password is handed out once; later calls return `None`.
    fn take_password(&mut self) -> Option<Secret> {
        None
    }

    /// Whether the store survives process restarts.
    fn is_persistent(&self) -> bool {
        false
    }
}

/// Decode the `exp` claim of a JWT without verifying its signature.
///
/// Returns `None` when the token is not a JWT or carries no expiry.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = Zeroizing::new(URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?);
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

/// Whether an access token has expired (or will within the buffer window).
pub fn is_token_expired(token: &str) -> bool {
    token_expiry(token)
        .is_some_and(|exp| Utc::now() + Duration::seconds(EXPIRY_BUFFER_SECS) >= exp)
}

fn live_access_token(token: Option<&String>) -> Option<Secret> {
    let token = token?;
    if is_token_expired(token) {
        debug!("Stored access token has expired");
        return None;
    }
    Some(Zeroizing::new(token.clone()))
}

fn replace(slot: &mut Option<String>, value: Option<&str>) {
    slot.zeroize();
    *slot = value.map(str::to_string);
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Credential store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: Credentials,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.credentials.username = Some(username.into());
        self
    }

    /// Cache a password for the next login.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials.password = Some(password.into());
        self
    }

    /// Cache a password for the next login.
    pub fn set_password(&mut self, password: &str) {
        replace(&mut self.credentials.password, Some(password));
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn username(&self) -> Option<String> {
        self.credentials.username.clone()
    }

    fn refresh_token(&self) -> Option<Secret> {
        self.credentials.refresh_token.clone().map(Zeroizing::new)
    }

    fn access_token(&self) -> Option<Secret> {
        live_access_token(self.credentials.access_token.as_ref())
    }

    fn save_tokens(&mut self, access_token: &str, refresh_token: &str) -> QuantinuumResult<()> {
        replace(&mut self.credentials.access_token, Some(access_token));
        replace(&mut self.credentials.refresh_token, Some(refresh_token));
        Ok(())
    }

    fn save_username(&mut self, username: &str) -> QuantinuumResult<()> {
        replace(&mut self.credentials.username, Some(username));
        Ok(())
    }

    fn clear_access_token(&mut self) {
        replace(&mut self.credentials.access_token, None);
    }

    fn delete_all(&mut self) -> QuantinuumResult<()> {
        self.credentials.zeroize();
        Ok(())
    }

    fn take_password(&mut self) -> Option<Secret> {
        self.credentials.password.take().map(Zeroizing::new)
    }
}

// ---------------------------------------------------------------------------
// Durable store
// ---------------------------------------------------------------------------

/// On-disk representation: only the username and refresh token.
#[derive(Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct PersistedCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(
        rename = "refresh-token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    refresh_token: Option<String>,
}

/// Credential store that persists the username and refresh token to disk.
///
/// The access token only lives in memory; the password is never stored.
pub struct FileCredentialStore {
    path: PathBuf,
    persisted: PersistedCredentials,
    access_token: Option<String>,
}

impl fmt::Debug for FileCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCredentialStore")
            .field("path", &self.path)
            .field("username", &self.persisted.username)
            .field("refresh_token", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl FileCredentialStore {
    /// Default location: `<config_dir>/arvak/quantinuum_credentials.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("arvak").join(CREDENTIALS_FILE))
    }

    /// Open the store at its default location.
    pub fn new() -> QuantinuumResult<Self> {
        let path = Self::default_path().ok_or_else(|| {
            QuantinuumError::Config("No configuration directory available".into())
        })?;
        Self::open(path)
    }

    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> QuantinuumResult<Self> {
        let path = path.into();
        let persisted = if path.exists() {
            let contents = Zeroizing::new(std::fs::read_to_string(&path)?);
            serde_json::from_str(&contents)?
        } else {
            PersistedCredentials::default()
        };

        Ok(Self {
            path,
            persisted,
            access_token: None,
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> QuantinuumResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = Zeroizing::new(serde_json::to_string_pretty(&self.persisted)?);
        std::fs::write(&self.path, json.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }
}

impl Drop for FileCredentialStore {
    fn drop(&mut self) {
        self.access_token.zeroize();
    }
}

impl CredentialStore for FileCredentialStore {
    fn username(&self) -> Option<String> {
        self.persisted.username.clone()
    }

    fn refresh_token(&self) -> Option<Secret> {
        self.persisted.refresh_token.clone().map(Zeroizing::new)
    }

    fn access_token(&self) -> Option<Secret> {
        live_access_token(self.access_token.as_ref())
    }

    fn save_tokens(&mut self, access_token: &str, refresh_token: &str) -> QuantinuumResult<()> {
        replace(&mut self.access_token, Some(access_token));
        replace(&mut self.persisted.refresh_token, Some(refresh_token));
        self.persist()
    }

    fn save_username(&mut self, username: &str) -> QuantinuumResult<()> {
        replace(&mut self.persisted.username, Some(username));
        self.persist()
    }

    fn clear_access_token(&mut self) {
        replace(&mut self.access_token, None);
    }

    fn delete_all(&mut self) -> QuantinuumResult<()> {
        self.persisted.zeroize();
        self.access_token.zeroize();
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an unsigned JWT whose `exp` claim is `exp`.
    pub(crate) fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    fn as_str(secret: Option<Secret>) -> Option<String> {
        secret.map(|s| (*s).clone())
    }

    fn check_save_and_delete(store: &mut dyn CredentialStore) {
        store.save_tokens("access-1", "refresh-1").unwrap();
        assert_eq!(as_str(store.access_token()).as_deref(), Some("access-1"));
        assert_eq!(as_str(store.refresh_token()).as_deref(), Some("refresh-1"));

        store.save_tokens("access-2", "refresh-2").unwrap();
        assert_eq!(as_str(store.access_token()).as_deref(), Some("access-2"));
        assert_eq!(as_str(store.refresh_token()).as_deref(), Some("refresh-2"));

        store.delete_all().unwrap();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.username().is_none());
    }

    #[test]
    fn test_memory_store_save_and_delete() {
        let mut store = MemoryCredentialStore::new().with_username("user@example.com");
        check_save_and_delete(&mut store);
    }

    #[test]
    fn test_file_store_save_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::open(dir.path().join(CREDENTIALS_FILE)).unwrap();
        store.save_username("user@example.com").unwrap();
        check_save_and_delete(&mut store);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_memory_store_password_used_once() {
        let mut store = MemoryCredentialStore::new().with_password("hunter2");
        assert_eq!(as_str(store.take_password()).as_deref(), Some("hunter2"));
        assert!(store.take_password().is_none());
        assert!(!store.is_persistent());
    }

    #[test]
    fn test_file_store_persists_username_and_refresh_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CREDENTIALS_FILE);

        {
            let mut store = FileCredentialStore::open(&path).unwrap();
            store.save_username("user@example.com").unwrap();
            store.save_tokens("access-token", "refresh-token").unwrap();
            assert!(store.is_persistent());
            assert!(store.take_password().is_none());
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("refresh-token"));
        assert!(!contents.contains("access-token"));

        let reopened = FileCredentialStore::open(&path).unwrap();
        assert_eq!(reopened.username().as_deref(), Some("user@example.com"));
        assert_eq!(
            as_str(reopened.refresh_token()).as_deref(),
            Some("refresh-token")
        );
        assert!(reopened.access_token().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::open(dir.path().join(CREDENTIALS_FILE)).unwrap();
        store.save_username("user@example.com").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_clear_access_token_keeps_refresh() {
        let mut store = MemoryCredentialStore::new();
        store.save_tokens("a", "r").unwrap();
        store.clear_access_token();
        assert!(store.access_token().is_none());
        assert_eq!(as_str(store.refresh_token()).as_deref(), Some("r"));
    }

    #[test]
    fn test_token_expiry_decoding() {
        let exp = Utc::now().timestamp() + 3600;
        let token = jwt_with_exp(exp);
        assert_eq!(token_expiry(&token).map(|t| t.timestamp()), Some(exp));
        assert!(!is_token_expired(&token));

        assert!(token_expiry("not-a-jwt").is_none());
        assert!(!is_token_expired("not-a-jwt"));
    }

    #[test]
    fn test_expired_access_token_reported_absent() {
        let mut store = MemoryCredentialStore::new();
        let expired = jwt_with_exp(Utc::now().timestamp() - 10);
        store.save_tokens(&expired, "refresh").unwrap();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_some());

        let soon = jwt_with_exp(Utc::now().timestamp() + 30);
        store.save_tokens(&soon, "refresh").unwrap();
        assert!(store.access_token().is_none());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let mut store = MemoryCredentialStore::new();
        store.save_tokens("secret-access", "secret-refresh").unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
