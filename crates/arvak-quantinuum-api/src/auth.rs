//! Authentication against the Quantinuum login endpoint.
//!
//! [`Authenticator`] turns whatever the [`CredentialStore`] holds into a valid
//! access token:
//!
//! ```text
//!   no credentials ──full_login()──→ refresh token ──refresh──→ access token
//!         ↑                               │
//!         └──── "Invalid Refresh Token" ──┘
//! ```
//!
//! A full login either exchanges a federated identity token (when a provider
//! is configured) or submits an email and password, answering an MFA
//! challenge when the service asks for one.
//!
//! Every credential sent to the service is held in a [`Secret`] scoped to the
//! request, so it is zeroed as soon as the request completes, whether it
//! succeeded or not.

use std::fmt;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::api::{check_response, decode_payload};
use crate::config::{AZURE_PROVIDER, ApiConfig};
use crate::credentials::{CredentialStore, Secret};
use crate::error::{QuantinuumError, QuantinuumResult};
use crate::runtime;

/// Login error code meaning "MFA verification code required".
pub const ERROR_CODE_MFA_REQUIRED: i64 = 73;

/// Error text the service uses for a rejected refresh token.
const INVALID_REFRESH_TOKEN: &str = "Invalid Refresh Token";

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Source of interactively entered credentials.
///
/// Implementations may block; the authenticator calls them on the blocking
/// thread pool.
pub trait CredentialPrompt: Send + Sync {
    /// Ask for the account email.
    fn username(&self) -> QuantinuumResult<String>;

    /// Ask for the account password.
    fn password(&self) -> QuantinuumResult<Secret>;

    /// Ask for an MFA verification code.
    fn mfa_code(&self) -> QuantinuumResult<Secret>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_line(prompt: &str) -> QuantinuumResult<String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

impl CredentialPrompt for TerminalPrompt {
    fn username(&self) -> QuantinuumResult<String> {
        Self::read_line("Enter your Quantinuum email: ")
    }

    fn password(&self) -> QuantinuumResult<Secret> {
        Ok(Zeroizing::new(rpassword::prompt_password(
            "Enter your Quantinuum password: ",
        )?))
    }

    fn mfa_code(&self) -> QuantinuumResult<Secret> {
        Ok(Zeroizing::new(Self::read_line(
            "Enter your MFA verification code: ",
        )?))
    }
}

// ---------------------------------------------------------------------------
// Federated login
// ---------------------------------------------------------------------------

/// A federated identity provider whose token the login endpoint accepts.
#[async_trait]
pub trait FederatedProvider: Send + Sync {
    /// Provider name as configured (e.g. `"microsoft"`).
    fn name(&self) -> &str;

    /// Run the provider's login flow and return its identity token.
    async fn provider_token(&self, http: &reqwest::Client) -> QuantinuumResult<Secret>;
}

/// Microsoft identity platform authority.
pub const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Environment variable holding the Azure application (client) id.
pub const AZURE_CLIENT_ID_VAR: &str = "ARVAK_QUANTINUUM_AZURE_CLIENT_ID";

/// Microsoft account login through the OAuth 2.0 device-code flow.
#[derive(Debug, Clone)]
pub struct MicrosoftLogin {
    authority: String,
    tenant: String,
    client_id: String,
    scopes: Vec<String>,
}

impl MicrosoftLogin {
    /// Create a login flow for an Azure application.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            authority: MICROSOFT_AUTHORITY.to_string(),
            tenant: "organizations".to_string(),
            client_id: client_id.into(),
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
        }
    }

    /// Create a login flow with the client id from `ARVAK_QUANTINUUM_AZURE_CLIENT_ID`.
    pub fn from_env() -> QuantinuumResult<Self> {
        std::env::var(AZURE_CLIENT_ID_VAR).map(Self::new).map_err(|_| {
            QuantinuumError::Config(format!(
                "Microsoft login needs an Azure client id: set {AZURE_CLIENT_ID_VAR}"
            ))
        })
    }

    /// Use a specific tenant instead of `organizations`.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    /// Use a different authority host.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into().trim_end_matches('/').to_string();
        self
    }

    fn device_code_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/devicecode", self.authority, self.tenant)
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant)
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct DeviceTokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceTokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[async_trait]
impl FederatedProvider for MicrosoftLogin {
    fn name(&self) -> &str {
        AZURE_PROVIDER
    }

    #[instrument(skip(self, http))]
    async fn provider_token(&self, http: &reqwest::Client) -> QuantinuumResult<Secret> {
        let scope = self.scopes.join(" ");
        let params = [("client_id", self.client_id.as_str()), ("scope", scope.as_str())];
        let response = http
            .post(self.device_code_url())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(QuantinuumError::Auth(format!(
                "Microsoft device authorization failed: {error}"
            )));
        }
        let device: DeviceCodeResponse = response.json().await?;

        match &device.message {
            Some(message) => println!("{message}"),
            None => println!(
                "To sign in, visit {} and enter the code {}",
                device.verification_uri, device.user_code
            ),
        }

        let deadline = Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = Duration::from_secs(device.interval.unwrap_or(5));

        loop {
            if Instant::now() >= deadline {
                return Err(QuantinuumError::Auth(
                    "Microsoft device code login timed out".into(),
                ));
            }
            tokio::time::sleep(interval).await;

            let params = [
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("client_id", self.client_id.as_str()),
                ("device_code", device.device_code.as_str()),
            ];
            let response = http.post(self.token_url()).form(&params).send().await?;
            let status = response.status();
            let body = Zeroizing::new(response.text().await?);

            if status.is_success() {
                let mut token: DeviceTokenResponse = serde_json::from_str(&body)?;
                return token
                    .id_token
                    .take()
                    .or_else(|| token.access_token.take())
                    .map(Zeroizing::new)
                    .ok_or_else(|| {
                        QuantinuumError::Auth("Microsoft login returned no token".into())
                    });
            }

            let error: DeviceTokenError = serde_json::from_str(&body)?;
            match error.error.as_str() {
                "authorization_pending" => debug!("Waiting for Microsoft device authorization"),
                "slow_down" => interval += Duration::from_secs(5),
                _ => {
                    return Err(QuantinuumError::Auth(format!(
                        "Microsoft login failed: {}",
                        error.error_description.unwrap_or(error.error)
                    )));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Login wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PasswordLogin<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

#[derive(Serialize)]
struct RefreshLogin<'a> {
    #[serde(rename = "refresh-token")]
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct ProviderLogin<'a> {
    #[serde(rename = "provider-token")]
    provider_token: &'a str,
}

/// Successful response from `POST /login`.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct LoginResponse {
    #[serde(rename = "id-token")]
    id_token: String,
    #[serde(rename = "refresh-token")]
    refresh_token: String,
}

/// Error payload `{error: {code, text}}` returned by the login endpoint.
#[derive(Debug, Deserialize)]
struct LoginError {
    error: LoginErrorDetail,
}

#[derive(Debug, Deserialize)]
struct LoginErrorDetail {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    text: Option<String>,
}

impl LoginError {
    fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

/// Produces valid access tokens from stored or prompted credentials.
pub struct Authenticator {
    http: reqwest::Client,
    login_url: String,
    provider: Option<String>,
    support_mfa: bool,
    store: Mutex<Box<dyn CredentialStore>>,
    prompt: Arc<dyn CredentialPrompt>,
    federated: Option<Arc<dyn FederatedProvider>>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("login_url", &self.login_url)
            .field("provider", &self.provider)
            .field("support_mfa", &self.support_mfa)
            .field("store", &"[REDACTED]")
            .finish()
    }
}

impl Authenticator {
    /// Create an authenticator that prompts on the terminal.
    pub fn new(
        http: reqwest::Client,
        config: &ApiConfig,
        store: Box<dyn CredentialStore>,
    ) -> Self {
        Self {
            http,
            login_url: config.endpoint("login"),
            provider: config.provider.clone(),
            support_mfa: config.support_mfa,
            store: Mutex::new(store),
            prompt: Arc::new(TerminalPrompt),
            federated: None,
        }
    }

    /// Replace the interactive prompt.
    pub fn with_prompt(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Register a federated provider; it is used when its name matches the
    /// configured provider.
    pub fn with_federated_provider(mut self, provider: Arc<dyn FederatedProvider>) -> Self {
        self.federated = Some(provider);
        self
    }

    /// Return a valid access token, refreshing or logging in as needed.
    #[instrument(skip(self))]
    pub async fn login(&self) -> QuantinuumResult<Secret> {
        let mut store = self.store.lock().await;
        let store: &mut dyn CredentialStore = store.as_mut();

        if store.refresh_token().is_none() {
            self.full_login_with(store).await?;
        }
        let refresh_token = store.refresh_token().ok_or_else(|| {
            QuantinuumError::Auth("Unable to retrieve refresh token or authenticate.".into())
        })?;

        if store.access_token().is_none() {
            self.refresh_with(store, refresh_token).await?;
        }
        store.access_token().ok_or_else(|| {
            QuantinuumError::Auth("Unable to retrieve id token or refresh or login.".into())
        })
    }

    /// Log in from scratch (federated or email/password) and store new tokens.
    #[instrument(skip(self))]
    pub async fn full_login(&self) -> QuantinuumResult<()> {
        let mut store = self.store.lock().await;
        self.full_login_with(store.as_mut()).await
    }

    /// Remove every stored credential.
    pub async fn delete_authentication(&self) -> QuantinuumResult<()> {
        info!("Deleting stored Quantinuum credentials");
        self.store.lock().await.delete_all()
    }

    /// Drop the cached access token after the service rejected it.
    pub async fn invalidate_access_token(&self) {
        self.store.lock().await.clear_access_token();
    }

    /// Stored username, if any.
    pub async fn username(&self) -> Option<String> {
        self.store.lock().await.username()
    }

    /// Remember a username for the next full login.
    pub async fn save_username(&self, username: &str) -> QuantinuumResult<()> {
        self.store.lock().await.save_username(username)
    }

    /// Run `f` against the underlying store.
    pub async fn with_store<R>(&self, f: impl FnOnce(&mut dyn CredentialStore) -> R) -> R {
        let mut store = self.store.lock().await;
        f(store.as_mut())
    }

    async fn full_login_with(&self, store: &mut dyn CredentialStore) -> QuantinuumResult<()> {
        match &self.provider {
            Some(provider) => self.request_tokens_federated(store, provider).await,
            None => {
                let (username, password) = self.credentials(store).await?;
                self.request_tokens(store, username, password).await
            }
        }
    }

    /// Cached username/password, prompting for whatever is missing.
    async fn credentials(
        &self,
        store: &mut dyn CredentialStore,
    ) -> QuantinuumResult<(String, Secret)> {
        let username = match store.username().filter(|u| !u.is_empty()) {
            Some(username) => username,
            None => {
                let prompt = Arc::clone(&self.prompt);
                run_prompt(move || prompt.username()).await?
            }
        };
        let password = match store.take_password().filter(|p| !p.is_empty()) {
            Some(password) => password,
            None => {
                let prompt = Arc::clone(&self.prompt);
                run_prompt(move || prompt.password()).await?
            }
        };
        Ok((username, password))
    }

    async fn request_tokens(
        &self,
        store: &mut dyn CredentialStore,
        username: String,
        password: Secret,
    ) -> QuantinuumResult<()> {
        debug!("Logging in to Quantinuum API with email and password");
        let body = PasswordLogin {
            email: &username,
            password: &password,
            code: None,
        };
        let (mut status, mut text) = self.send_login(&body).await?;

        if status == StatusCode::UNAUTHORIZED
            && LoginError::parse(&text).and_then(|e| e.error.code) == Some(ERROR_CODE_MFA_REQUIRED)
        {
            if !self.support_mfa {
                return Err(QuantinuumError::MfaUnsupported);
            }
            let prompt = Arc::clone(&self.prompt);
            let code = run_prompt(move || prompt.mfa_code()).await?;
            let body = PasswordLogin {
                code: Some(code.as_str()),
                ..body
            };
            (status, text) = self.send_login(&body).await?;
        }

        let tokens = parse_login(status, &text, "Login")?;
        store.save_tokens(&tokens.id_token, &tokens.refresh_token)?;
        if store.username().is_none() {
            store.save_username(&username)?;
        }
        info!("Quantinuum login successful");
        Ok(())
    }

    async fn request_tokens_federated(
        &self,
        store: &mut dyn CredentialStore,
        provider: &str,
    ) -> QuantinuumResult<()> {
        let federated = self.federated_provider(provider)?;
        debug!("Logging in to Quantinuum API through {}", federated.name());

        let http = runtime::http_client(&self.http);
        let token = federated.provider_token(&http).await?;
        let body = ProviderLogin {
            provider_token: &token,
        };
        let (status, text) = self.send_login(&body).await?;
        let tokens = parse_login(status, &text, "Login")?;
        store.save_tokens(&tokens.id_token, &tokens.refresh_token)?;
        info!("Quantinuum federated login successful");
        Ok(())
    }

    fn federated_provider(&self, name: &str) -> QuantinuumResult<Arc<dyn FederatedProvider>> {
        if let Some(federated) = &self.federated {
            if federated.name().eq_ignore_ascii_case(name) {
                return Ok(Arc::clone(federated));
            }
        }
        if name.eq_ignore_ascii_case(AZURE_PROVIDER) {
            return Ok(Arc::new(MicrosoftLogin::from_env()?));
        }
        Err(QuantinuumError::UnsupportedProvider(name.to_string()))
    }

    async fn refresh_with(
        &self,
        store: &mut dyn CredentialStore,
        refresh_token: Secret,
    ) -> QuantinuumResult<()> {
        debug!("Refreshing Quantinuum id-token");
        let body = RefreshLogin {
            refresh_token: &refresh_token,
        };
        let (status, text) = self.send_login(&body).await?;

        let rejected = status == StatusCode::BAD_REQUEST
            && LoginError::parse(&text)
                .and_then(|e| e.error.text)
                .is_some_and(|t| t.contains(INVALID_REFRESH_TOKEN));
        if rejected {
            warn!("Refresh token rejected by the service, logging in again");
            return self.full_login_with(store).await;
        }

        let tokens = parse_login(status, &text, "Token Refresh")?;
        store.save_tokens(&tokens.id_token, &tokens.refresh_token)
    }

    /// POST to the login endpoint; the response body is returned in a [`Secret`].
    async fn send_login<B: Serialize + Sync>(
        &self,
        body: &B,
    ) -> QuantinuumResult<(StatusCode, Secret)> {
        let response = runtime::http_client(&self.http)
            .post(&self.login_url)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = Zeroizing::new(response.text().await?);
        Ok((status, text))
    }
}

fn parse_login(status: StatusCode, body: &str, description: &str) -> QuantinuumResult<LoginResponse> {
    if !status.is_success() {
        check_response(status.as_u16(), &decode_payload(body), description)?;
    }
    Ok(serde_json::from_str(body)?)
}

async fn run_prompt<T, F>(f: F) -> QuantinuumResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> QuantinuumResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QuantinuumError::Runtime(format!("Credential prompt failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Prompt that answers from fixed values and counts calls.
    #[derive(Default)]
    pub(crate) struct ScriptedPrompt {
        pub username: String,
        pub password: String,
        pub code: String,
        pub username_calls: AtomicUsize,
        pub password_calls: AtomicUsize,
        pub code_calls: AtomicUsize,
    }

    impl ScriptedPrompt {
        pub(crate) fn new(username: &str, password: &str) -> Self {
            Self {
                username: username.into(),
                password: password.into(),
                code: "123456".into(),
                ..Default::default()
            }
        }
    }

    impl CredentialPrompt for ScriptedPrompt {
        fn username(&self) -> QuantinuumResult<String> {
            self.username_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.username.clone())
        }

        fn password(&self) -> QuantinuumResult<Secret> {
            self.password_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Zeroizing::new(self.password.clone()))
        }

        fn mfa_code(&self) -> QuantinuumResult<Secret> {
            self.code_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Zeroizing::new(self.code.clone()))
        }
    }

    fn authenticator(config: &ApiConfig, store: MemoryCredentialStore) -> Authenticator {
        Authenticator::new(reqwest::Client::new(), config, Box::new(store))
    }

    #[test]
    fn test_password_login_body() {
        let body = PasswordLogin {
            email: "user@example.com",
            password: "pw",
            code: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"email": "user@example.com", "password": "pw"})
        );

        let with_code = PasswordLogin {
            code: Some("42"),
            ..body
        };
        assert_eq!(serde_json::to_value(&with_code).unwrap()["code"], "42");
    }

    #[test]
    fn test_refresh_and_provider_bodies() {
        let refresh = serde_json::to_value(RefreshLogin { refresh_token: "r" }).unwrap();
        assert_eq!(refresh, serde_json::json!({"refresh-token": "r"}));

        let provider = serde_json::to_value(ProviderLogin { provider_token: "p" }).unwrap();
        assert_eq!(provider, serde_json::json!({"provider-token": "p"}));
    }

    #[test]
    fn test_login_error_parsing() {
        let err = LoginError::parse(r#"{"error": {"code": 73, "text": "MFA required"}}"#).unwrap();
        assert_eq!(err.error.code, Some(ERROR_CODE_MFA_REQUIRED));
        assert_eq!(err.error.text.as_deref(), Some("MFA required"));
        assert!(LoginError::parse("not json").is_none());
    }

    #[test]
    fn test_parse_login_maps_unauthorized_to_auth() {
        let err = parse_login(
            StatusCode::UNAUTHORIZED,
            r#"{"error": {"code": 1, "text": "bad password"}}"#,
            "Login",
        )
        .err()
        .unwrap();
        assert!(err.is_auth());

        let err = parse_login(StatusCode::INTERNAL_SERVER_ERROR, "", "Login")
            .err()
            .unwrap();
        assert!(matches!(err, QuantinuumError::Server { status: 500, .. }));
    }

    #[test]
    fn test_microsoft_urls() {
        let login = MicrosoftLogin::new("client").with_authority("http://localhost:1/");
        assert_eq!(
            login.device_code_url(),
            "http://localhost:1/organizations/oauth2/v2.0/devicecode"
        );
        assert_eq!(
            login.with_tenant("contoso").token_url(),
            "http://localhost:1/contoso/oauth2/v2.0/token"
        );
    }

    #[tokio::test]
    async fn test_unsupported_provider() {
        let config = ApiConfig::new()
            .with_api_url("http://127.0.0.1:9/")
            .with_provider("okta");
        let auth = authenticator(&config, MemoryCredentialStore::new());
        let err = auth.login().await.unwrap_err();
        assert!(matches!(err, QuantinuumError::UnsupportedProvider(ref p) if p == "okta"));
    }

    #[tokio::test]
    async fn test_existing_tokens_need_no_network() {
        let config = ApiConfig::new().with_api_url("http://127.0.0.1:9/");
        let mut store = MemoryCredentialStore::new();
        store.save_tokens("access", "refresh").unwrap();
        let prompt = Arc::new(ScriptedPrompt::new("u", "p"));
        let auth = authenticator(&config, store).with_prompt(prompt.clone());

        let token = auth.login().await.unwrap();
        assert_eq!(token.as_str(), "access");
        assert_eq!(prompt.username_calls.load(Ordering::SeqCst), 0);
        assert_eq!(prompt.password_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_authentication_clears_store() {
        let config = ApiConfig::new();
        let mut store = MemoryCredentialStore::new().with_username("u");
        store.save_tokens("access", "refresh").unwrap();
        let auth = authenticator(&config, store);

        auth.delete_authentication().await.unwrap();
        assert!(auth.username().await.is_none());
        assert!(auth.with_store(|s| s.refresh_token().is_none()).await);
    }
}
