#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arvak_quantinuum_api::{
    ApiConfig, CredentialPrompt, CredentialStore, MemoryCredentialStore, QuantinuumApi,
    QuantinuumApiBuilder, QuantinuumResult, Secret,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use wiremock::MockServer;
use zeroize::Zeroizing;

/// Prompt answering from fixed values and counting how often it was asked.
pub struct CountingPrompt {
    username: String,
    password: String,
    code: String,
    pub username_calls: AtomicUsize,
    pub password_calls: AtomicUsize,
    pub code_calls: AtomicUsize,
}

impl CountingPrompt {
    pub fn new(username: &str, password: &str) -> Arc<Self> {
        Arc::new(Self {
            username: username.into(),
            password: password.into(),
            code: "123456".into(),
            username_calls: AtomicUsize::new(0),
            password_calls: AtomicUsize::new(0),
            code_calls: AtomicUsize::new(0),
        })
    }

    pub fn username_calls(&self) -> usize {
        self.username_calls.load(Ordering::SeqCst)
    }

    pub fn password_calls(&self) -> usize {
        self.password_calls.load(Ordering::SeqCst)
    }

    pub fn code_calls(&self) -> usize {
        self.code_calls.load(Ordering::SeqCst)
    }
}

impl CredentialPrompt for CountingPrompt {
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

/// Configuration pointing at the mock server with short wait intervals.
pub fn config(server: &MockServer) -> ApiConfig {
    ApiConfig::new()
        .with_api_url(server.uri())
        .with_websocket(false)
        .with_retry_interval(Duration::from_millis(10))
        .with_ping_timeout(Duration::from_millis(200))
}

/// Builder for a client already holding an access token.
pub fn logged_in(server: &MockServer, token: &str) -> QuantinuumApiBuilder {
    let mut store = MemoryCredentialStore::new().with_username("user@example.com");
    store
        .save_tokens(token, "refresh-token")
        .expect("memory store never fails");
    QuantinuumApi::builder().config(config(server)).store(store)
}

/// Unsigned JWT with the given `exp` claim.
pub fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}
