//! Quantinuum REST API client.
//!
//! Implements the job lifecycle against the Quantinuum cloud API
//! (`https://qapi.quantinuum.com/v1/`): submitting job documents, querying
//! and waiting for their status, cancelling them, and querying machines.
//! Every request carries an access token obtained through the
//! [`Authenticator`].

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::auth::{Authenticator, CredentialPrompt, FederatedProvider};
use crate::config::{ApiConfig, QuantinuumConfig};
use crate::credentials::{CredentialStore, MemoryCredentialStore, Secret};
use crate::error::{QuantinuumError, QuantinuumResult};
use crate::runtime;
use crate::status::StatusDocument;
use crate::waiter::{CompletionWaiter, StatusSource, WaitOutcome, WaitSettings};

/// Validate a response: 401 is an authorization failure, any other non-2xx
/// status a server error carrying the decoded payload.
pub fn check_response(status: u16, payload: &Value, description: &str) -> QuantinuumResult<()> {
    if status == StatusCode::UNAUTHORIZED.as_u16() {
        return Err(QuantinuumError::Auth(description.to_string()));
    }
    if !(200..300).contains(&status) {
        return Err(QuantinuumError::Server {
            status,
            description: description.to_string(),
            payload: payload.clone(),
        });
    }
    Ok(())
}

/// Decode a response body: empty is `null`, non-JSON is kept as a string.
pub(crate) fn decode_payload(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

/// Quantinuum job client.
pub struct QuantinuumApi {
    http: Client,
    config: ApiConfig,
    auth: Authenticator,
}

impl fmt::Debug for QuantinuumApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantinuumApi")
            .field("base_url", &self.config.base_url())
            .field("auth", &self.auth)
            .finish()
    }
}

impl QuantinuumApi {
    /// Client for the production service with an in-memory credential store.
    pub fn new() -> QuantinuumResult<Self> {
        Self::builder().build()
    }

    /// Client configured from `quantinuum.yaml` and `ARVAK_QUANTINUUM_*`
    /// variables, including the cached username.
    pub fn from_env() -> QuantinuumResult<Self> {
        let settings = QuantinuumConfig::load();
        let mut builder = Self::builder().config(settings.api_config());
        if let Some(username) = settings.username {
            builder = builder.username(username);
        }
        builder.build()
    }

    /// Start building a client.
    pub fn builder() -> QuantinuumApiBuilder {
        QuantinuumApiBuilder::default()
    }

    /// Session configuration in effect.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// The authenticator backing this client.
    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Return a valid access token, refreshing or logging in as needed.
    pub async fn login(&self) -> QuantinuumResult<Secret> {
        self.auth.login().await
    }

    /// Log in from scratch and store fresh tokens.
    pub async fn full_login(&self) -> QuantinuumResult<()> {
        self.auth.full_login().await
    }

    /// Remove every stored credential.
    pub async fn delete_authentication(&self) -> QuantinuumResult<()> {
        self.auth.delete_authentication().await
    }

    /// Temporarily replace the wait timeout and/or retry interval.
    ///
    /// `None` keeps the current value.  The previous values are restored
    /// when the returned guard is dropped, including on early return.
    pub fn override_timeouts(
        &mut self,
        timeout: Option<Duration>,
        retry_interval: Option<Duration>,
    ) -> TimeoutOverride<'_> {
        let saved = (self.config.timeout, self.config.retry_interval);
        if timeout.is_some() {
            self.config.timeout = timeout;
        }
        if let Some(interval) = retry_interval {
            self.config.retry_interval = interval;
        }
        TimeoutOverride { api: self, saved }
    }

    fn http(&self) -> Client {
        runtime::http_client(&self.http)
    }

    /// Send an authorized request and decode the body.
    ///
    /// A 401 drops the cached access token so the next call refreshes it.
    async fn send(&self, request: RequestBuilder) -> QuantinuumResult<(u16, Value)> {
        let token = self.auth.login().await?;
        let response = request
            .header(header::AUTHORIZATION, token.as_str())
            .send()
            .await?;
        drop(token);

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::UNAUTHORIZED {
            warn!("Access token rejected, it will be refreshed on the next call");
            self.auth.invalidate_access_token().await;
        }
        Ok((status.as_u16(), decode_payload(&body)))
    }

    /// Submit a job document; returns the server-assigned job id.
    #[instrument(skip(self, body))]
    pub async fn submit_job(&self, body: &Value) -> QuantinuumResult<String> {
        debug!("Submitting job to Quantinuum");
        let request = self.http().post(self.config.endpoint("job")).json(body);
        let (status, payload) = self.send(request).await?;

        if status == StatusCode::UNAUTHORIZED.as_u16() {
            return Err(QuantinuumError::Auth("job submission".into()));
        }
        if !(200..300).contains(&status) {
            return Err(QuantinuumError::Submission { status, payload });
        }
        let response: JobResponse = serde_json::from_value(payload)?;
        debug!("Submitted job {}", response.job);
        Ok(response.job)
    }

    /// Fetch the status document of a job.
    ///
    /// With `want_push` the service is asked to include push-channel details.
    #[instrument(skip(self))]
    pub async fn retrieve_job_status(
        &self,
        job_id: &str,
        want_push: bool,
    ) -> QuantinuumResult<Option<StatusDocument>> {
        let mut request = self.http().get(self.config.endpoint(&format!("job/{job_id}")));
        if want_push {
            request = request.query(&[("websocket", "true")]);
        }
        let (status, payload) = self.send(request).await?;
        check_response(status, &payload, &format!("job status for {job_id}"))?;
        StatusDocument::from_value(payload)
    }

    /// Wait for a job to finish using the configured strategy and timeouts.
    #[instrument(skip(self))]
    pub async fn retrieve_job(&self, job_id: &str) -> QuantinuumResult<WaitOutcome> {
        CompletionWaiter::new(self, WaitSettings::from(&self.config))
            .wait(job_id)
            .await
    }

    /// Blocking variant of [`retrieve_job`](Self::retrieve_job).
    ///
    /// Reuses a running multi-threaded runtime, or runs on a transient one
    /// when there is no runtime or the caller sits inside a current-thread
    /// runtime.  The call uses its own HTTP connections.
    pub fn retrieve_job_blocking(&self, job_id: &str) -> QuantinuumResult<WaitOutcome> {
        let http = http_client(&self.config)?;
        runtime::block_on(runtime::with_http(http, self.retrieve_job(job_id)))?
    }

    /// Cancel a job; returns the service's acknowledgement.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: &str) -> QuantinuumResult<Value> {
        debug!("Cancelling job {}", job_id);
        let request = self
            .http()
            .post(self.config.endpoint(&format!("job/{job_id}/cancel")));
        let (status, payload) = self.send(request).await?;

        if status == StatusCode::UNAUTHORIZED.as_u16() {
            return Err(QuantinuumError::Auth(format!("cancel job {job_id}")));
        }
        if !(200..300).contains(&status) {
            return Err(QuantinuumError::Cancellation {
                job_id: job_id.to_string(),
                status,
                payload,
            });
        }
        Ok(payload)
    }

    /// Current state of a machine (e.g. `"online"`).
    #[instrument(skip(self))]
    pub async fn machine_status(&self, machine: &str) -> QuantinuumResult<String> {
        let request = self
            .http()
            .get(self.config.endpoint(&format!("machine/{machine}")));
        let (status, payload) = self.send(request).await?;
        check_response(status, &payload, &format!("machine status for {machine}"))?;

        payload
            .get("state")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                QuantinuumError::Transport(format!("No state in machine response: {payload}"))
            })
    }

    /// Available machines with their configuration.
    #[instrument(skip(self))]
    pub async fn machine_list(&self) -> QuantinuumResult<Vec<MachineInfo>> {
        let request = self
            .http()
            .get(self.config.endpoint("machine/"))
            .query(&[("config", "true")]);
        let (status, payload) = self.send(request).await?;
        check_response(status, &payload, "machine list")?;
        Ok(serde_json::from_value(payload)?)
    }
}

#[async_trait]
impl StatusSource for QuantinuumApi {
    async fn fetch_status(
        &self,
        job_id: &str,
        want_push: bool,
    ) -> QuantinuumResult<Option<StatusDocument>> {
        self.retrieve_job_status(job_id, want_push).await
    }
}

/// Scope guard returned by [`QuantinuumApi::override_timeouts`].
pub struct TimeoutOverride<'a> {
    api: &'a mut QuantinuumApi,
    saved: (Option<Duration>, Duration),
}

impl Deref for TimeoutOverride<'_> {
    type Target = QuantinuumApi;

    fn deref(&self) -> &QuantinuumApi {
        &*self.api
    }
}

impl DerefMut for TimeoutOverride<'_> {
    fn deref_mut(&mut self) -> &mut QuantinuumApi {
        &mut *self.api
    }
}

impl Drop for TimeoutOverride<'_> {
    fn drop(&mut self) {
        let (timeout, retry_interval) = self.saved;
        self.api.config.timeout = timeout;
        self.api.config.retry_interval = retry_interval;
    }
}

fn http_client(config: &ApiConfig) -> QuantinuumResult<Client> {
    Ok(Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .build()?)
}

/// Builder for [`QuantinuumApi`].
#[derive(Default)]
pub struct QuantinuumApiBuilder {
    config: ApiConfig,
    store: Option<Box<dyn CredentialStore>>,
    username: Option<String>,
    prompt: Option<Arc<dyn CredentialPrompt>>,
    federated: Option<Arc<dyn FederatedProvider>>,
}

impl QuantinuumApiBuilder {
    /// Session configuration.
    pub fn config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Credential store; defaults to [`MemoryCredentialStore`].
    pub fn store(mut self, store: impl CredentialStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Account email to log in with.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Interactive prompt used for missing credentials and MFA codes.
    pub fn prompt(mut self, prompt: Arc<dyn CredentialPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Federated identity provider.
    pub fn federated_provider(mut self, provider: Arc<dyn FederatedProvider>) -> Self {
        self.federated = Some(provider);
        self
    }

    /// Build the client.
    pub fn build(self) -> QuantinuumResult<QuantinuumApi> {
        self.config.validate()?;

        let http = http_client(&self.config)?;

        let mut store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryCredentialStore::new()));
        if let Some(username) = &self.username {
            store.save_username(username)?;
        }

        let mut auth = Authenticator::new(http.clone(), &self.config, store);
        if let Some(prompt) = self.prompt {
            auth = auth.with_prompt(prompt);
        }
        if let Some(provider) = self.federated {
            auth = auth.with_federated_provider(provider);
        }

        Ok(QuantinuumApi {
            http,
            config: self.config,
            auth,
        })
    }
}

// ---------------------------------------------------------------------------
// Response serde types
// ---------------------------------------------------------------------------

/// Response from `POST /job`.
#[derive(Debug, Deserialize)]
pub struct JobResponse {
    /// Assigned job identifier.
    pub job: String,
}

/// Machine description returned by `GET /machine/?config=true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    /// Machine name.
    pub name: String,
    /// Number of qubits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_qubits: Option<u32>,
    /// Native gates beyond the common set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateset: Vec<String>,
    /// Number of classical registers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_classical_registers: Option<u32>,
    /// Maximum shots per job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_shots: Option<u32>,
    /// `"hardware"` or `"emulator"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_type: Option<String>,
    /// Emulator paired with this machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emulator: Option<String>,
    /// Syntax checker paired with this machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax_checker: Option<String>,
    /// Whether job batching is supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batching: Option<bool>,
    /// Whether WebAssembly calls are supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wasm: Option<bool>,
    /// Any other fields.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl MachineInfo {
    /// Whether this is a physical device.
    pub fn is_hardware(&self) -> bool {
        self.system_type.as_deref() == Some("hardware")
    }
}
