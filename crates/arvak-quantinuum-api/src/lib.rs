//! Arvak client for the Quantinuum cloud API
//!
//! This crate handles authentication and the job lifecycle against the
//! Quantinuum cloud REST API (`https://qapi.quantinuum.com/v1/`): logging in
//! (email/password with optional MFA, or a federated Microsoft account),
//! submitting job documents, and waiting for them to finish either by polling
//! or by listening on the service's push channel.
//!
//! Job bodies and status documents are opaque JSON; compiling circuits into
//! job bodies is left to the caller.
//!
//! # Authentication
//!
//! Credentials live in a [`CredentialStore`].  [`MemoryCredentialStore`]
//! forgets everything when the client is dropped; [`FileCredentialStore`]
//! keeps the username and refresh token in
//! `<config_dir>/arvak/quantinuum_credentials.json`.  Missing credentials are
//! asked for on the terminal unless another [`CredentialPrompt`] is supplied.
//!
//! # Configuration
//!
//! [`QuantinuumApi::from_env`] reads `<config_dir>/arvak/quantinuum.yaml` and
//! the `ARVAK_QUANTINUUM_*` environment variables (a `.env` file is honoured):
//!
//! ```bash
//! export ARVAK_QUANTINUUM_USERNAME="user@example.com"
//! export ARVAK_QUANTINUUM_USE_WEBSOCKET=true
//! export ARVAK_QUANTINUUM_TIMEOUT=600
//! ```
//!
//! # Example
//!
//! ```ignore
//! use arvak_quantinuum_api::{FileCredentialStore, QuantinuumApi, WaitOutcome};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let api = QuantinuumApi::builder()
//!         .store(FileCredentialStore::new()?)
//!         .username("user@example.com")
//!         .build()?;
//!
//!     let job_id = api
//!         .submit_job(&json!({
//!             "name": "bell",
//!             "count": 100,
//!             "machine": "H2-1LE",
//!             "language": "OPENQASM 2.0",
//!             "program": "OPENQASM 2.0; ...",
//!         }))
//!         .await?;
//!
//!     match api.retrieve_job(&job_id).await? {
//!         WaitOutcome::Terminal(doc) => println!("{:?}", doc.results()),
//!         WaitOutcome::TimedOut(last) => println!("still running: {:?}", last),
//!         WaitOutcome::NoStatus => println!("unknown job"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
mod error;
pub mod logging;
pub mod offline;
pub mod runtime;
pub mod service;
pub mod status;
pub mod waiter;

pub use api::{MachineInfo, QuantinuumApi, QuantinuumApiBuilder, TimeoutOverride, check_response};
pub use auth::{Authenticator, CredentialPrompt, FederatedProvider, MicrosoftLogin, TerminalPrompt};
pub use config::{ApiConfig, QuantinuumConfig};
pub use credentials::{
    CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore, Secret,
};
pub use error::{QuantinuumError, QuantinuumResult};
pub use logging::{LoggingConfig, init_logging};
pub use offline::OfflineApi;
pub use service::QuantinuumService;
pub use status::{JobStatus, PushChannel, StatusDocument};
pub use waiter::{CompletionWaiter, StatusSource, WaitOutcome, WaitSettings, WaitStrategy};
