//! Error types for the Quantinuum API client.

use thiserror::Error;

/// Result type for Quantinuum API operations.
pub type QuantinuumResult<T> = Result<T, QuantinuumError>;

/// Errors that can occur when talking to the Quantinuum service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuantinuumError {
    /// Authorization failure: a 401 response, or no token could be obtained.
    #[error("Authorization failure attempting: {0}")]
    Auth(String),

    /// The server asked for an MFA code but this client was built without MFA support.
    #[error("This API instance does not support MFA login")]
    MfaUnsupported,

    /// A federated login provider was configured that this client cannot handle.
    #[error("Unsupported provider for login: {0}")]
    UnsupportedProvider(String),

    /// Any other non-2xx response, with the decoded error payload.
    #[error("HTTP error attempting: {description} ({status}). Server response: {payload}")]
    Server {
        status: u16,
        description: String,
        payload: serde_json::Value,
    },

    /// The job could not be submitted.
    #[error("Job submission failed ({status}): {payload}")]
    Submission {
        status: u16,
        payload: serde_json::Value,
    },

    /// The job could not be cancelled.
    #[error("Job cancellation failed for {job_id} ({status}): {payload}")]
    Cancellation {
        job_id: String,
        status: u16,
        payload: serde_json::Value,
    },

    /// A response or push message could not be decoded into the expected shape.
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Push channel error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Local I/O error (credential file, prompts).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation needs the remote service, which the offline API does not have.
    #[error("{0}")]
    Offline(String),

    /// The caller's interrupt future completed during a wait.
    #[error("Interrupted while waiting for job {0}")]
    Interrupted(String),

    /// A helper task or thread failed.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl QuantinuumError {
    /// Whether this error is an authorization failure.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            QuantinuumError::Auth(_)
                | QuantinuumError::MfaUnsupported
                | QuantinuumError::UnsupportedProvider(_)
        )
    }

    /// Whether this error comes from the offline API.
    pub fn is_offline(&self) -> bool {
        matches!(self, QuantinuumError::Offline(_))
    }
}
