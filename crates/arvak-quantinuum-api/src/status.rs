//! Job status documents.
//!
//! The service answers `GET /job/{id}` (and every push message) with a JSON
//! mapping carrying at least a `status` string.  When asked with
//! `?websocket=true` it may also include the details needed to open a push
//! channel.  Every other field is passed through untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QuantinuumError, QuantinuumResult};

/// Lifecycle status of a job as reported by the service.
///
/// ```text
///   submitted ──→ queued ──→ running ──→ completed
///                   │           │
///                   │           ├──→ failed
///                   │           │
///                   └───────────┴──→ cancelling ──→ canceled
/// ```
///
/// Only `completed`, `failed` and `canceled` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    /// Accepted by the service.
    Submitted,
    /// Waiting for a machine.
    Queued,
    /// Executing.
    Running,
    /// Cancellation requested but not yet effective.
    Cancelling,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Canceled,
    /// A status string this client does not know about.
    Unknown(String),
}

impl JobStatus {
    /// Parse a wire status string; anything but the exact wire spelling is
    /// kept verbatim as [`JobStatus::Unknown`].
    pub fn parse(status: &str) -> Self {
        match status {
            "submitted" => JobStatus::Submitted,
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "cancelling" => JobStatus::Cancelling,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "canceled" => JobStatus::Canceled,
            _ => JobStatus::Unknown(status.to_string()),
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Unknown(s) => s,
        }
    }

    /// Whether no further state changes will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        JobStatus::parse(&s)
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details for the push channel of a running job.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushChannel {
    /// Token identifying the waiting task on the notification service.
    pub task_token: String,
    /// Reference to the execution that will publish status updates.
    #[serde(rename = "executionArn")]
    pub execution_arn: String,
}

impl fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushChannel")
            .field("task_token", &"[REDACTED]")
            .field("execution_arn", &self.execution_arn)
            .finish()
    }
}

/// A job status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    /// Current status; absent documents are treated as not yet done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// Push channel details, present when requested and supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket: Option<PushChannel>,
    /// Every other field (results, error, queue position, ...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StatusDocument {
    /// Build a document with just a status.
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            websocket: None,
            fields: Map::new(),
        }
    }

    /// Decode a response body.
    ///
    /// A JSON `null` means the server returned nothing and yields `None`.
    /// Anything that is not a mapping is a transport error.
    pub fn from_value(value: Value) -> QuantinuumResult<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(_) => Ok(Some(serde_json::from_value(value)?)),
            other => Err(QuantinuumError::Transport(format!(
                "Unable to decode response: expected a status mapping, got {other}"
            ))),
        }
    }

    /// Decode a push-channel message.
    pub fn from_message(text: &str) -> QuantinuumResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)?.ok_or_else(|| {
            QuantinuumError::Transport("Unable to decode response: empty push message".into())
        })
    }

    /// Whether the job has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(JobStatus::is_terminal)
    }

    /// The job identifier, when the service includes it.
    pub fn job_id(&self) -> Option<&str> {
        self.fields.get("job").and_then(Value::as_str)
    }

    /// Error message of a failed job.
    pub fn error(&self) -> Option<&Value> {
        self.fields.get("error")
    }

    /// Measurement results of a completed job.
    pub fn results(&self) -> Option<&Value> {
        self.fields.get("results")
    }
}
