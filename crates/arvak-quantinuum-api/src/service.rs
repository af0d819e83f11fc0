//! The operations shared by the online client and the offline stub.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{self, MachineInfo, QuantinuumApi};
use crate::credentials::Secret;
use crate::error::QuantinuumResult;
use crate::status::StatusDocument;
use crate::waiter::WaitOutcome;

/// Job lifecycle operations, online or offline.
///
/// Code that only needs to submit jobs and inspect machines can be written
/// against this trait and exercised with [`OfflineApi`](crate::OfflineApi).
#[async_trait]
pub trait QuantinuumService: Send + Sync {
    /// Return a valid access token.
    async fn login(&self) -> QuantinuumResult<Secret>;

    /// Log in from scratch.
    async fn full_login(&self) -> QuantinuumResult<()>;

    /// Submit a job document; returns the job id when the service assigns one.
    async fn submit_job(&self, body: &Value) -> QuantinuumResult<Option<String>>;

    /// Fetch the current status document of a job.
    async fn retrieve_job_status(
        &self,
        job_id: &str,
        want_push: bool,
    ) -> QuantinuumResult<Option<StatusDocument>>;

    /// Wait for a job to finish.
    async fn retrieve_job(&self, job_id: &str) -> QuantinuumResult<WaitOutcome>;

    /// Cancel a job.
    async fn cancel(&self, job_id: &str) -> QuantinuumResult<Value>;

    /// Current state of a machine.
    async fn machine_status(&self, machine: &str) -> QuantinuumResult<String>;

    /// Available machines.
    async fn machine_list(&self) -> QuantinuumResult<Vec<MachineInfo>>;

    /// Validate a raw response.
    fn check_response(&self, status: u16, payload: &Value, description: &str)
    -> QuantinuumResult<()>;
}

#[async_trait]
impl QuantinuumService for QuantinuumApi {
    async fn login(&self) -> QuantinuumResult<Secret> {
        QuantinuumApi::login(self).await
    }

    async fn full_login(&self) -> QuantinuumResult<()> {
        QuantinuumApi::full_login(self).await
    }

    async fn submit_job(&self, body: &Value) -> QuantinuumResult<Option<String>> {
        QuantinuumApi::submit_job(self, body).await.map(Some)
    }

    async fn retrieve_job_status(
        &self,
        job_id: &str,
        want_push: bool,
    ) -> QuantinuumResult<Option<StatusDocument>> {
        QuantinuumApi::retrieve_job_status(self, job_id, want_push).await
    }

    async fn retrieve_job(&self, job_id: &str) -> QuantinuumResult<WaitOutcome> {
        QuantinuumApi::retrieve_job(self, job_id).await
    }

    async fn cancel(&self, job_id: &str) -> QuantinuumResult<Value> {
        QuantinuumApi::cancel(self, job_id).await
    }

    async fn machine_status(&self, machine: &str) -> QuantinuumResult<String> {
        QuantinuumApi::machine_status(self, machine).await
    }

    async fn machine_list(&self) -> QuantinuumResult<Vec<MachineInfo>> {
        QuantinuumApi::machine_list(self).await
    }

    fn check_response(
        &self,
        status: u16,
        payload: &Value,
        description: &str,
    ) -> QuantinuumResult<()> {
        api::check_response(status, payload, description)
    }
}
