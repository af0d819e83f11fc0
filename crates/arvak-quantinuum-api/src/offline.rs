//! Offline stand-in for the Quantinuum client.
//!
//! [`OfflineApi`] accepts submissions and records them without any network
//! access.  Operations that need the remote service fail with
//! [`QuantinuumError::Offline`].

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use crate::api::MachineInfo;
use crate::credentials::Secret;
use crate::error::{QuantinuumError, QuantinuumResult};
use crate::service::QuantinuumService;
use crate::status::StatusDocument;
use crate::waiter::WaitOutcome;

/// State reported for every machine while offline.
pub const OFFLINE_MACHINE_STATE: &str = "unclear";

/// Client that records jobs instead of submitting them.
#[derive(Debug)]
pub struct OfflineApi {
    machines: Vec<MachineInfo>,
    submitted: Mutex<Vec<Value>>,
}

impl Default for OfflineApi {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineApi {
    /// Offline client describing the H1-1 and H2-1 machines.
    pub fn new() -> Self {
        Self::with_machines(default_machines())
    }

    /// Offline client describing the given machines.
    pub fn with_machines(machines: Vec<MachineInfo>) -> Self {
        Self {
            machines,
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// All submitted job documents, in submission order.
    pub async fn get_jobs(&self) -> Vec<Value> {
        self.submitted.lock().await.clone()
    }
}

fn hardware(name: &str, n_qubits: u32) -> MachineInfo {
    MachineInfo {
        name: name.to_string(),
        n_qubits: Some(n_qubits),
        gateset: vec!["RZZ".into(), "Riswap".into(), "Rxxyyzz".into()],
        n_classical_registers: Some(120),
        n_shots: Some(10_000),
        system_type: Some("hardware".into()),
        emulator: Some(format!("{name}E")),
        syntax_checker: Some(format!("{name}SC")),
        batching: Some(true),
        wasm: Some(true),
        extra: Default::default(),
    }
}

/// Machines described by [`OfflineApi::new`].
pub fn default_machines() -> Vec<MachineInfo> {
    vec![hardware("H1-1", 20), hardware("H2-1", 32)]
}

#[async_trait]
impl QuantinuumService for OfflineApi {
    async fn login(&self) -> QuantinuumResult<Secret> {
        Ok(Zeroizing::new(String::new()))
    }

    async fn full_login(&self) -> QuantinuumResult<()> {
        Ok(())
    }

    async fn submit_job(&self, body: &Value) -> QuantinuumResult<Option<String>> {
        let mut submitted = self.submitted.lock().await;
        submitted.push(body.clone());
        debug!("Recorded offline job #{}", submitted.len());
        Ok(None)
    }

    async fn retrieve_job_status(
        &self,
        job_id: &str,
        want_push: bool,
    ) -> QuantinuumResult<Option<StatusDocument>> {
        Err(QuantinuumError::Offline(format!(
            "Can't retrieve job status offline: job_id {job_id} (push channel requested: {want_push})."
        )))
    }

    async fn retrieve_job(&self, job_id: &str) -> QuantinuumResult<WaitOutcome> {
        Err(QuantinuumError::Offline(format!(
            "Can't retrieve job offline: job_id {job_id}."
        )))
    }

    async fn cancel(&self, job_id: &str) -> QuantinuumResult<Value> {
        Err(QuantinuumError::Offline(format!(
            "Can't cancel job offline: job_id {job_id}."
        )))
    }

    async fn machine_status(&self, _machine: &str) -> QuantinuumResult<String> {
        Ok(OFFLINE_MACHINE_STATE.to_string())
    }

    async fn machine_list(&self) -> QuantinuumResult<Vec<MachineInfo>> {
        Ok(self.machines.clone())
    }

    fn check_response(
        &self,
        _status: u16,
        payload: &Value,
        description: &str,
    ) -> QuantinuumResult<()> {
        Err(QuantinuumError::Offline(format!(
            "Response can't be checked offline: {description}. Server response: {payload}"
        )))
    }
}
