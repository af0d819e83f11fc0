//! Waiting for a job to reach a terminal status.
//!
//! The waiter first fetches the job status.  If the service handed out push
//! channel details it subscribes to status notifications; otherwise it
//! polls:
//!
//! ```text
//!   fetch ──terminal──→ done
//!     │
//!     ├── push details ──→ push mode ── terminal ──→ done
//!     │                       │
//!     │                       ├── idle / closed ── ping ── pong ──→ keep listening
//!     │                       │                      └── no pong ──→ sleep, fetch again
//!     │                       └── cannot connect ──→ poll mode
//!     │
//!     └── no push details ──→ poll mode: fetch, sleep, repeat
//! ```
//!
//! The overall timeout is checked at the top of each iteration, never before
//! the first fetch, so a job that is already finished is returned even with a
//! zero timeout.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use crate::config::ApiConfig;
use crate::error::{QuantinuumError, QuantinuumResult};
use crate::status::{PushChannel, StatusDocument};

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Anything that can report the status of a job.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch the current status document; `want_push` asks the service for
    /// push-channel details as well.
    async fn fetch_status(
        &self,
        job_id: &str,
        want_push: bool,
    ) -> QuantinuumResult<Option<StatusDocument>>;
}

/// How the waiter follows a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Fetch the status repeatedly.
    Poll,
    /// Listen on the push channel.
    Push(PushChannel),
}

impl WaitStrategy {
    /// Strategy for a non-terminal status document.
    pub fn for_document(doc: &StatusDocument, use_websocket: bool) -> Self {
        match &doc.websocket {
            Some(channel) if use_websocket => WaitStrategy::Push(channel.clone()),
            _ => WaitStrategy::Poll,
        }
    }
}

/// Result of a wait.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The job reached a terminal status.
    Terminal(StatusDocument),
    /// The timeout elapsed first; carries the last status seen, if any.
    TimedOut(Option<StatusDocument>),
    /// The service returned no status for the job.
    NoStatus,
}

impl WaitOutcome {
    /// Whether the job finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WaitOutcome::Terminal(_))
    }

    /// The last status document, if any.
    pub fn document(&self) -> Option<&StatusDocument> {
        match self {
            WaitOutcome::Terminal(doc) => Some(doc),
            WaitOutcome::TimedOut(doc) => doc.as_ref(),
            WaitOutcome::NoStatus => None,
        }
    }

    /// Consume the outcome and return the last status document, if any.
    pub fn into_document(self) -> Option<StatusDocument> {
        match self {
            WaitOutcome::Terminal(doc) => Some(doc),
            WaitOutcome::TimedOut(doc) => doc,
            WaitOutcome::NoStatus => None,
        }
    }
}

/// Timing and transport settings for a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSettings {
    /// Try the push channel before polling.
    pub use_websocket: bool,
    /// Overall timeout; `None` waits forever.
    ///
    /// The wait ends once the elapsed time reaches the timeout (`>=`), but
    /// only after the first fetch.  A zero timeout therefore makes exactly
    /// one fetch and returns `TimedOut` unless that fetch is terminal.
    pub timeout: Option<Duration>,
    /// Pause between polls and before reconnecting.
    pub retry_interval: Duration,
    /// Longest silence tolerated on the push channel before probing it.
    pub idle_timeout: Duration,
    /// How long to wait for a pong.
    pub ping_timeout: Duration,
    /// Push-channel URL.
    pub push_url: String,
}

impl From<&ApiConfig> for WaitSettings {
    fn from(config: &ApiConfig) -> Self {
        Self {
            use_websocket: config.use_websocket,
            timeout: config.timeout,
            retry_interval: config.retry_interval,
            idle_timeout: config.websocket_idle_timeout,
            ping_timeout: config.ping_timeout,
            push_url: config.push_url(),
        }
    }
}

enum PushEnd {
    Finished(WaitOutcome),
    Reconnect,
    Unavailable,
}

enum Probe {
    Alive,
    Dead,
    Terminal(StatusDocument),
}

/// Waits for a job to finish.
pub struct CompletionWaiter<'a, S: StatusSource + ?Sized> {
    source: &'a S,
    settings: WaitSettings,
}

impl<'a, S: StatusSource + ?Sized> CompletionWaiter<'a, S> {
    /// Create a waiter reading status from `source`.
    pub fn new(source: &'a S, settings: WaitSettings) -> Self {
        Self { source, settings }
    }

    /// Settings in use.
    pub fn settings(&self) -> &WaitSettings {
        &self.settings
    }

    /// Wait until the job finishes or the timeout elapses.
    ///
    /// No signal handler is installed, so Ctrl-C keeps its default action
    /// and ends the process.
    #[instrument(skip(self))]
    pub async fn wait(&self, job_id: &str) -> QuantinuumResult<WaitOutcome> {
        self.run(job_id).await
    }

    /// Wait until the job finishes, the timeout elapses or `interrupt`
    /// completes.  An interrupt ends the wait with
    /// [`QuantinuumError::Interrupted`]; a future built on
    /// `tokio::signal::ctrl_c` turns Ctrl-C into that error instead of an exit.
    #[instrument(skip(self, interrupt))]
    pub async fn wait_with_interrupt<I>(
        &self,
        job_id: &str,
        interrupt: I,
    ) -> QuantinuumResult<WaitOutcome>
    where
        I: Future<Output = ()> + Send,
    {
        tokio::select! {
            outcome = self.run(job_id) => outcome,
            () = interrupt => {
                warn!("Interrupted while waiting for job {}", job_id);
                Err(QuantinuumError::Interrupted(job_id.to_string()))
            }
        }
    }

    async fn run(&self, job_id: &str) -> QuantinuumResult<WaitOutcome> {
        let start = Instant::now();
        if !self.settings.use_websocket {
            return self.poll(job_id, start, None).await;
        }

        loop {
            let Some(doc) = self.source.fetch_status(job_id, true).await? else {
                return Ok(WaitOutcome::NoStatus);
            };
            if doc.is_terminal() {
                return Ok(WaitOutcome::Terminal(doc));
            }

            let channel = match WaitStrategy::for_document(&doc, true) {
                WaitStrategy::Push(channel) => channel,
                WaitStrategy::Poll => return self.poll(job_id, start, Some(doc)).await,
            };

            let mut last = Some(doc);
            match self.push(job_id, &channel, start, &mut last).await? {
                PushEnd::Finished(outcome) => return Ok(outcome),
                PushEnd::Unavailable => return self.poll(job_id, start, last).await,
                PushEnd::Reconnect => {
                    self.pause(start).await;
                    if self.expired(start) {
                        return Ok(WaitOutcome::TimedOut(last));
                    }
                }
            }
        }
    }

    /// Poll until terminal.  When `last` is set a fetch has just happened, so
    /// the loop starts with a pause.
    async fn poll(
        &self,
        job_id: &str,
        start: Instant,
        mut last: Option<StatusDocument>,
    ) -> QuantinuumResult<WaitOutcome> {
        debug!("Polling status of job {}", job_id);
        loop {
            if last.is_some() {
                self.pause(start).await;
                if self.expired(start) {
                    return Ok(WaitOutcome::TimedOut(last));
                }
            }

            let Some(doc) = self.source.fetch_status(job_id, false).await? else {
                return Ok(WaitOutcome::NoStatus);
            };
            if doc.is_terminal() {
                return Ok(WaitOutcome::Terminal(doc));
            }
            last = Some(doc);
        }
    }

    async fn push(
        &self,
        job_id: &str,
        channel: &PushChannel,
        start: Instant,
        last: &mut Option<StatusDocument>,
    ) -> QuantinuumResult<PushEnd> {
        let mut stream = match tokio_tungstenite::connect_async(self.settings.push_url.as_str()).await
        {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("Push channel unavailable, falling back to polling: {}", e);
                return Ok(PushEnd::Unavailable);
            }
        };
        info!("Listening for status of job {} on the push channel", job_id);

        let open = json!({
            "action": "OpenConnection",
            "task_token": channel.task_token,
            "executionArn": channel.execution_arn,
        });
        stream.send(Message::Text(open.to_string().into())).await?;

        loop {
            if self.expired(start) {
                let _ = stream.close(None).await;
                return Ok(PushEnd::Finished(WaitOutcome::TimedOut(last.take())));
            }

            let idle = self.bounded(self.settings.idle_timeout, start);
            let lost = match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(Ok(Message::Close(frame)))) => {
                    debug!("Push channel closed by server: {:?}", frame);
                    true
                }
                Ok(Some(Ok(message))) => match decode_frame(message)? {
                    Some(doc) if doc.is_terminal() => {
                        let _ = stream.close(None).await;
                        return Ok(PushEnd::Finished(WaitOutcome::Terminal(doc)));
                    }
                    Some(doc) => {
                        debug!("Job {} is {:?}", job_id, doc.status);
                        *last = Some(doc);
                        false
                    }
                    None => false,
                },
                Ok(Some(Err(e))) => {
                    debug!("Push channel error: {}", e);
                    true
                }
                Ok(None) => true,
                Err(_) if self.expired(start) => continue,
                Err(_) => {
                    debug!("No push message for {:?}", idle);
                    true
                }
            };
            if !lost {
                continue;
            }

            match self.probe(&mut stream, last).await? {
                Probe::Alive => debug!("Push channel still alive"),
                Probe::Terminal(doc) => {
                    let _ = stream.close(None).await;
                    return Ok(PushEnd::Finished(WaitOutcome::Terminal(doc)));
                }
                Probe::Dead => {
                    warn!("Push channel lost for job {}, reconnecting", job_id);
                    let _ = stream.close(None).await;
                    return Ok(PushEnd::Reconnect);
                }
            }
        }
    }

    /// Ping the channel and wait for the pong; status messages arriving
    /// meanwhile are still processed.
    async fn probe(
        &self,
        stream: &mut PushStream,
        last: &mut Option<StatusDocument>,
    ) -> QuantinuumResult<Probe> {
        if stream.send(Message::Ping(Vec::new().into())).await.is_err() {
            return Ok(Probe::Dead);
        }

        let deadline = Instant::now() + self.settings.ping_timeout;
        loop {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(Message::Pong(_)))) => return Ok(Probe::Alive),
                Ok(Some(Ok(message))) => match decode_frame(message)? {
                    Some(doc) if doc.is_terminal() => return Ok(Probe::Terminal(doc)),
                    Some(doc) => *last = Some(doc),
                    None => {}
                },
                _ => return Ok(Probe::Dead),
            }
        }
    }

    /// Reaching the timeout counts as expired.
    fn expired(&self, start: Instant) -> bool {
        self.settings
            .timeout
            .is_some_and(|timeout| start.elapsed() >= timeout)
    }

    /// `duration`, cut short by whatever is left of the overall timeout.
    fn bounded(&self, duration: Duration, start: Instant) -> Duration {
        match self.settings.timeout {
            Some(timeout) => duration.min(timeout.saturating_sub(start.elapsed())),
            None => duration,
        }
    }

    async fn pause(&self, start: Instant) {
        tokio::time::sleep(self.bounded(self.settings.retry_interval, start)).await;
    }
}

/// Status document carried by a data frame; control frames yield `None`.
fn decode_frame(message: Message) -> QuantinuumResult<Option<StatusDocument>> {
    match message {
        Message::Text(text) => StatusDocument::from_message(&text).map(Some),
        Message::Binary(data) => {
            let text = std::str::from_utf8(&data).map_err(|e| {
                QuantinuumError::Transport(format!("Unable to decode push message: {e}"))
            })?;
            StatusDocument::from_message(text).map(Some)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::JobStatus;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed sequence of status documents.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Option<StatusDocument>>>,
        fetches: AtomicUsize,
        push_requests: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Option<StatusDocument>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                fetches: AtomicUsize::new(0),
                push_requests: AtomicUsize::new(0),
            }
        }

        fn statuses(statuses: &[JobStatus]) -> Self {
            Self::new(
                statuses
                    .iter()
                    .cloned()
                    .map(|s| Some(StatusDocument::with_status(s)))
                    .collect(),
            )
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(
            &self,
            _job_id: &str,
            want_push: bool,
        ) -> QuantinuumResult<Option<StatusDocument>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if want_push {
                self.push_requests.fetch_add(1, Ordering::SeqCst);
            }
            let mut responses = self.responses.lock().unwrap();
            // The last response repeats once the script runs out.
            let next = if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap()
            };
            Ok(next)
        }
    }

    fn settings(use_websocket: bool, timeout: Option<Duration>) -> WaitSettings {
        WaitSettings {
            use_websocket,
            timeout,
            retry_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(180),
            ping_timeout: Duration::from_secs(10),
            push_url: "ws://127.0.0.1:9".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_completed() {
        let source = ScriptedSource::statuses(&[
            JobStatus::Submitted,
            JobStatus::Running,
            JobStatus::Completed,
        ]);
        let waiter = CompletionWaiter::new(&source, settings(false, None));

        let outcome = waiter.wait_with_interrupt("job", std::future::pending()).await.unwrap();
        assert!(outcome.is_terminal());
        assert_eq!(
            outcome.document().and_then(|d| d.status.clone()),
            Some(JobStatus::Completed)
        );
        assert_eq!(source.fetches(), 3);
        assert_eq!(source.push_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_requested_but_absent_falls_back_to_poll() {
        let source = ScriptedSource::statuses(&[
            JobStatus::Submitted,
            JobStatus::Running,
            JobStatus::Completed,
        ]);
        let waiter = CompletionWaiter::new(&source, settings(true, None));

        let outcome = waiter.wait_with_interrupt("job", std::future::pending()).await.unwrap();
        assert!(outcome.is_terminal());
        assert_eq!(source.fetches(), 3);
        assert_eq!(source.push_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_with_finished_job() {
        let source = ScriptedSource::statuses(&[JobStatus::Completed]);
        let waiter = CompletionWaiter::new(&source, settings(true, Some(Duration::ZERO)));

        let outcome = waiter.wait_with_interrupt("job", std::future::pending()).await.unwrap();
        assert!(outcome.is_terminal());
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_last_status() {
        let source = ScriptedSource::statuses(&[JobStatus::Queued, JobStatus::Running]);
        let waiter = CompletionWaiter::new(&source, settings(false, Some(Duration::from_secs(12))));

        let outcome = waiter.wait_with_interrupt("job", std::future::pending()).await.unwrap();
        match outcome {
            WaitOutcome::TimedOut(Some(doc)) => assert_eq!(doc.status, Some(JobStatus::Running)),
            other => panic!("expected timeout, got {other:?}"),
        }
        // t=0, t=5, t=10; the pause after that is cut to 2s and the wait ends.
        assert_eq!(source.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_with_running_job() {
        let source = ScriptedSource::statuses(&[JobStatus::Running]);
        let waiter = CompletionWaiter::new(&source, settings(false, Some(Duration::ZERO)));

        let outcome = waiter.wait_with_interrupt("job", std::future::pending()).await.unwrap();
        assert!(matches!(outcome, WaitOutcome::TimedOut(Some(_))));
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_status() {
        let source = ScriptedSource::new(vec![None]);
        let waiter = CompletionWaiter::new(&source, settings(true, None));

        let outcome = waiter.wait_with_interrupt("job", std::future::pending()).await.unwrap();
        assert_eq!(outcome, WaitOutcome::NoStatus);
        assert!(outcome.into_document().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_is_fatal() {
        let source = ScriptedSource::statuses(&[JobStatus::Running]);
        let waiter = CompletionWaiter::new(&source, settings(false, None));

        let err = waiter
            .wait_with_interrupt("job-9", tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, QuantinuumError::Interrupted(ref id) if id == "job-9"));
    }

    #[test]
    fn test_strategy_selection() {
        let mut doc = StatusDocument::with_status(JobStatus::Running);
        assert_eq!(WaitStrategy::for_document(&doc, true), WaitStrategy::Poll);

        let channel = PushChannel {
            task_token: "tt".into(),
            execution_arn: "arn".into(),
        };
        doc.websocket = Some(channel.clone());
        assert_eq!(
            WaitStrategy::for_document(&doc, true),
            WaitStrategy::Push(channel)
        );
        assert_eq!(WaitStrategy::for_document(&doc, false), WaitStrategy::Poll);
    }

    #[test]
    fn test_decode_frame() {
        let doc = decode_frame(Message::Text(r#"{"status": "failed"}"#.to_string().into()))
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, Some(JobStatus::Failed));

        assert!(decode_frame(Message::Pong(Vec::new().into())).unwrap().is_none());
        assert!(decode_frame(Message::Text("[1, 2]".to_string().into())).is_err());
    }
}
