//! Bridge from blocking callers into the async client.

use std::future::Future;

use reqwest::Client;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tracing::debug;

use crate::error::QuantinuumResult;

tokio::task_local! {
    /// HTTP client owned by the runtime driving a blocking call.
    static CALL_HTTP: Client;
}

/// Drive `future` to completion from synchronous code.
///
/// Inside a multi-threaded tokio runtime the existing runtime is reused.
/// Outside any runtime a current-thread runtime is built for this call only.
/// Inside a current-thread runtime the only worker is blocked, so the future
/// runs on a scoped helper thread with its own transient runtime.
pub fn block_on<F>(future: F) -> QuantinuumResult<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => {
                debug!("Nested in a current-thread runtime, blocking on a helper thread");
                std::thread::scope(|scope| {
                    let worker = scope.spawn(|| transient(future));
                    match worker.join() {
                        Ok(output) => output,
                        Err(panic) => std::panic::resume_unwind(panic),
                    }
                })
            }
            _ => {
                debug!("Reusing the running tokio runtime");
                Ok(tokio::task::block_in_place(|| handle.block_on(future)))
            }
        },
        Err(_) => {
            debug!("Starting a transient tokio runtime");
            transient(future)
        }
    }
}

fn transient<F: Future>(future: F) -> QuantinuumResult<F::Output> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

/// Run `future` with `http` replacing the session's shared client.
///
/// Pooled connections belong to the runtime that opened them; a blocking
/// call gets its own client so it never waits on a runtime it is blocking.
pub(crate) async fn with_http<F: Future>(http: Client, future: F) -> F::Output {
    CALL_HTTP.scope(http, future).await
}

/// Client for the current call: the per-call client if one is in scope,
/// otherwise `shared`.
pub(crate) fn http_client(shared: &Client) -> Client {
    CALL_HTTP
        .try_with(Client::clone)
        .unwrap_or_else(|_| shared.clone())
}
