//! Trailing-edge limiter for a single repeatable action.
//!
//! [`Limiter::notice`] asks for the action to run soon. Runs are spaced at least
//! `resolution` apart, a burst of notices collapses into one run, and a notice that
//! arrives mid-run buys exactly one more run afterwards.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};

use crate::signal::{notify_all, Completion};
use crate::utils::time::remaining;

#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Action for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self)().await
    }
}

struct LimiterState {
    last_execution: Instant,
    pending: bool,
    executing: bool,
    postponed: bool,
    idle: Vec<oneshot::Sender<()>>,
}

struct LimiterInner {
    resolution: Duration,
    action: Box<dyn Action>,
    state: Mutex<LimiterState>,
}

#[derive(Clone)]
pub struct Limiter {
    inner: Arc<LimiterInner>,
}

impl Limiter {
    /// The first run also waits out `resolution`, counted from construction.
    pub fn new<A>(resolution: Duration, action: A) -> Self
    where
        A: Action + 'static,
    {
        Self {
            inner: Arc::new(LimiterInner {
                resolution,
                action: Box::new(action),
                state: Mutex::new(LimiterState {
                    last_execution: Instant::now(),
                    pending: false,
                    executing: false,
                    postponed: false,
                    idle: Vec::new(),
                }),
            }),
        }
    }

    /// Requests a run. The returned [`Completion`] resolves once nothing is
    /// scheduled, running or postponed; it can be dropped for fire-and-forget use.
    ///
    /// Runs need a tokio runtime. Outside one the notice is dropped with a warning.
    pub fn notice(&self) -> Completion {
        let Ok(handle) = Handle::try_current() else {
            warn!("No runtime to run limiter action, dropping notice");
            return Completion::ready();
        };

        let (tx, completion) = Completion::pending();
        let mut state = self.inner.state.lock();
        state.idle.push(tx);
        schedule(&handle, &self.inner, &mut state);
        completion
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        !(state.pending || state.executing || state.postponed)
    }
}

fn schedule(handle: &Handle, inner: &Arc<LimiterInner>, state: &mut LimiterState) {
    if state.pending {
        return;
    }
    if state.executing {
        state.postponed = true;
        return;
    }

    let wait = remaining(state.last_execution, inner.resolution);
    let inner = Arc::clone(inner);
    if wait.is_zero() {
        state.executing = true;
        handle.spawn(execute(inner));
    } else {
        debug!(delay_ms = wait.as_millis() as u64, "Scheduling trailing execution");
        state.pending = true;
        handle.spawn(async move {
            sleep(wait).await;
            {
                let mut state = inner.state.lock();
                state.pending = false;
                state.executing = true;
            }
            execute(inner).await;
        });
    }
}

async fn execute(inner: Arc<LimiterInner>) {
    match AssertUnwindSafe(inner.action.run()).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Limiter action failed: {:#}", e),
        Err(_) => error!("Limiter action panicked"),
    }

    let mut state = inner.state.lock();
    state.executing = false;
    state.last_execution = Instant::now();
    if state.postponed {
        state.postponed = false;
        schedule(&Handle::current(), &inner, &mut state);
    } else if !state.pending {
        notify_all(&mut state.idle);
    }
}
