//! Key-addressed request batching.
//!
//! Calls to [`Consolidator::queue`] that arrive close together are collected into
//! one batch. The batch runs `delay` after the last arrival, but never later than
//! `max_wait` after the batch window opened. Every caller of a key receives the
//! value the submit function returned for that key.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::batch::BatchSubmit;
use crate::error::{AppError, Result};
use crate::utils::time::elapsed_ms;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(200);

type Reply<V> = oneshot::Sender<Result<V>>;

struct Batch<V> {
    keys: Vec<String>,
    waiters: HashMap<String, Vec<Reply<V>>>,
    opened_at: Option<Instant>,
}

struct BatchState<V> {
    keys: Vec<String>,
    waiters: HashMap<String, Vec<Reply<V>>>,
    /// When the current batch window opened.
    checkpoint: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    /// Identifies the live timer; stale timers see a different value and exit.
    timer_seq: u64,
}

impl<V> BatchState<V> {
    fn take_batch(&mut self) -> Batch<V> {
        self.timer_seq = self.timer_seq.wrapping_add(1);
        // Dropping the handle detaches the timer; it exits on the sequence check.
        self.timer = None;
        Batch {
            keys: mem::take(&mut self.keys),
            waiters: mem::take(&mut self.waiters),
            opened_at: self.checkpoint.take(),
        }
    }
}

struct ConsolidatorInner<V> {
    delay: Duration,
    max_wait: Duration,
    submit: Box<dyn BatchSubmit<V>>,
    state: Mutex<BatchState<V>>,
}

/// Batching queue that coalesces per-key lookups into one upstream call.
pub struct Consolidator<V> {
    inner: Arc<ConsolidatorInner<V>>,
}

impl<V> Clone for Consolidator<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Consolidator<V>
where
    V: Clone + Send + 'static,
{
    pub fn new<S>(delay: Duration, max_wait: Duration, submit: S) -> Self
    where
        S: BatchSubmit<V> + 'static,
    {
        Self {
            inner: Arc::new(ConsolidatorInner {
                delay,
                max_wait,
                submit: Box::new(submit),
                state: Mutex::new(BatchState {
                    keys: Vec::new(),
                    waiters: HashMap::new(),
                    checkpoint: None,
                    timer: None,
                    timer_seq: 0,
                }),
            }),
        }
    }

    pub fn with_defaults<S>(submit: S) -> Self
    where
        S: BatchSubmit<V> + 'static,
    {
        Self::new(DEFAULT_DELAY, DEFAULT_MAX_WAIT, submit)
    }

    /// Adds `key` to the current batch and waits for its result.
    pub async fn queue(&self, key: impl Into<String>) -> Result<V> {
        let key = key.into();
        if key.is_empty() {
            return Err(AppError::EmptyKey);
        }

        let rx = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let now = Instant::now();

            if let Some(opened) = state.checkpoint {
                if now.duration_since(opened) >= self.inner.max_wait {
                    debug!("Batch window exceeded max wait, forcing execution");
                    let batch = state.take_batch();
                    tokio::spawn(execute(Arc::clone(&self.inner), batch));
                }
            }
            let opened = *state.checkpoint.get_or_insert(now);

            let (tx, rx) = oneshot::channel();
            match state.waiters.get_mut(&key) {
                Some(replies) => replies.push(tx),
                None => {
                    state.keys.push(key.clone());
                    state.waiters.insert(key, vec![tx]);
                }
            }

            let deadline = (now + self.inner.delay).min(opened + self.inner.max_wait);
            if let Some(stale) = state.timer.take() {
                stale.abort();
            }
            state.timer_seq = state.timer_seq.wrapping_add(1);
            let seq = state.timer_seq;
            state.timer = Some(tokio::spawn(fire(Arc::clone(&self.inner), seq, deadline)));

            rx
        };

        rx.await.map_err(|_| AppError::Closed)?
    }

    /// Number of distinct keys waiting in the open batch.
    pub fn pending_keys(&self) -> usize {
        self.inner.state.lock().keys.len()
    }
}

async fn fire<V>(inner: Arc<ConsolidatorInner<V>>, seq: u64, deadline: Instant)
where
    V: Clone + Send + 'static,
{
    sleep_until(deadline).await;

    let batch = {
        let mut state = inner.state.lock();
        if state.timer_seq != seq {
            return;
        }
        state.take_batch()
    };

    // Run on its own task so a late abort aimed at this timer cannot cancel the batch.
    tokio::spawn(execute(inner, batch));
}

async fn execute<V>(inner: Arc<ConsolidatorInner<V>>, batch: Batch<V>)
where
    V: Clone + Send + 'static,
{
    if batch.keys.is_empty() {
        return;
    }

    let Batch {
        keys,
        waiters,
        opened_at,
    } = batch;
    let key_count = keys.len();
    if let Some(opened) = opened_at {
        debug!(keys = key_count, waited_ms = elapsed_ms(opened), "Submitting batch");
    }

    match inner.submit.submit(keys).await {
        Ok(mut results) => {
            for (key, replies) in waiters {
                let value = results.remove(&key);
                if value.is_none() {
                    warn!(key = %key, "Batch result missing key");
                }
                for reply in replies {
                    let outcome = value
                        .clone()
                        .ok_or_else(|| AppError::MissingResult(key.clone()));
                    let _ = reply.send(outcome);
                }
            }
        }
        Err(e) => {
            warn!(keys = key_count, "Batch submission failed: {:#}", e);
            let shared = Arc::new(e);
            for reply in waiters.into_values().flatten() {
                let _ = reply.send(Err(AppError::Submit(Arc::clone(&shared))));
            }
        }
    }
}
