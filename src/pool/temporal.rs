use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::analytics::stats::AdmissionStats;
use crate::error::{AppError, Result};
use crate::pool::lock::TicketState;

pub(crate) struct TemporalInner {
    capacity: usize,
    resolution: Duration,
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    stats: AdmissionStats,
}

impl TemporalInner {
    fn return_slot(&self) {
        debug_assert!(self.semaphore.available_permits() < self.capacity);
        self.semaphore.add_permits(1);
    }

    /// Takes the slot out of circulation until `resolution` has passed since `acquired_at`.
    fn schedule_return(self: &Arc<Self>, permit: OwnedSemaphorePermit, acquired_at: Instant) {
        let reusable_at = acquired_at + self.resolution;
        if reusable_at <= Instant::now() {
            drop(permit);
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                permit.forget();
                let inner = Arc::clone(self);
                handle.spawn(async move {
                    sleep_until(reusable_at).await;
                    inner.return_slot();
                });
            }
            Err(_) => {
                warn!("No runtime to run slot cooldown, returning slot early");
                drop(permit);
            }
        }
    }
}

struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fixed set of slots whose reuse is spaced by `resolution` from each acquisition.
#[derive(Clone)]
pub struct TemporalSlotPool {
    inner: Arc<TemporalInner>,
}

impl TemporalSlotPool {
    pub fn new(capacity: usize, resolution: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(AppError::InvalidConfig(
                "temporal slot capacity must be positive".into(),
            ));
        }

        Ok(Self {
            inner: Arc::new(TemporalInner {
                capacity,
                resolution,
                semaphore: Arc::new(Semaphore::new(capacity)),
                queued: AtomicUsize::new(0),
                stats: AdmissionStats::new(),
            }),
        })
    }

    pub async fn acquire(&self) -> Result<SlotTicket> {
        let permit = match Arc::clone(&self.inner.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.inner.stats.inc_granted_immediately();
                permit
            }
            Err(TryAcquireError::Closed) => return Err(AppError::Closed),
            Err(TryAcquireError::NoPermits) => {
                self.inner.stats.inc_queued();
                debug!(capacity = self.inner.capacity, "No temporal slot free, waiting for cooldown");
                let _queued = Queued::enter(&self.inner.queued);
                let permit = Arc::clone(&self.inner.semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| AppError::Closed)?;
                self.inner.stats.inc_handed_off();
                permit
            }
        };

        Ok(SlotTicket {
            pool: Arc::clone(&self.inner),
            permit: Some(permit),
            acquired_at: Instant::now(),
            state: TicketState::Held,
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn resolution(&self) -> Duration {
        self.inner.resolution
    }

    pub fn free_slots(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn waiting(&self) -> usize {
        self.inner.queued.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &AdmissionStats {
        &self.inner.stats
    }
}

/// A held temporal slot. Releasing starts the cooldown instead of freeing the slot.
pub struct SlotTicket {
    pool: Arc<TemporalInner>,
    permit: Option<OwnedSemaphorePermit>,
    acquired_at: Instant,
    state: TicketState,
}

impl SlotTicket {
    pub fn release(&mut self) -> Result<()> {
        if self.state == TicketState::Released {
            error!("Temporal slot released twice");
            return Err(AppError::AlreadyReleased);
        }
        self.give_back();
        Ok(())
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn state(&self) -> TicketState {
        self.state
    }

    fn give_back(&mut self) {
        self.state = TicketState::Released;
        if let Some(permit) = self.permit.take() {
            self.pool.schedule_return(permit, self.acquired_at);
        }
    }
}

impl Drop for SlotTicket {
    fn drop(&mut self) {
        if self.state == TicketState::Held {
            self.give_back();
        }
    }
}
