use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, warn};

use crate::analytics::stats::AdmissionStats;
use crate::error::{AppError, Result};
use crate::signal::{notify_all, Completion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Held,
    Released,
}

struct Quiescence {
    // Held tickets plus acquisitions still queued on the semaphore.
    outstanding: usize,
    settled: Vec<oneshot::Sender<()>>,
}

pub(crate) struct LockPoolInner {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    quiescence: Mutex<Quiescence>,
    stats: AdmissionStats,
}

impl LockPoolInner {
    fn enter(&self) {
        self.quiescence.lock().outstanding += 1;
    }

    fn leave(&self) {
        let mut q = self.quiescence.lock();
        debug_assert!(q.outstanding > 0);
        q.outstanding -= 1;
        if q.outstanding == 0 {
            notify_all(&mut q.settled);
        }
    }

    fn held(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

/// Counts one acquisition against quiescence until it becomes a ticket or is abandoned.
struct Reservation {
    pool: Arc<LockPoolInner>,
    armed: bool,
}

impl Reservation {
    fn new(pool: &Arc<LockPoolInner>) -> Self {
        pool.enter();
        Self {
            pool: Arc::clone(pool),
            armed: true,
        }
    }

    fn into_ticket(mut self, permit: OwnedSemaphorePermit) -> LockTicket {
        self.armed = false;
        LockTicket {
            pool: Arc::clone(&self.pool),
            permit: Some(permit),
            state: TicketState::Held,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.pool.leave();
        }
    }
}

/// Counting semaphore with FIFO admission and single-use tickets.
#[derive(Clone)]
pub struct LockPool {
    inner: Arc<LockPoolInner>,
}

impl LockPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AppError::InvalidConfig(
                "lock pool capacity must be positive".into(),
            ));
        }

        Ok(Self {
            inner: Arc::new(LockPoolInner {
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity)),
                quiescence: Mutex::new(Quiescence {
                    outstanding: 0,
                    settled: Vec::new(),
                }),
                stats: AdmissionStats::new(),
            }),
        })
    }

    /// Waits for a free unit. A zero or absent `timeout` waits indefinitely.
    ///
    /// Dropping the returned future while queued gives up the place in line
    /// without consuming a unit.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<LockTicket> {
        let reservation = Reservation::new(&self.inner);

        let permit = match Arc::clone(&self.inner.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.inner.stats.inc_granted_immediately();
                permit
            }
            Err(TryAcquireError::Closed) => return Err(AppError::Closed),
            Err(TryAcquireError::NoPermits) => {
                self.inner.stats.inc_queued();
                debug!(capacity = self.inner.capacity, "Lock pool full, queueing acquisition");

                let wait = Arc::clone(&self.inner.semaphore).acquire_owned();
                let granted = match timeout.filter(|t| !t.is_zero()) {
                    None => wait.await,
                    Some(limit) => match tokio::time::timeout(limit, wait).await {
                        Ok(granted) => granted,
                        Err(_) => {
                            self.inner.stats.inc_timed_out();
                            warn!(timeout_ms = limit.as_millis() as u64, "Lock acquisition timed out");
                            return Err(AppError::Timeout(limit));
                        }
                    },
                };
                let permit = granted.map_err(|_| AppError::Closed)?;
                self.inner.stats.inc_handed_off();
                permit
            }
        };

        Ok(reservation.into_ticket(permit))
    }

    /// Grants a unit only if one is free right now and nobody is queued.
    pub fn try_acquire(&self) -> Option<LockTicket> {
        let reservation = Reservation::new(&self.inner);
        let permit = Arc::clone(&self.inner.semaphore).try_acquire_owned().ok()?;
        self.inner.stats.inc_granted_immediately();
        Some(reservation.into_ticket(permit))
    }

    /// Resolves once every granted ticket is released and nobody is queued.
    pub fn settled(&self) -> Completion {
        let mut q = self.inner.quiescence.lock();
        if q.outstanding == 0 {
            return Completion::ready();
        }
        let (tx, completion) = Completion::pending();
        q.settled.push(tx);
        completion
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn waiting(&self) -> usize {
        let outstanding = self.inner.quiescence.lock().outstanding;
        outstanding.saturating_sub(self.inner.held())
    }

    pub fn stats(&self) -> &AdmissionStats {
        &self.inner.stats
    }
}

/// Release capability for one unit of a [`LockPool`]. Dropping a held ticket releases it.
pub struct LockTicket {
    pool: Arc<LockPoolInner>,
    permit: Option<OwnedSemaphorePermit>,
    state: TicketState,
}

impl LockTicket {
    pub fn release(&mut self) -> Result<()> {
        if self.state == TicketState::Released {
            error!("Lock ticket released twice");
            return Err(AppError::AlreadyReleased);
        }
        self.give_back();
        Ok(())
    }

    pub fn state(&self) -> TicketState {
        self.state
    }

    // The permit goes back first so a queued acquirer is already counted
    // when quiescence is checked.
    fn give_back(&mut self) {
        self.state = TicketState::Released;
        drop(self.permit.take());
        self.pool.leave();
    }
}

impl Drop for LockTicket {
    fn drop(&mut self) {
        if self.state == TicketState::Held {
            self.give_back();
        }
    }
}
