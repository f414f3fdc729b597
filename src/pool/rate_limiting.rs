use std::time::Duration;

use crate::config::RateLimitSettings;
use crate::error::Result;
use crate::pool::lock::{LockPool, LockTicket};
use crate::pool::temporal::{SlotTicket, TemporalSlotPool};
use crate::signal::Completion;

/// Bounded concurrency plus bounded reuse frequency.
///
/// Admission takes a temporal slot first, then a concurrency lock.
#[derive(Clone)]
pub struct RateLimitingPool {
    slots: TemporalSlotPool,
    locks: LockPool,
    acquire_timeout: Option<Duration>,
}

impl RateLimitingPool {
    pub fn new(capacity: usize, resolution: Duration, concurrency: usize) -> Result<Self> {
        Ok(Self {
            slots: TemporalSlotPool::new(capacity, resolution)?,
            locks: LockPool::new(concurrency)?,
            acquire_timeout: None,
        })
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self> {
        Ok(Self::new(settings.capacity, settings.resolution(), settings.concurrency)?
            .with_acquire_timeout(settings.acquire_timeout()))
    }

    /// Bounds the wait for the concurrency lock. `None` or zero waits indefinitely.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// On a lock timeout the slot is still consumed and starts its cooldown.
    pub async fn acquire(&self) -> Result<RateLimitPermit> {
        let slot = self.slots.acquire().await?;
        let lock = self.locks.acquire(self.acquire_timeout).await?;
        Ok(RateLimitPermit { lock, slot })
    }

    /// Resolves once no concurrency lock is held or queued.
    pub fn settled(&self) -> Completion {
        self.locks.settled()
    }

    pub fn slots(&self) -> &TemporalSlotPool {
        &self.slots
    }

    pub fn locks(&self) -> &LockPool {
        &self.locks
    }
}

/// Combined release for a [`RateLimitingPool`] admission.
pub struct RateLimitPermit {
    // Field order matters: on drop the lock goes back before the slot cooldown starts.
    lock: LockTicket,
    slot: SlotTicket,
}

impl RateLimitPermit {
    pub fn release(&mut self) -> Result<()> {
        self.lock.release()?;
        self.slot.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::pool::TicketState;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_and_reuse_both_bound() {
        let pool = RateLimitingPool::new(2, Duration::from_millis(100), 1).unwrap();

        let mut first = pool.acquire().await.unwrap();
        assert_eq!(pool.locks().available(), 0);
        assert_eq!(pool.slots().free_slots(), 1);

        let second = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let mut permit = pool.acquire().await.unwrap();
                permit.release().unwrap();
                start
            })
        };
        sleep(Duration::from_millis(10)).await;
        // Slot taken, blocked on the lock.
        assert_eq!(pool.locks().waiting(), 1);

        first.release().unwrap();
        second.await.unwrap();

        // Both slots cooling down: the third caller waits for the first cooldown.
        let start = Instant::now();
        let _third = pool.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_frees_lock_then_slot() {
        let pool = RateLimitingPool::new(1, Duration::from_millis(50), 1).unwrap();
        let mut permit = pool.acquire().await.unwrap();

        permit.release().unwrap();
        assert_eq!(permit.lock.state(), TicketState::Released);
        assert_eq!(permit.slot.state(), TicketState::Released);
        assert_eq!(pool.locks().available(), 1);
        assert_eq!(pool.slots().free_slots(), 0);

        assert!(matches!(permit.release(), Err(AppError::AlreadyReleased)));
        pool.settled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_timeout_bounds_lock_wait() {
        let settings = RateLimitSettings {
            capacity: 4,
            resolution_ms: 10,
            concurrency: 1,
            acquire_timeout_ms: 50,
        };
        let pool = RateLimitingPool::from_settings(&settings).unwrap();
        let _held = pool.acquire().await.unwrap();

        let start = Instant::now();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(AppError::Timeout(t)) if t == Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.locks().stats().snapshot().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_frees_lock_and_cools_slot() {
        let pool = RateLimitingPool::new(1, Duration::from_millis(100), 1).unwrap();
        let permit = pool.acquire().await.unwrap();

        let next = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _permit = pool.acquire().await.unwrap();
                Instant::now()
            })
        };
        let start = Instant::now();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.slots().waiting(), 1);

        drop(permit);
        assert_eq!(pool.locks().available(), 1);
        assert_eq!(pool.slots().free_slots(), 0);
        pool.settled().await;

        // The lock was free at once; the slot only comes back after its cooldown.
        let granted_at = next.await.unwrap();
        assert!(granted_at.duration_since(start) >= Duration::from_millis(100));
    }
}
