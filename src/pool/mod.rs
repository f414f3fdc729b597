//! Admission-control pools.
//!
//! - [`LockPool`]: counting semaphore with FIFO waiters, timeouts and a `settled` barrier.
//! - [`TemporalSlotPool`]: slots whose reuse is spaced in time from each acquisition.
//! - [`RateLimitingPool`]: a temporal slot followed by a concurrency lock.

pub mod lock;
pub mod rate_limiting;
pub mod temporal;

pub use lock::{LockPool, LockTicket, TicketState};
pub use rate_limiting::{RateLimitPermit, RateLimitingPool};
pub use temporal::{SlotTicket, TemporalSlotPool};
