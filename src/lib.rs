//! Admission-control primitives for calling a scarce, rate-limited upstream.
//!
//! - [`pool::LockPool`] bounds how many calls run at once.
//! - [`pool::TemporalSlotPool`] bounds how often a slot is reused.
//! - [`pool::RateLimitingPool`] combines both.
//! - [`batch::Consolidator`] coalesces per-key lookups into batched calls.
//! - [`limiter::Limiter`] runs a repeatable action on the trailing edge of a burst.

pub mod analytics;
pub mod batch;
pub mod config;
pub mod error;
pub mod limiter;
pub mod pool;
pub mod signal;
pub mod utils;
