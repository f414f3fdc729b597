use std::time::Duration;
use tokio::time::Instant;

pub fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Time left until `since + interval`, zero once it has passed.
pub fn remaining(since: Instant, interval: Duration) -> Duration {
    interval.saturating_sub(since.elapsed())
}
