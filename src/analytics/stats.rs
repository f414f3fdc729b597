use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Admission counters shared by the pools.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    granted_immediately: AtomicU64,
    queued: AtomicU64,
    handed_off: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub granted_immediately: u64,
    pub queued: u64,
    pub handed_off: u64,
    pub timed_out: u64,
}

impl AdmissionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_granted_immediately(&self) {
        self.granted_immediately.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_handed_off(&self) {
        self.handed_off.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            granted_immediately: self.granted_immediately.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            handed_off: self.handed_off.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self, name: &str) {
        let s = self.snapshot();
        info!(
            "STATS [{}]: Granted: {} immediate, {} handed off | Queued: {} | Timed out: {}",
            name, s.granted_immediately, s.handed_off, s.queued, s.timed_out
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stats_concurrency() {
        let stats = Arc::new(AdmissionStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let stats = stats.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    stats.inc_granted_immediately();
                    stats.inc_queued();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.granted_immediately, 1000);
        assert_eq!(snapshot.queued, 1000);
        assert_eq!(snapshot.timed_out, 0);
    }
}
