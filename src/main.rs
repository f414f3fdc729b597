use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rpc_throttle::batch::Consolidator;
use rpc_throttle::config::Config;
use rpc_throttle::error::Result;
use rpc_throttle::limiter::Limiter;
use rpc_throttle::pool::RateLimitingPool;
use rpc_throttle::utils::time::elapsed_ms;

const SIMULATED_LATENCY: Duration = Duration::from_millis(25);
const ACCOUNTS: usize = 40;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting rpc-throttle demo...");
    info!(
        "Upstream quota: {} calls per {}ms, {} in flight",
        config.rpc.capacity, config.rpc.resolution_ms, config.rpc.concurrency
    );

    let pool = RateLimitingPool::from_settings(&config.rpc)?;
    let upstream_calls = Arc::new(AtomicU64::new(0));

    // Batched balance lookups against the simulated quota-limited upstream.
    let lookup = {
        let pool = pool.clone();
        let upstream_calls = upstream_calls.clone();
        move |keys: Vec<String>| {
            let pool = pool.clone();
            let upstream_calls = upstream_calls.clone();
            async move {
                let mut permit = pool.acquire().await?;
                upstream_calls.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(SIMULATED_LATENCY).await;
                permit.release()?;

                let balances: HashMap<String, u64> = keys
                    .into_iter()
                    .map(|k| {
                        let balance: u64 = k.bytes().map(u64::from).sum();
                        (k, balance)
                    })
                    .collect();
                Ok::<_, anyhow::Error>(balances)
            }
        }
    };
    let consolidator: Consolidator<u64> = Consolidator::new(
        config.consolidator.delay(),
        config.consolidator.max_wait(),
        lookup,
    );

    let refreshes = Arc::new(AtomicU64::new(0));
    let limiter = {
        let refreshes = refreshes.clone();
        Limiter::new(config.limiter.resolution(), move || {
            let refreshes = refreshes.clone();
            async move {
                let n = refreshes.fetch_add(1, Ordering::Relaxed) + 1;
                info!("Refreshing account view (#{})", n);
                Ok::<_, anyhow::Error>(())
            }
        })
    };

    let start = Instant::now();
    let lookups = (0..ACCOUNTS).map(|i| {
        let consolidator = consolidator.clone();
        let limiter = limiter.clone();
        async move {
            tokio::time::sleep(Duration::from_millis((i as u64 % 10) * 15)).await;
            let result = consolidator.queue(format!("account-{}", i % 25)).await;
            // Every answer asks for a view refresh; the limiter folds them together.
            drop(limiter.notice());
            result
        }
    });

    let mut failed = 0;
    for result in join_all(lookups).await {
        if let Err(e) = result {
            warn!("Lookup failed: {}", e);
            failed += 1;
        }
    }

    limiter.notice().await;
    pool.settled().await;

    info!(
        "Done in {}ms: {} lookups ({} failed) served by {} upstream calls, {} refreshes",
        elapsed_ms(start),
        ACCOUNTS,
        failed,
        upstream_calls.load(Ordering::Relaxed),
        refreshes.load(Ordering::Relaxed)
    );
    pool.slots().stats().log_stats("temporal");
    pool.locks().stats().log_stats("concurrency");

    if failed > 0 {
        error!("{} lookups failed", failed);
    }

    Ok(())
}
