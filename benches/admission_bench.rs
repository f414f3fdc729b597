use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::time::Duration;
use rpc_throttle::pool::{LockPool, RateLimitingPool, TemporalSlotPool};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_lock_pool(c: &mut Criterion) {
    let rt = runtime();
    let pool = LockPool::new(4).unwrap();

    c.bench_function("lock_acquire_release", |b| b.iter(|| {
        rt.block_on(async {
            let mut ticket = pool.acquire(None).await.unwrap();
            black_box(ticket.release()).unwrap();
        })
    }));

    c.bench_function("lock_try_acquire", |b| b.iter(|| {
        black_box(pool.try_acquire())
    }));
}

fn bench_temporal_pool(c: &mut Criterion) {
    let rt = runtime();
    // Zero resolution returns the slot inline, so the bench never waits.
    let slots = TemporalSlotPool::new(4, Duration::ZERO).unwrap();
    let combined = RateLimitingPool::new(4, Duration::ZERO, 4).unwrap();

    c.bench_function("temporal_acquire_release", |b| b.iter(|| {
        rt.block_on(async {
            let mut slot = slots.acquire().await.unwrap();
            black_box(slot.release()).unwrap();
        })
    }));

    c.bench_function("rate_limiting_acquire_release", |b| b.iter(|| {
        rt.block_on(async {
            let mut permit = combined.acquire().await.unwrap();
            black_box(permit.release()).unwrap();
        })
    }));
}

criterion_group!(benches, bench_lock_pool, bench_temporal_pool);
criterion_main!(benches);
