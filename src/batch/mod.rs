use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;

pub mod consolidator;

pub use consolidator::Consolidator;

/// Upstream call that resolves a whole batch of keys at once.
///
/// The call is all-or-nothing: an `Err` fails every waiter of the batch, so
/// per-key failures belong in `V`.
#[async_trait]
pub trait BatchSubmit<V>: Send + Sync {
    async fn submit(&self, keys: Vec<String>) -> anyhow::Result<HashMap<String, V>>;
}

#[async_trait]
impl<V, F, Fut> BatchSubmit<V> for F
where
    V: Send + 'static,
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HashMap<String, V>>> + Send,
{
    async fn submit(&self, keys: Vec<String>) -> anyhow::Result<HashMap<String, V>> {
        (self)(keys).await
    }
}
