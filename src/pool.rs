//! Unified facade over the two pool engines

use crate::affinity::AffinityPool;
use crate::borrower::Acquire;
use crate::config::PoolConfig;
use crate::errors::PoolResult;
use crate::health::PoolStatus;
use crate::queue::QueuePool;

/// A reactive pool backed by either the queue engine or the thread-affinity
/// engine, chosen by [`PoolConfig::thread_affinity`].
///
/// Both engines share one contract: `acquire` returns a cold, cancellable
/// future; released resources are recycled or evicted; `dispose` fails the
/// pending and destroys the idle.
pub enum Pool<T: Send + 'static> {
    Queue(QueuePool<T>),
    Affinity(AffinityPool<T>),
}

impl<T: Send + 'static> Pool<T> {
    /// Build a pool from its configuration, allocating `initial_size`
    /// resources eagerly. Must be called within a tokio runtime.
    pub async fn from_config(config: PoolConfig<T>) -> PoolResult<Self> {
        if config.thread_affinity {
            Ok(Self::Affinity(AffinityPool::new(config).await?))
        } else {
            Ok(Self::Queue(QueuePool::new(config).await?))
        }
    }

    /// Request a resource. Dropping the future before it resolves cancels
    /// the request.
    pub fn acquire(&self) -> Acquire<T> {
        match self {
            Self::Queue(pool) => pool.acquire(),
            Self::Affinity(pool) => pool.acquire(),
        }
    }

    /// Shut the pool down. Idempotent.
    pub async fn dispose(&self) {
        match self {
            Self::Queue(pool) => pool.dispose().await,
            Self::Affinity(pool) => pool.dispose().await,
        }
    }

    pub fn is_disposed(&self) -> bool {
        match self {
            Self::Queue(pool) => pool.is_disposed(),
            Self::Affinity(pool) => pool.is_disposed(),
        }
    }

    pub fn status(&self) -> PoolStatus {
        match self {
            Self::Queue(pool) => pool.status(),
            Self::Affinity(pool) => pool.status(),
        }
    }
}

impl<T: Send + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Queue(pool) => Self::Queue(pool.clone()),
            Self::Affinity(pool) => Self::Affinity(pool.clone()),
        }
    }
}
