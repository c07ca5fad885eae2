//! Eviction policies deciding whether a released resource is recycled or destroyed

use std::time::Duration;

use crate::slot::SlotMetrics;

/// Ready-made eviction policy, evaluated against a slot's metrics on every
/// handover and on every release.
///
/// # Examples
///
/// ```
/// use flowpool::{EvictionPolicy, PoolConfig};
/// use std::time::Duration;
///
/// let config = PoolConfig::new(|| async { Ok::<_, flowpool::BoxError>(Vec::<u8>::new()) })
///     .with_eviction_policy(EvictionPolicy::TimeToLive(Duration::from_secs(3600)));
///
/// assert!(config.eviction_predicate.is_some());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub enum EvictionPolicy {
    /// No eviction; resources are recycled until the pool is disposed
    #[default]
    None,

    /// Resources expire a fixed duration after allocation
    TimeToLive(Duration),

    /// Resources expire after sitting unused for the given duration
    IdleTimeout(Duration),

    /// Resources expire after having been delivered the given number of times
    MaxAcquireCount(u32),

    /// Either TTL or idle timeout, whichever trips first
    Combined {
        ttl: Duration,
        idle_timeout: Duration,
    },
}

impl EvictionPolicy {
    /// Whether a slot with the given metrics should be destroyed rather than
    /// recycled.
    pub fn is_expired(&self, metrics: &SlotMetrics) -> bool {
        match self {
            EvictionPolicy::None => false,
            EvictionPolicy::TimeToLive(ttl) => metrics.age() > *ttl,
            EvictionPolicy::IdleTimeout(timeout) => metrics.idle_time() > *timeout,
            EvictionPolicy::MaxAcquireCount(max) => metrics.acquire_count() >= *max,
            EvictionPolicy::Combined { ttl, idle_timeout } => {
                metrics.age() > *ttl || metrics.idle_time() > *idle_timeout
            }
        }
    }
}
