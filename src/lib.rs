//! # flowpool
//!
//! Reactive object pool for async Rust: lends out expensive-to-create
//! resources (connections, sockets, parsers) to many concurrent borrowers,
//! recycles them on release, and bounds their total number.
//!
//! ## Features
//!
//! - Lock-free acquisition: no mutex on the hot path, a work-in-progress
//!   counter serializes the drain that matches borrowers with resources
//! - Cold, cancellable acquire futures with at-most-one delivery
//! - On-demand async allocation up to a capacity bound
//! - Thread-affinity engine steering each thread back to resources it
//!   released before, with a fast path that skips the central queue
//! - Release and destroy handlers, eviction policies, shutdown protocol
//! - Pluggable metrics with Prometheus export
//!
//! ## Quick Start
//!
//! ```
//! use flowpool::{Pool, PoolConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = PoolConfig::new(|| async { Ok::<_, flowpool::BoxError>(Vec::<u8>::new()) })
//!     .with_size_max(8);
//! let pool = Pool::from_config(config).await.unwrap();
//!
//! let buffer = pool.acquire().await.unwrap();
//! assert!(buffer.is_empty());
//! buffer.release().await.unwrap();
//! # }
//! ```

mod affinity;
mod borrower;
mod config;
mod core;
mod errors;
mod eviction;
mod health;
mod metrics;
mod pool;
mod queue;
mod slot;

#[cfg(test)]
mod test_support;

pub use affinity::AffinityPool;
pub use borrower::Acquire;
pub use config::{
    Allocator, DestroyHandler, EvictionPredicate, PoolConfig, ReleaseHandler,
};
pub use errors::{BoxError, PoolError, PoolResult};
pub use eviction::EvictionPolicy;
pub use health::PoolStatus;
pub use metrics::{
    InMemoryMetricsRecorder, MetricsExporter, MetricsRecorder, NoopMetricsRecorder, PoolMetrics,
};
pub use pool::Pool;
pub use queue::QueuePool;
pub use slot::{PooledRef, SlotMetrics};
