//! Pool configuration options

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::errors::BoxError;
use crate::eviction::EvictionPolicy;
use crate::metrics::{MetricsRecorder, NoopMetricsRecorder};
use crate::slot::SlotMetrics;

/// Async factory producing new resources.
pub type Allocator<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// Async cleaner run against a resource on each release, before recycling.
pub type ReleaseHandler<T> =
    Arc<dyn for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync>;

/// Async finalizer consuming a resource on eviction or shutdown.
pub type DestroyHandler<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Decides whether a resource is destroyed rather than recycled.
pub type EvictionPredicate<T> = Arc<dyn Fn(&T, &SlotMetrics) -> bool + Send + Sync>;

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use flowpool::PoolConfig;
///
/// let config = PoolConfig::new(|| async { Ok::<_, flowpool::BoxError>(Vec::<u8>::new()) })
///     .with_size_max(32)
///     .with_initial_size(4);
///
/// assert_eq!(config.size_max, 32);
/// assert_eq!(config.initial_size, 4);
/// ```
pub struct PoolConfig<T> {
    /// Factory invoked whenever the pool grows
    pub allocator: Allocator<T>,

    /// Number of resources allocated eagerly at construction
    pub initial_size: usize,

    /// Upper bound on concurrently live resources
    pub size_max: usize,

    /// Cleaner applied on each release before the resource is recycled
    pub release_handler: Option<ReleaseHandler<T>>,

    /// Finalizer applied when a resource leaves the pool for good
    pub destroy_handler: Option<DestroyHandler<T>>,

    /// When true, the resource is destroyed instead of recycled
    pub eviction_predicate: Option<EvictionPredicate<T>>,

    /// Optional runtime on which deliveries are scheduled, normalizing the
    /// otherwise caller-dependent delivery thread
    pub acquisition_scheduler: Option<Handle>,

    /// Observer notified of allocations, recycles and destructions
    pub metrics_recorder: Arc<dyn MetricsRecorder>,

    /// Selects the thread-affinity engine instead of the queue engine
    pub thread_affinity: bool,
}

impl<T> PoolConfig<T> {
    /// Create a configuration around an async allocator, with defaults:
    /// no eager allocation, capacity 16, no handlers, queue engine.
    pub fn new<F, Fut>(allocator: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self {
            allocator: Arc::new(move || -> BoxFuture<'static, Result<T, BoxError>> {
                Box::pin(allocator())
            }),
            initial_size: 0,
            size_max: 16,
            release_handler: None,
            destroy_handler: None,
            eviction_predicate: None,
            acquisition_scheduler: None,
            metrics_recorder: Arc::new(NoopMetricsRecorder),
            thread_affinity: false,
        }
    }

    /// Set the number of resources allocated at construction.
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Set the capacity bound.
    pub fn with_size_max(mut self, size: usize) -> Self {
        self.size_max = size;
        self
    }

    /// Set the release handler. The closure borrows the resource for the
    /// duration of the returned future:
    ///
    /// ```
    /// use flowpool::PoolConfig;
    ///
    /// let config = PoolConfig::new(|| async { Ok::<_, flowpool::BoxError>(String::new()) })
    ///     .with_release_handler(|buf: &mut String| {
    ///         Box::pin(async move {
    ///             buf.clear();
    ///             Ok(())
    ///         })
    ///     });
    ///
    /// assert!(config.release_handler.is_some());
    /// ```
    pub fn with_release_handler(
        mut self,
        handler: impl for<'a> Fn(&'a mut T) -> BoxFuture<'a, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.release_handler = Some(Arc::new(handler));
        self
    }

    /// Set the destroy handler, consuming the resource.
    pub fn with_destroy_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.destroy_handler = Some(Arc::new(
            move |value: T| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(handler(value))
            },
        ));
        self
    }

    /// Set a custom eviction predicate.
    pub fn with_eviction_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T, &SlotMetrics) -> bool + Send + Sync + 'static,
    {
        self.eviction_predicate = Some(Arc::new(predicate));
        self
    }

    /// Use a ready-made [`EvictionPolicy`] as the eviction predicate.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_predicate = Some(Arc::new(move |_, metrics| policy.is_expired(metrics)));
        self
    }

    /// Deliver resources to borrowers on the given runtime instead of
    /// whichever thread happens to run the matching drain.
    pub fn with_acquisition_scheduler(mut self, handle: Handle) -> Self {
        self.acquisition_scheduler = Some(handle);
        self
    }

    /// Attach a metrics observer.
    pub fn with_metrics_recorder(mut self, recorder: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics_recorder = recorder;
        self
    }

    /// Select the thread-affinity engine when building through
    /// [`Pool::from_config`](crate::Pool::from_config).
    pub fn with_thread_affinity(mut self, enabled: bool) -> Self {
        self.thread_affinity = enabled;
        self
    }
}

impl<T> Clone for PoolConfig<T> {
    fn clone(&self) -> Self {
        Self {
            allocator: self.allocator.clone(),
            initial_size: self.initial_size,
            size_max: self.size_max,
            release_handler: self.release_handler.clone(),
            destroy_handler: self.destroy_handler.clone(),
            eviction_predicate: self.eviction_predicate.clone(),
            acquisition_scheduler: self.acquisition_scheduler.clone(),
            metrics_recorder: self.metrics_recorder.clone(),
            thread_affinity: self.thread_affinity,
        }
    }
}
