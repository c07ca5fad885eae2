//! Affinity engine: per-thread sub-pools with a fast local path

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Instant;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;

use crate::borrower::{Acquire, Borrower};
use crate::config::PoolConfig;
use crate::core::{Engine, PoolCore, schedule_delivery, spawn_allocation, spawn_destroy};
use crate::errors::{PoolError, PoolResult};
use crate::health::PoolStatus;
use crate::slot::{PooledRef, Slot, destroy_slot};

/// Pool engine that steers each thread's requests toward resources the same
/// thread released before.
///
/// The idle set is partitioned by releasing thread. An acquire first tries
/// its own partition (the fast path: pop, deliver inline, no drain); when
/// that is empty it falls back to the central pending queue and the shared
/// drain, which scans the unaffined queue and then every partition, so a
/// release racing a slow-path acquire is always observed. Resources
/// allocated eagerly at construction carry no affinity until first released.
pub struct AffinityPool<T: Send + 'static> {
    inner: Arc<AffinityInner<T>>,
}

impl<T: Send + 'static> Clone for AffinityPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct AffinityInner<T: Send + 'static> {
    core: PoolCore<T>,
    available: SegQueue<Slot<T>>,
    subpools: DashMap<ThreadId, SegQueue<Slot<T>>>,
    pending: SegQueue<Arc<Borrower<T>>>,
}

impl<T: Send + 'static> AffinityPool<T> {
    /// Build the pool and allocate `initial_size` resources eagerly; they sit
    /// in the unaffined queue until a release assigns them a thread. Must be
    /// called within a tokio runtime.
    pub async fn new(config: PoolConfig<T>) -> PoolResult<Self> {
        let initial = config.initial_size.min(config.size_max);
        let inner = Arc::new(AffinityInner {
            core: PoolCore::new(config),
            available: SegQueue::new(),
            subpools: DashMap::new(),
            pending: SegQueue::new(),
        });

        for _ in 0..initial {
            if !inner.core.try_acquire_permit() {
                break;
            }
            let start = Instant::now();
            match (*inner.core.config.allocator)().await {
                Ok(value) => {
                    inner
                        .core
                        .metrics()
                        .record_allocation_success_and_latency(start.elapsed());
                    inner.available.push(Slot::new(value));
                }
                Err(err) => {
                    inner
                        .core
                        .metrics()
                        .record_allocation_failure_and_latency(start.elapsed());
                    inner.core.return_permit();
                    let engine: Arc<dyn Engine<T>> = inner.clone();
                    while let Some(slot) = inner.available.pop() {
                        destroy_slot(&engine, slot).await;
                    }
                    return Err(PoolError::Allocation(err));
                }
            }
        }

        Ok(Self { inner })
    }

    /// Request a resource, preferring one this thread released before.
    pub fn acquire(&self) -> Acquire<T> {
        Acquire::new(self.inner.clone())
    }

    /// Shut the pool down: fail every pending borrower, destroy every idle
    /// resource in every partition. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.core.terminate() {
            self.inner.fail_pending();
            let mut orphans = Vec::new();
            while let Some(slot) = self.inner.available.pop() {
                orphans.push(slot);
            }
            for entry in self.inner.subpools.iter() {
                while let Some(slot) = entry.value().pop() {
                    orphans.push(slot);
                }
            }
            let engine: Arc<dyn Engine<T>> = self.inner.clone();
            for slot in orphans {
                destroy_slot(&engine, slot).await;
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.is_terminated()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus::new(
            self.inner.idle_count(),
            self.inner.core.acquired_count(),
            self.inner.core.live_count(),
            self.inner.core.config.size_max,
            self.inner.core.is_terminated(),
        )
    }
}

impl<T: Send + 'static> AffinityInner<T> {
    fn fail_pending(&self) {
        while let Some(borrower) = self.pending.pop() {
            borrower.fail(PoolError::Shutdown);
        }
    }

    fn idle_count(&self) -> usize {
        self.available.len()
            + self
                .subpools
                .iter()
                .map(|entry| entry.value().len())
                .sum::<usize>()
    }

    /// Pop the calling thread's partition, destroying evictable slots along
    /// the way. Used only by the fast path.
    fn try_fast_path(this: &Arc<Self>) -> Option<Slot<T>> {
        let key = std::thread::current().id();
        let partition = this.subpools.get(&key)?;
        while let Some(slot) = partition.pop() {
            if this.core.evict(&slot) {
                let engine: Arc<dyn Engine<T>> = this.clone();
                spawn_destroy(&engine, slot);
                continue;
            }
            return Some(slot);
        }
        None
    }

    /// First non-empty queue wins: unaffined slots first, then any partition.
    fn pop_idle(&self) -> Option<Slot<T>> {
        if let Some(slot) = self.available.pop() {
            return Some(slot);
        }
        for entry in self.subpools.iter() {
            if let Some(slot) = entry.value().pop() {
                return Some(slot);
            }
        }
        None
    }

    fn restore_idle(this: &Arc<Self>, slot: Slot<T>) {
        match slot.affinity {
            Some(key) => this.subpools.entry(key).or_default().push(slot),
            None => this.available.push(slot),
        }
    }

    fn drain(this: &Arc<Self>) {
        if this.core.enter_drain() {
            Self::drain_loop(this);
        }
    }

    /// Same loop as the queue engine, over the partitioned idle set.
    fn drain_loop(this: &Arc<Self>) {
        let mut missed = 1;
        loop {
            let idle_count = this.idle_count();
            let pending_count = this.pending.len();
            let permits = this.core.remaining_permits();

            if idle_count == 0 {
                if pending_count > 0 && permits > 0 {
                    let Some(borrower) = this.pending.pop() else {
                        continue;
                    };
                    if !borrower.claim() {
                        continue;
                    }
                    if this.core.try_acquire_permit() {
                        let engine: Arc<dyn Engine<T>> = this.clone();
                        spawn_allocation(engine, borrower);
                    } else {
                        borrower.unclaim();
                        this.pending.push(borrower);
                    }
                }
            } else if pending_count > 0 {
                let Some(slot) = this.pop_idle() else {
                    continue;
                };
                if this.core.evict(&slot) {
                    let engine: Arc<dyn Engine<T>> = this.clone();
                    spawn_destroy(&engine, slot);
                    continue;
                }
                let Some(borrower) = this.pending.pop() else {
                    Self::restore_idle(this, slot);
                    continue;
                };
                let _ = borrower.claim();
                let engine: Arc<dyn Engine<T>> = this.clone();
                schedule_delivery(&engine, borrower, slot);
            }

            missed = this.core.exit_drain(missed);
            if missed == 0 {
                break;
            }
        }
    }
}

impl<T: Send + 'static> Engine<T> for AffinityInner<T> {
    fn core(&self) -> &PoolCore<T> {
        &self.core
    }

    /// Recycled slots go home with the releasing thread.
    fn offer_idle(self: Arc<Self>, mut slot: Slot<T>) {
        let key = std::thread::current().id();
        slot.affinity = Some(key);
        self.subpools.entry(key).or_default().push(slot);
    }

    fn do_acquire(self: Arc<Self>, borrower: Arc<Borrower<T>>) {
        if self.core.is_terminated() {
            borrower.fail(PoolError::Shutdown);
            return;
        }
        if let Some(slot) = AffinityInner::try_fast_path(&self) {
            self.core.metrics().record_fast_path();
            let _ = borrower.claim();
            let engine: Arc<dyn Engine<T>> = self.clone();
            borrower.deliver(PooledRef::new(engine, slot));
            return;
        }
        self.core.metrics().record_slow_path();
        self.pending.push(borrower);
        if self.core.is_terminated() {
            self.fail_pending();
        }
        AffinityInner::drain(&self);
    }

    fn drain(self: Arc<Self>) {
        AffinityInner::drain(&self);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::errors::BoxError;
    use crate::eviction::EvictionPolicy;
    use crate::metrics::InMemoryMetricsRecorder;
    use crate::test_support::{TestResource, eventually, plain_config, test_config};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn threads_stick_to_their_own_resources() {
        let recorder = Arc::new(InMemoryMetricsRecorder::new());
        let (config, _counters) = plain_config(0, 3);
        let pool = AffinityPool::new(config.with_metrics_recorder(recorder.clone()))
            .await
            .unwrap();

        let barrier = Arc::new(Barrier::new(3));
        let mut workers = Vec::new();
        for _ in 0..3 {
            let pool = pool.clone();
            let barrier = barrier.clone();
            workers.push(std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                rt.block_on(async move {
                    let first = pool.acquire().await.unwrap();
                    let sticky_id = first.id;
                    // all three threads hold a resource before anyone
                    // releases, so each allocation stays with its thread
                    barrier.wait();
                    first.release().await.unwrap();

                    let mut hits = 0;
                    for _ in 0..10 {
                        let resource = pool.acquire().await.unwrap();
                        if resource.id == sticky_id {
                            hits += 1;
                        }
                        resource.release().await.unwrap();
                    }
                    hits
                })
            }));
        }

        for worker in workers {
            assert_eq!(worker.join().unwrap(), 10);
        }
        assert_eq!(recorder.fast_path_count(), 30);
        assert_eq!(recorder.slow_path_count(), 3);
    }

    #[tokio::test]
    async fn smoke_test() {
        let (config, counters) = test_config(2, 3);
        let pool = AffinityPool::new(config).await.unwrap();
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);

        let mut first = Vec::new();
        for _ in 0..3 {
            first.push(pool.acquire().await.unwrap());
        }
        assert_eq!(counters.created.load(Ordering::SeqCst), 3);
        assert_eq!(pool.status().idle_resources, 0);

        let second_tasks: Vec<_> = (0..3)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire().await.unwrap() })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for resource in first {
            resource.release().await.unwrap();
        }
        let second: Vec<_> = futures::future::join_all(second_tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();
        let mut ids: Vec<u32> = second.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(second.iter().all(|r| r.used_up == 1));

        for resource in second {
            resource.release().await.unwrap();
        }
        // second release tripped the eviction predicate
        eventually(|| counters.destroyed.load(Ordering::SeqCst) == 3).await;
        assert_eq!(pool.status().live_resources, 0);
    }

    #[tokio::test]
    async fn slot_handed_to_cancelled_borrower_is_released_again() {
        let (config, counters) = test_config(1, 1);
        let pool = AffinityPool::new(config).await.unwrap();

        let held = pool.acquire().await.unwrap();
        assert!(pool.acquire().now_or_never().is_none());
        assert_eq!(counters.released.load(Ordering::SeqCst), 0);

        held.release().await.unwrap();

        eventually(|| counters.released.load(Ordering::SeqCst) == 2).await;
        assert_eq!(pool.status().acquired_resources, 0);
    }

    #[tokio::test]
    async fn exhausted_resources_are_replaced_on_demand() {
        let created = Arc::new(AtomicU32::new(0));
        let destroyed = Arc::new(AtomicU32::new(0));
        let created_in_allocator = created.clone();
        let destroyed_in_handler = destroyed.clone();
        let config = PoolConfig::new(move || {
            let created = created_in_allocator.clone();
            async move {
                Ok::<_, BoxError>(TestResource::new(
                    created.fetch_add(1, Ordering::SeqCst) + 1,
                ))
            }
        })
        .with_size_max(3)
        .with_eviction_policy(EvictionPolicy::MaxAcquireCount(3))
        .with_destroy_handler(move |_resource| {
            let destroyed = destroyed_in_handler.clone();
            async move {
                destroyed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let pool = AffinityPool::new(config).await.unwrap();

        for _ in 0..10 {
            let resource = pool.acquire().await.unwrap();
            resource.release().await.unwrap();
        }

        // three resources worn out after three deliveries each, a fourth
        // allocated for the last round
        eventually(|| destroyed.load(Ordering::SeqCst) == 3).await;
        assert_eq!(created.load(Ordering::SeqCst), 4);
        assert_eq!(pool.status().live_resources, 1);
    }

    #[tokio::test]
    async fn fast_path_skips_and_destroys_stale_resources() {
        let created = Arc::new(AtomicU32::new(0));
        let destroyed = Arc::new(AtomicU32::new(0));
        let created_in_allocator = created.clone();
        let destroyed_in_handler = destroyed.clone();
        let config = PoolConfig::new(move || {
            let created = created_in_allocator.clone();
            async move {
                Ok::<_, BoxError>(TestResource::new(
                    created.fetch_add(1, Ordering::SeqCst) + 1,
                ))
            }
        })
        .with_size_max(1)
        .with_eviction_policy(EvictionPolicy::IdleTimeout(Duration::from_millis(10)))
        .with_destroy_handler(move |_resource| {
            let destroyed = destroyed_in_handler.clone();
            async move {
                destroyed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let pool = AffinityPool::new(config).await.unwrap();

        let resource = pool.acquire().await.unwrap();
        resource.release().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let replacement = pool.acquire().await.unwrap();
        assert_eq!(replacement.id, 2);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        replacement.release().await.unwrap();
    }

    #[tokio::test]
    async fn dispose_destroys_resources_in_every_partition() {
        let (config, counters) = plain_config(2, 2);
        let pool = AffinityPool::new(config).await.unwrap();

        // move one resource into this thread's partition
        let resource = pool.acquire().await.unwrap();
        resource.release().await.unwrap();
        assert_eq!(pool.status().idle_resources, 2);

        pool.dispose().await;
        assert!(pool.is_disposed());
        assert_eq!(counters.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().idle_resources, 0);
        assert_eq!(pool.status().live_resources, 0);
    }

    #[tokio::test]
    async fn dispose_fails_pending_borrowers() {
        let (config, _counters) = test_config(1, 1);
        let pool = AffinityPool::new(config).await.unwrap();
        let held = pool.acquire().await.unwrap();

        let pending = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.dispose().await;
        assert!(matches!(pending.await.unwrap(), Err(PoolError::Shutdown)));
        assert!(matches!(pool.acquire().await, Err(PoolError::Shutdown)));

        held.release().await.unwrap();
        assert_eq!(pool.status().live_resources, 0);
    }
}
