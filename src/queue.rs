//! Queue engine: central MPSC queues reconciled by a lock-free drain

use std::sync::Arc;
use std::time::Instant;

use crossbeam::queue::{ArrayQueue, SegQueue};

use crate::borrower::{Acquire, Borrower};
use crate::config::PoolConfig;
use crate::core::{Engine, PoolCore, schedule_delivery, spawn_allocation, spawn_destroy};
use crate::errors::{PoolError, PoolResult};
use crate::health::PoolStatus;
use crate::slot::{Slot, destroy_slot};

/// Pool engine built on one central idle queue and one central pending queue.
///
/// Enqueues are concurrent; dequeues happen only inside the drain, which is
/// serialized by the work-in-progress counter. Pending borrowers are served
/// in FIFO order, modulo cancellation-induced skips. The thread completing a
/// handover is whichever thread runs the matching drain: the acquirer, a
/// releaser, or the allocator task.
pub struct QueuePool<T: Send + 'static> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Send + 'static> std::fmt::Debug for QueuePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePool").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Clone for QueuePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct QueueInner<T: Send + 'static> {
    core: PoolCore<T>,
    idle: ArrayQueue<Slot<T>>,
    pending: SegQueue<Arc<Borrower<T>>>,
}

impl<T: Send + 'static> QueuePool<T> {
    /// Build the pool and allocate `initial_size` resources eagerly. Any
    /// allocation failure destroys what was already created and fails
    /// construction. Must be called within a tokio runtime.
    pub async fn new(config: PoolConfig<T>) -> PoolResult<Self> {
        let idle_capacity = config.size_max.max(2);
        let initial = config.initial_size.min(config.size_max);
        let inner = Arc::new(QueueInner {
            core: PoolCore::new(config),
            idle: ArrayQueue::new(idle_capacity),
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
                    let _ = inner.idle.push(Slot::new(value));
                }
                Err(err) => {
                    inner
                        .core
                        .metrics()
                        .record_allocation_failure_and_latency(start.elapsed());
                    inner.core.return_permit();
                    let engine: Arc<dyn Engine<T>> = inner.clone();
                    while let Some(slot) = inner.idle.pop() {
                        destroy_slot(&engine, slot).await;
                    }
                    return Err(PoolError::Allocation(err));
                }
            }
        }

        Ok(Self { inner })
    }

    /// Request a resource. The returned future registers the request on its
    /// first poll and can be dropped at any time to cancel it.
    pub fn acquire(&self) -> Acquire<T> {
        Acquire::new(self.inner.clone())
    }

    /// Shut the pool down: fail every pending borrower, destroy every idle
    /// resource. Resources out with borrowers are destroyed on their release.
    /// Idempotent.
    pub async fn dispose(&self) {
        if self.inner.core.terminate() {
            self.inner.fail_pending();
            let engine: Arc<dyn Engine<T>> = self.inner.clone();
            while let Some(slot) = self.inner.idle.pop() {
                destroy_slot(&engine, slot).await;
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.is_terminated()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus::new(
            self.inner.idle.len(),
            self.inner.core.acquired_count(),
            self.inner.core.live_count(),
            self.inner.core.config.size_max,
            self.inner.core.is_terminated(),
        )
    }
}

impl<T: Send + 'static> QueueInner<T> {
    fn fail_pending(&self) {
        while let Some(borrower) = self.pending.pop() {
            borrower.fail(PoolError::Shutdown);
        }
    }

    fn drain(this: &Arc<Self>) {
        if this.core.enter_drain() {
            Self::drain_loop(this);
        }
    }

    /// One pairing attempt per missed kick. Every event (acquire, release,
    /// freed permit) kicks the WIP counter once, so each event gets at most
    /// one pairing; `continue` retries within the same kick.
    fn drain_loop(this: &Arc<Self>) {
        let mut missed = 1;
        loop {
            let idle_count = this.idle.len();
            let pending_count = this.pending.len();
            let permits = this.core.remaining_permits();

            if idle_count == 0 {
                if pending_count > 0 && permits > 0 {
                    let Some(borrower) = this.pending.pop() else {
                        continue;
                    };
                    if !borrower.claim() {
                        // cancelled or failed while queued
                        continue;
                    }
                    if this.core.try_acquire_permit() {
                        let engine: Arc<dyn Engine<T>> = this.clone();
                        spawn_allocation(engine, borrower);
                    } else {
                        // lost the permit race; back of the queue, not dropped
                        borrower.unclaim();
                        this.pending.push(borrower);
                    }
                }
            } else if pending_count > 0 {
                let Some(slot) = this.idle.pop() else {
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
                // Deliver even when the claim is lost to a cancellation: the
                // failed delivery bounces the slot through the release path,
                // which is what keeps the accounting exact.
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

    fn restore_idle(this: &Arc<Self>, slot: Slot<T>) {
        if let Err(slot) = this.idle.push(slot) {
            // more live resources than capacity; the surplus is destroyed
            let engine: Arc<dyn Engine<T>> = this.clone();
            spawn_destroy(&engine, slot);
        }
    }
}

impl<T: Send + 'static> Engine<T> for QueueInner<T> {
    fn core(&self) -> &PoolCore<T> {
        &self.core
    }

    fn offer_idle(self: Arc<Self>, slot: Slot<T>) {
        QueueInner::restore_idle(&self, slot);
    }

    fn do_acquire(self: Arc<Self>, borrower: Arc<Borrower<T>>) {
        if self.core.is_terminated() {
            borrower.fail(PoolError::Shutdown);
            return;
        }
        self.pending.push(borrower);
        if self.core.is_terminated() {
            // dispose raced the enqueue; sweep the queue again
            self.fail_pending();
        }
        QueueInner::drain(&self);
    }

    fn drain(self: Arc<Self>) {
        QueueInner::drain(&self);
    }
}
