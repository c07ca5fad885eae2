//! Shared pool state and the seam between the two engines

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::runtime::Handle;

use crate::borrower::Borrower;
use crate::config::PoolConfig;
use crate::errors::PoolError;
use crate::metrics::MetricsRecorder;
use crate::slot::{PooledRef, Slot, destroy_slot};

/// State common to both engines: configuration, the permit and in-use
/// counters, the drain serializer and the shutdown latch.
///
/// Two counters on purpose. `live` bounds allocation (resources allocated and
/// not yet destroyed, including idle ones); `acquired` is the observable
/// in-use count (delivered and not yet released). A single counter cannot be
/// both: a release decrements before its slot reappears in the idle set, and
/// in that window a lone counter would let the drain over-allocate.
pub(crate) struct PoolCore<T> {
    pub(crate) config: PoolConfig<T>,
    live: AtomicUsize,
    acquired: AtomicUsize,
    wip: AtomicUsize,
    terminated: AtomicBool,
    handle: Handle,
}

impl<T> PoolCore<T> {
    /// Captures the ambient tokio runtime; pools must be built inside one.
    pub(crate) fn new(config: PoolConfig<T>) -> Self {
        Self {
            config,
            live: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
            wip: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
            handle: Handle::current(),
        }
    }

    pub(crate) fn metrics(&self) -> &dyn MetricsRecorder {
        self.config.metrics_recorder.as_ref()
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Reserve capacity for one new resource.
    pub(crate) fn try_acquire_permit(&self) -> bool {
        let mut current = self.live.load(Ordering::Acquire);
        while current < self.config.size_max {
            match self.live.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    pub(crate) fn return_permit(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn remaining_permits(&self) -> usize {
        self.config
            .size_max
            .saturating_sub(self.live.load(Ordering::Acquire))
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn mark_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_acquired(&self) {
        self.acquired.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn acquired_count(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Flip the shutdown latch; true for the caller that made the transition.
    pub(crate) fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn evict(&self, slot: &Slot<T>) -> bool {
        match &self.config.eviction_predicate {
            Some(predicate) => (**predicate)(&slot.value, &slot.metrics),
            None => false,
        }
    }

    /// WIP gate: true means the caller owns the drain loop; false means an
    /// active drainer will observe the increment and loop again.
    pub(crate) fn enter_drain(&self) -> bool {
        self.wip.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Returns the number of kicks that arrived while draining; zero means
    /// the loop may exit.
    pub(crate) fn exit_drain(&self, missed: usize) -> usize {
        self.wip.fetch_sub(missed, Ordering::AcqRel) - missed
    }
}

/// Seam between the shared substrate and the two engines. `PooledRef` and
/// `Acquire` route through this so slots and borrowers need not know which
/// engine owns them.
pub(crate) trait Engine<T: Send + 'static>: Send + Sync {
    fn core(&self) -> &PoolCore<T>;

    /// Put a recycled or restored slot back into the idle set.
    fn offer_idle(self: Arc<Self>, slot: Slot<T>);

    /// Register a freshly subscribed borrower.
    fn do_acquire(self: Arc<Self>, borrower: Arc<Borrower<T>>);

    /// Kick the drain.
    fn drain(self: Arc<Self>);
}

/// Run the allocator as a detached task. The borrower may be cancelled while
/// the allocator runs; the allocator still completes and the resource is
/// bounced through the release path by the failed delivery. Allocations that
/// finish after shutdown are destroyed.
pub(crate) fn spawn_allocation<T: Send + 'static>(
    engine: Arc<dyn Engine<T>>,
    borrower: Arc<Borrower<T>>,
) {
    let handle = engine.core().handle().clone();
    handle.spawn(async move {
        let start = Instant::now();
        let allocation = (*engine.core().config.allocator)();
        match allocation.await {
            Ok(value) => {
                engine
                    .core()
                    .metrics()
                    .record_allocation_success_and_latency(start.elapsed());
                let slot = Slot::new(value);
                if engine.core().is_terminated() {
                    destroy_slot(&engine, slot).await;
                    borrower.fail(PoolError::Shutdown);
                } else {
                    borrower.deliver(PooledRef::new(engine.clone(), slot));
                }
            }
            Err(err) => {
                engine
                    .core()
                    .metrics()
                    .record_allocation_failure_and_latency(start.elapsed());
                engine.core().return_permit();
                borrower.fail(PoolError::Allocation(err));
                engine.drain();
            }
        }
    });
}

/// Complete a handover, either inline on the draining thread or re-scheduled
/// on the configured acquisition runtime.
pub(crate) fn schedule_delivery<T: Send + 'static>(
    engine: &Arc<dyn Engine<T>>,
    borrower: Arc<Borrower<T>>,
    slot: Slot<T>,
) {
    match engine.core().config.acquisition_scheduler.clone() {
        Some(scheduler) => {
            let engine = engine.clone();
            scheduler.spawn(async move {
                borrower.deliver(PooledRef::new(engine, slot));
            });
        }
        None => borrower.deliver(PooledRef::new(engine.clone(), slot)),
    }
}

/// Destroy a slot from a synchronous context (the drain).
pub(crate) fn spawn_destroy<T: Send + 'static>(engine: &Arc<dyn Engine<T>>, slot: Slot<T>) {
    let engine = engine.clone();
    let handle = engine.core().handle().clone();
    handle.spawn(async move {
        destroy_slot(&engine, slot).await;
    });
}
