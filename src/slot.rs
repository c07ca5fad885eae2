//! Resource slots and the exclusive reference handed to borrowers

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crate::core::Engine;
use crate::errors::{PoolError, PoolResult};

/// Lifecycle counters for one pooled resource, published to the borrower and
/// to the eviction predicate.
#[derive(Debug, Clone, Copy)]
pub struct SlotMetrics {
    created_at: Instant,
    acquire_count: u32,
    last_release: Option<Instant>,
}

impl SlotMetrics {
    pub(crate) fn new() -> Self {
        Self {
            created_at: Instant::now(),
            acquire_count: 0,
            last_release: None,
        }
    }

    /// How many times this resource has been delivered to a borrower.
    pub fn acquire_count(&self) -> u32 {
        self.acquire_count
    }

    /// Time since the resource was allocated.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the resource was last released, or since allocation if it
    /// has never been released.
    pub fn idle_time(&self) -> Duration {
        match self.last_release {
            Some(released) => released.elapsed(),
            None => self.created_at.elapsed(),
        }
    }

    pub(crate) fn mark_acquired(&mut self) {
        self.acquire_count += 1;
    }

    pub(crate) fn mark_released(&mut self) {
        self.last_release = Some(Instant::now());
    }
}

/// One live resource together with its metrics. Ownership of the slot is the
/// lifecycle state: it sits in an idle queue, travels inside a [`PooledRef`],
/// or is consumed by the destroy pipeline.
pub(crate) struct Slot<T> {
    pub(crate) value: T,
    pub(crate) metrics: SlotMetrics,
    pub(crate) affinity: Option<ThreadId>,
}

impl<T> Slot<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value,
            metrics: SlotMetrics::new(),
            affinity: None,
        }
    }
}

/// Exclusive reference to a pooled resource.
///
/// Dereferences to the resource. Returning it to the pool is explicit via
/// [`release`](PooledRef::release) (which surfaces release-handler errors) or
/// implicit on drop, in which case the release runs detached and failures are
/// logged.
pub struct PooledRef<T: Send + 'static> {
    slot: Option<Slot<T>>,
    engine: Arc<dyn Engine<T>>,
}

impl<T: Send + 'static> PooledRef<T> {
    /// Commits a slot to a borrower: bumps the acquire counters and publishes
    /// the metrics before the reference becomes visible.
    pub(crate) fn new(engine: Arc<dyn Engine<T>>, mut slot: Slot<T>) -> Self {
        slot.metrics.mark_acquired();
        engine.core().mark_acquired();
        Self {
            slot: Some(slot),
            engine,
        }
    }

    /// Lifecycle counters of the underlying resource.
    pub fn metrics(&self) -> SlotMetrics {
        self.slot.as_ref().expect("slot already taken").metrics
    }

    /// Run the release handler and hand the resource back for recycling or
    /// eviction. Errors from the release handler destroy the resource and are
    /// surfaced to the caller.
    pub async fn release(mut self) -> PoolResult<()> {
        let slot = self.slot.take().expect("slot already taken");
        let engine = self.engine.clone();
        release_slot(engine, slot).await
    }

    /// Destroy the resource unconditionally. Use when the resource is known
    /// to be broken.
    pub async fn invalidate(mut self) {
        let slot = self.slot.take().expect("slot already taken");
        let engine = self.engine.clone();
        engine.core().release_acquired();
        destroy_slot(&engine, slot).await;
    }
}

impl<T: Send + 'static> Deref for PooledRef<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.slot.as_ref().expect("slot already taken").value
    }
}

impl<T: Send + 'static> DerefMut for PooledRef<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot.as_mut().expect("slot already taken").value
    }
}

impl<T: Send + 'static> Drop for PooledRef<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let engine = self.engine.clone();
            self.engine.core().handle().spawn(async move {
                if let Err(err) = release_slot(engine, slot).await {
                    tracing::warn!(error = %err, "release failed while returning a dropped pooled reference");
                }
            });
        }
    }
}

/// Shared release path: decrement the in-use count exactly once, run the
/// release handler, then recycle or destroy. Post-shutdown releases skip the
/// handler and go straight to destruction.
pub(crate) async fn release_slot<T: Send + 'static>(
    engine: Arc<dyn Engine<T>>,
    mut slot: Slot<T>,
) -> PoolResult<()> {
    let core = engine.core();
    core.release_acquired();

    if core.is_terminated() {
        destroy_slot(&engine, slot).await;
        return Ok(());
    }

    let start = Instant::now();
    if let Some(handler) = core.config.release_handler.clone() {
        if let Err(err) = (*handler)(&mut slot.value).await {
            core.metrics().record_reset_latency(start.elapsed());
            destroy_slot(&engine, slot).await;
            return Err(PoolError::ReleaseHandler(err));
        }
    }
    core.metrics().record_reset_latency(start.elapsed());
    slot.metrics.mark_released();

    if core.evict(&slot) {
        destroy_slot(&engine, slot).await;
    } else {
        core.metrics().record_recycled();
        engine.clone().offer_idle(slot);
        engine.drain();
    }
    Ok(())
}

/// Shared destroy pipeline: run the finalizer (failures are logged, never
/// propagated), return the permit, and kick the drain so a pending borrower
/// can use the freed capacity.
pub(crate) async fn destroy_slot<T: Send + 'static>(engine: &Arc<dyn Engine<T>>, slot: Slot<T>) {
    let core = engine.core();
    let start = Instant::now();
    if let Some(handler) = core.config.destroy_handler.clone() {
        if let Err(err) = (*handler)(slot.value).await {
            tracing::warn!(error = %err, "destroy handler failed, resource dropped anyway");
        }
    }
    core.metrics().record_destroy_latency(start.elapsed());
    core.return_permit();
    engine.clone().drain();
}
