//! Helpers shared by the engine tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::PoolConfig;
use crate::errors::BoxError;

/// Resource that counts how often it was cleaned, and reports unhealthy
/// after two uses.
#[derive(Debug)]
pub(crate) struct TestResource {
    pub id: u32,
    pub used_up: u32,
}

impl TestResource {
    pub fn new(id: u32) -> Self {
        Self { id, used_up: 0 }
    }

    pub fn clean(&mut self) {
        self.used_up += 1;
    }

    pub fn is_healthy(&self) -> bool {
        self.used_up < 2
    }
}

#[derive(Clone)]
pub(crate) struct Counters {
    pub created: Arc<AtomicU32>,
    pub released: Arc<AtomicU32>,
    pub destroyed: Arc<AtomicU32>,
}

impl Counters {
    fn new() -> Self {
        Self {
            created: Arc::new(AtomicU32::new(0)),
            released: Arc::new(AtomicU32::new(0)),
            destroyed: Arc::new(AtomicU32::new(0)),
        }
    }
}

fn counting_config(
    initial: usize,
    max: usize,
    allocator_delay: Option<Duration>,
) -> (PoolConfig<TestResource>, Counters) {
    let counters = Counters::new();
    let created = counters.created.clone();
    let released = counters.released.clone();
    let destroyed = counters.destroyed.clone();

    let config = PoolConfig::new(move || {
        let created = created.clone();
        async move {
            if let Some(delay) = allocator_delay {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, BoxError>(TestResource::new(created.fetch_add(1, Ordering::SeqCst) + 1))
        }
    })
    .with_initial_size(initial)
    .with_size_max(max)
    .with_release_handler(move |resource: &mut TestResource| {
        let released = released.clone();
        Box::pin(async move {
            resource.clean();
            released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
    .with_destroy_handler(move |_resource| {
        let destroyed = destroyed.clone();
        async move {
            destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    (config, counters)
}

/// Config with the unhealthy-after-two-uses eviction predicate.
pub(crate) fn test_config(initial: usize, max: usize) -> (PoolConfig<TestResource>, Counters) {
    let (config, counters) = counting_config(initial, max, None);
    (
        config.with_eviction_predicate(|resource, _| !resource.is_healthy()),
        counters,
    )
}

/// Config like [`test_config`] but with a slow allocator.
pub(crate) fn test_config_delayed(
    initial: usize,
    max: usize,
    delay: Duration,
) -> (PoolConfig<TestResource>, Counters) {
    let (config, counters) = counting_config(initial, max, Some(delay));
    (
        config.with_eviction_predicate(|resource, _| !resource.is_healthy()),
        counters,
    )
}

/// Config without any eviction: resources are recycled forever.
pub(crate) fn plain_config(initial: usize, max: usize) -> (PoolConfig<TestResource>, Counters) {
    counting_config(initial, max, None)
}

/// Poll `condition` until it holds, panicking after two seconds.
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}
