//! Thread-affinity engine: each thread keeps finding the resources it
//! released before.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use flowpool::{AffinityPool, BoxError, InMemoryMetricsRecorder, PoolConfig};

#[tokio::main]
async fn main() {
    let recorder = Arc::new(InMemoryMetricsRecorder::new());
    let next_id = Arc::new(AtomicU32::new(0));

    let allocator_ids = next_id.clone();
    let config = PoolConfig::new(move || {
        let ids = allocator_ids.clone();
        async move { Ok::<_, BoxError>(format!("resource-{}", ids.fetch_add(1, Ordering::SeqCst))) }
    })
    .with_size_max(2)
    .with_metrics_recorder(recorder.clone());

    let pool = AffinityPool::new(config).await.expect("pool construction");

    let mut workers = Vec::new();
    for worker_index in 0..2 {
        let pool = pool.clone();
        workers.push(std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("worker runtime");
            rt.block_on(async move {
                let first = pool.acquire().await.expect("acquire");
                let mine = (*first).clone();
                first.release().await.expect("release");

                for round in 0..5 {
                    let resource = pool.acquire().await.expect("acquire");
                    println!(
                        "worker {worker_index} round {round}: {} (sticky: {})",
                        *resource,
                        *resource == mine
                    );
                    resource.release().await.expect("release");
                }
            });
        }));
    }
    for worker in workers {
        worker.join().expect("worker thread");
    }

    println!(
        "fast path hits: {}, slow path: {}",
        recorder.fast_path_count(),
        recorder.slow_path_count()
    );

    pool.dispose().await;
}
