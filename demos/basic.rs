//! Basic usage of the queue engine

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use flowpool::{BoxError, InMemoryMetricsRecorder, MetricsExporter, Pool, PoolConfig};

#[tokio::main]
async fn main() {
    println!("=== flowpool - Basic Examples ===\n");

    let recorder = Arc::new(InMemoryMetricsRecorder::new());
    let next_id = Arc::new(AtomicU32::new(0));

    let allocator_ids = next_id.clone();
    let config = PoolConfig::new(move || {
        let ids = allocator_ids.clone();
        async move { Ok::<_, BoxError>(format!("conn-{}", ids.fetch_add(1, Ordering::SeqCst))) }
    })
    .with_initial_size(2)
    .with_size_max(4)
    .with_metrics_recorder(recorder.clone());

    let pool = Pool::from_config(config).await.expect("pool construction");

    println!("1. Acquire and release:");
    {
        let conn = pool.acquire().await.expect("acquire");
        println!("   got {}", *conn);
        conn.release().await.expect("release");
    }
    println!("   idle after return: {}\n", pool.status().idle_resources);

    println!("2. Growing on demand:");
    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.acquire().await.expect("acquire"));
    }
    println!("   acquired {} resources, live = {}", held.len(), pool.status().live_resources);
    for conn in held {
        conn.release().await.expect("release");
    }
    println!("   all returned, idle = {}\n", pool.status().idle_resources);

    println!("3. Status and metrics:");
    let status = pool.status();
    println!("   healthy: {}", status.is_healthy());
    println!("   utilization: {:.1}%", status.utilization * 100.0);
    println!();
    print!(
        "{}",
        MetricsExporter::export_prometheus(&recorder.snapshot(), "demo_pool", None)
    );

    pool.dispose().await;
    println!("\n4. Disposed: {}", pool.is_disposed());
}
