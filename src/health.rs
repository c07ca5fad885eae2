//! Point-in-time status snapshots for pools

/// Snapshot of a pool's resource accounting.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Resources sitting in the idle set
    pub idle_resources: usize,

    /// Resources delivered to borrowers and not yet released
    pub acquired_resources: usize,

    /// Resources allocated and not yet destroyed (idle + acquired + in handoff)
    pub live_resources: usize,

    /// Configured capacity bound
    pub max_size: usize,

    /// `live_resources / max_size`, 0.0 to 1.0
    pub utilization: f64,

    /// Whether the pool has been disposed
    pub is_terminated: bool,

    /// Human-readable warnings
    pub warnings: Vec<String>,
}

impl PoolStatus {
    pub(crate) fn new(
        idle: usize,
        acquired: usize,
        live: usize,
        max_size: usize,
        is_terminated: bool,
    ) -> Self {
        let utilization = if max_size > 0 {
            live as f64 / max_size as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        if is_terminated {
            warnings.push("pool has been shut down".to_string());
        }
        if utilization > 0.9 && idle == 0 {
            warnings.push(format!(
                "pool saturated: {:.1}% of capacity in use with no idle resources",
                utilization * 100.0
            ));
        }

        Self {
            idle_resources: idle,
            acquired_resources: acquired,
            live_resources: live,
            max_size,
            utilization,
            is_terminated,
            warnings,
        }
    }

    /// A pool is healthy while it is running and not saturated.
    pub fn is_healthy(&self) -> bool {
        self.warnings.is_empty()
    }
}
