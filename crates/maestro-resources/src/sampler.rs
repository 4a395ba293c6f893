use crate::pool::ResourcePool;
use crate::types::{Dimension, ResourceSpec};
use async_trait::async_trait;
use maestro_core::{EventBus, EventKind, MaestroResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Usage fraction above which a dimension is flagged as running hot.
pub const HIGH_WATERMARK: f64 = 0.8;
/// Usage fraction below which a dimension is flagged for rebalancing.
pub const LOW_WATERMARK: f64 = 0.3;
/// Default sampling cadence.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Measurement seam for the sampler.
///
/// The default [`BookedUsageProbe`] reflects the pool's own ledger; hosts
/// that can measure real consumption plug in their own implementation.
#[async_trait]
pub trait UsageProbe: Send + Sync {
    /// Samples current usage per dimension.
    async fn sample(&self) -> MaestroResult<ResourceSpec>;
}

/// Probe that reports the pool's booked usage as-is.
pub struct BookedUsageProbe {
    pool: Arc<ResourcePool>,
}

impl BookedUsageProbe {
    /// Creates a probe over the given pool.
    pub fn new(pool: Arc<ResourcePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageProbe for BookedUsageProbe {
    async fn sample(&self) -> MaestroResult<ResourceSpec> {
        Ok(self.pool.usage())
    }
}

/// Extension point invoked when dimensions sit below [`LOW_WATERMARK`].
///
/// The default [`NoopRebalance`] does nothing; contention handling and
/// capacity reshuffling belong to the host, not the core.
#[async_trait]
pub trait RebalanceStrategy: Send + Sync {
    /// Reacts to underutilized dimensions.
    async fn rebalance(&self, pool: &ResourcePool, underutilized: &[Dimension]);
}

/// Safe default: log and do nothing.
pub struct NoopRebalance;

#[async_trait]
impl RebalanceStrategy for NoopRebalance {
    async fn rebalance(&self, _pool: &ResourcePool, underutilized: &[Dimension]) {
        debug!(dimensions = ?underutilized, "rebalance candidates (no-op)");
    }
}

/// Periodic usage sampler.
///
/// On a fixed cadence, re-measures usage through the probe and publishes
/// a `resource.warning` event per dimension above [`HIGH_WATERMARK`];
/// dimensions below [`LOW_WATERMARK`] (with a nonzero limit and nonzero
/// booked usage overall) are handed to the rebalance strategy and a
/// single `resource.rebalance` event is published.
pub struct ResourceSampler {
    pool: Arc<ResourcePool>,
    probe: Arc<dyn UsageProbe>,
    strategy: Arc<dyn RebalanceStrategy>,
    bus: EventBus,
    interval: Duration,
}

impl ResourceSampler {
    /// Creates a sampler with the default probe, strategy, and cadence.
    pub fn new(pool: Arc<ResourcePool>, bus: EventBus) -> Self {
        let probe = Arc::new(BookedUsageProbe::new(pool.clone()));
        Self {
            pool,
            probe,
            strategy: Arc::new(NoopRebalance),
            bus,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Replaces the usage probe.
    pub fn with_probe(mut self, probe: Arc<dyn UsageProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replaces the rebalance strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn RebalanceStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Overrides the sampling cadence.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one sampling pass. Exposed for tests and on-demand checks.
    pub async fn sample_once(&self) {
        let usage = match self.probe.sample().await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "usage probe failed, skipping sample");
                return;
            }
        };

        let limits = self.pool.limits();
        let mut underutilized = Vec::new();

        for dim in Dimension::ALL {
            let limit = limits.get(dim);
            if limit == 0 {
                continue;
            }
            let ratio = usage.get(dim) as f64 / limit as f64;
            if ratio > HIGH_WATERMARK {
                warn!(dimension = %dim, ratio, "resource usage above high watermark");
                self.bus.emit(
                    EventKind::ResourceWarning,
                    serde_json::json!({
                        "dimension": dim.to_string(),
                        "usage": usage.get(dim),
                        "limit": limit,
                        "ratio": ratio,
                    }),
                );
            } else if ratio < LOW_WATERMARK && usage.get(dim) > 0 {
                underutilized.push(dim);
            }
        }

        if !underutilized.is_empty() {
            self.strategy.rebalance(&self.pool, &underutilized).await;
            self.bus.emit(
                EventKind::ResourceRebalance,
                serde_json::json!({
                    "dimensions": underutilized
                        .iter()
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>(),
                }),
            );
        }
    }

    /// Starts the sampling loop on the runtime.
    ///
    /// Returns the [`JoinHandle`] so the caller can abort it on shutdown.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // First tick fires immediately; skip it so the cadence counts
            // from startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sample_once().await;
            }
        })
    }
}
