use crate::app::{CollectorApp, CollectorControl, CollectorStats};
use crate::forward::Forwarder;
use crate::storage::StatsStorage;
use apm_core::{ApmError, Delivery, PoolConfig, Result, SharedClock, TickerPool, WorkerPool};
use apm_types::{Point, TimeBounds, DEFAULT_MAX_AGE_SECS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 采集端服务
///
/// 首次见到某应用的数据点时创建其工作者，定时刷出到期分钟。
pub struct Collector {
    pool: Arc<WorkerPool<CollectorApp>>,
    storage: Arc<dyn StatsStorage>,
    forwarder: Arc<Forwarder>,
    clock: SharedClock,
    defer_secs: i64,
    bounds: TimeBounds,
}

impl Collector {
    pub fn new(
        defer_secs: i64,
        pool_config: PoolConfig,
        ticker: Arc<TickerPool>,
        storage: Arc<dyn StatsStorage>,
        forwarder: Arc<Forwarder>,
        clock: SharedClock,
    ) -> Self {
        Self {
            pool: Arc::new(WorkerPool::new("collector", pool_config, ticker)),
            storage,
            forwarder,
            clock,
            defer_secs,
            bounds: TimeBounds::new(defer_secs, DEFAULT_MAX_AGE_SECS),
        }
    }

    /// 覆盖可接受的时间戳范围
    pub fn with_bounds(mut self, bounds: TimeBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn pool(&self) -> &Arc<WorkerPool<CollectorApp>> {
        &self.pool
    }

    pub fn forwarder(&self) -> &Arc<Forwarder> {
        &self.forwarder
    }

    /// 接收一个数据点
    ///
    /// 形状不符或时间戳越界的数据点在入队前拒绝。
    pub async fn collect(&self, point: Point) -> Result<Delivery> {
        point.check_shape().map_err(ApmError::InvalidInput)?;
        point
            .check_time(self.clock.now(), &self.bounds)
            .map_err(ApmError::InvalidInput)?;

        let app = point.entity.app_name.clone();
        let delivery = self
            .pool
            .dispatch_or_spawn(&app, point, || {
                CollectorApp::new(
                    app.clone(),
                    self.defer_secs,
                    self.clock.clone(),
                    self.storage.clone(),
                    self.forwarder.clone(),
                )
                .with_bounds(self.bounds)
            })
            .await;
        Ok(delivery)
    }

    /// 批量接收，返回入队数量
    pub async fn collect_all(&self, points: Vec<Point>) -> usize {
        let mut queued = 0;
        for point in points {
            match self.collect(point).await {
                Ok(Delivery::Queued) => queued += 1,
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Point rejected"),
            }
        }
        queued
    }

    pub async fn stats(&self, app_name: &str) -> Option<CollectorStats> {
        let (tx, rx) = oneshot::channel();
        if !self.pool.control(app_name, CollectorControl::Stats(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    /// 启动空闲回收
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        info!(defer_secs = self.defer_secs, "Collector started");
        self.pool.start_sweeper(self.pool.ticker().interval())
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        info!("Collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::transport::InProcessTransport;
    use apm_core::{ConsistentHashRouter, ManualClock};
    use apm_types::{Counters, EntityKey, HeapUsage, MetricFamily};

    #[tokio::test]
    async fn test_collect_spawns_per_app() {
        let router = Arc::new(ConsistentHashRouter::new(16, ["eval-1"]));
        let collector = Collector::new(
            120,
            PoolConfig::default(),
            Arc::new(TickerPool::new(Duration::from_secs(3600), 1)),
            Arc::new(MemoryStorage::new()),
            Arc::new(Forwarder::new(router, Arc::new(InProcessTransport::new()))),
            Arc::new(ManualClock::new(1_700_000_040)),
        );

        let points = ["shop", "cart", "shop"]
            .iter()
            .map(|app| {
                Point::new(
                    EntityKey::api(*app, "/pay"),
                    MetricFamily::Api,
                    1_700_000_040,
                    Counters::new(1, 0, 1).into(),
                )
            })
            .collect();
        assert_eq!(collector.collect_all(points).await, 3);
        assert_eq!(collector.pool().len().await, 2);

        let stats = collector.stats("shop").await.unwrap();
        assert_eq!(stats.minutes, 1);
        assert!(collector.stats("missing").await.is_none());

        collector.shutdown().await;
        assert!(collector.pool().is_empty().await);
    }

    #[tokio::test]
    async fn test_collect_rejects_invalid_points() {
        let router = Arc::new(ConsistentHashRouter::new(16, ["eval-1"]));
        let collector = Collector::new(
            120,
            PoolConfig::default(),
            Arc::new(TickerPool::new(Duration::from_secs(3600), 1)),
            Arc::new(MemoryStorage::new()),
            Arc::new(Forwarder::new(router, Arc::new(InProcessTransport::new()))),
            Arc::new(ManualClock::new(1_700_000_040)),
        );
        let api = |minute, sample| {
            Point::new(EntityKey::api("shop", "/pay"), MetricFamily::Api, minute, sample)
        };

        let wrong_shape = api(1_700_000_040, HeapUsage::new(1, 1).into());
        assert!(matches!(
            collector.collect(wrong_shape).await,
            Err(ApmError::InvalidInput(_))
        ));
        let next_year = api(1_700_000_040 + 365 * 86_400, Counters::new(1, 0, 1).into());
        assert!(matches!(
            collector.collect(next_year).await,
            Err(ApmError::InvalidInput(_))
        ));
        let extreme = api(i64::MAX - i64::MAX.rem_euclid(60), Counters::new(1, 0, 1).into());
        tokio_test::assert_err!(collector.collect(extreme).await);
        assert!(collector.pool().is_empty().await);

        let points = vec![
            api(1_700_000_040, Counters::new(1, 0, 1).into()),
            api(i64::MAX - 7, Counters::new(1, 0, 1).into()),
        ];
        assert_eq!(collector.collect_all(points).await, 1);
        assert_eq!(collector.pool().len().await, 1);
        collector.shutdown().await;
    }
}
