use crate::cache::MinuteCache;
use crate::forward::Forwarder;
use crate::storage::StatsStorage;
use apm_core::{EntityWorker, SharedClock};
use apm_types::{Point, TimeBounds, DEFAULT_MAX_AGE_SECS};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// 采集端应用状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// 缓存中的分钟数
    pub minutes: usize,
    pub entries: usize,
    /// 已转发的分钟数
    pub flushed: u64,
    /// 形状不匹配或时间越界而丢弃的数据点
    pub rejected: u64,
}

pub enum CollectorControl {
    Stats(oneshot::Sender<CollectorStats>),
}

/// 单个应用的一级聚合工作者
pub struct CollectorApp {
    app_name: String,
    cache: MinuteCache,
    defer_secs: i64,
    bounds: TimeBounds,
    clock: SharedClock,
    storage: Arc<dyn StatsStorage>,
    forwarder: Arc<Forwarder>,
    flushed: u64,
    rejected: u64,
}

impl CollectorApp {
    pub fn new(
        app_name: impl Into<String>,
        defer_secs: i64,
        clock: SharedClock,
        storage: Arc<dyn StatsStorage>,
        forwarder: Arc<Forwarder>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            cache: MinuteCache::new(),
            defer_secs,
            bounds: TimeBounds::new(defer_secs, DEFAULT_MAX_AGE_SECS),
            clock,
            storage,
            forwarder,
            flushed: 0,
            rejected: 0,
        }
    }

    /// 覆盖默认的时间戳范围（未来不超过延迟窗口，过去不超过一天）
    pub fn with_bounds(mut self, bounds: TimeBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn cache(&self) -> &MinuteCache {
        &self.cache
    }

    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            minutes: self.cache.len(),
            entries: self.cache.entry_count(),
            flushed: self.flushed,
            rejected: self.rejected,
        }
    }

    /// 刷出所有到期的分钟，从旧到新
    ///
    /// 存储失败时放弃本轮，分钟留在缓存中等待下一轮；
    /// 存储成功后转发并移除，转发失败只记录日志。
    pub async fn flush(&mut self, now: i64) -> usize {
        let mut flushed = 0;

        for minute in self.cache.due(now, self.defer_secs) {
            let Some(summary) = self.cache.summary(&self.app_name, minute) else {
                continue;
            };

            if let Err(e) = self.storage.persist(&summary).await {
                warn!(app = %self.app_name, minute, error = %e, "Persist failed, flush abandoned for this tick");
                break;
            }

            if let Err(e) = self.forwarder.forward(&summary).await {
                warn!(app = %self.app_name, minute, error = %e, "Summary not forwarded");
            }

            self.cache.remove(minute);
            self.flushed += 1;
            flushed += 1;
        }

        if flushed > 0 {
            debug!(app = %self.app_name, flushed, remaining = self.cache.len(), "Minutes flushed");
        }
        flushed
    }
}

#[async_trait]
impl EntityWorker for CollectorApp {
    type Input = Point;
    type Control = CollectorControl;

    fn ingest(&mut self, input: Point) {
        // 越界的分钟永远不会到期，会让工作者无法空闲
        if let Err(e) = input.check_time(self.clock.now(), &self.bounds) {
            self.rejected += 1;
            debug!(app = %self.app_name, entity = %input.entity, error = %e, "Point dropped");
            return;
        }
        if !self.cache.merge(&input) {
            self.rejected += 1;
            debug!(app = %self.app_name, entity = %input.entity, "Point shape mismatch, dropped");
        }
    }

    fn apply(&mut self, control: CollectorControl) {
        match control {
            CollectorControl::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    async fn tick(&mut self) {
        let now = self.clock.now();
        self.flush(now).await;
    }

    fn is_idle(&self) -> bool {
        self.cache.is_empty()
    }
}
