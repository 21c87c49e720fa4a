use crate::alarm::RateLimit;
use crate::evaluator::{AlertEvaluator, EvaluatorControl, EvaluatorStats, EvaluatorWorker};
use crate::id::AlertIdGenerator;
use crate::policy::PolicySet;
use crate::source::PolicySource;
use apm_core::{
    ApmError, Delivery, NotificationSink, PoolConfig, Result, SharedClock, SummaryHandler,
    TickerPool, WorkerPool,
};
use apm_types::{MinuteSummary, Point, TimeBounds};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 一次策略重载的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// 告警端服务
///
/// 持有策略缓存、评估器工作者池与各协作方，构造一次后以引用传递。
pub struct AlertService {
    policies: RwLock<HashMap<String, Arc<PolicySet>>>,
    pool: Arc<WorkerPool<EvaluatorWorker>>,
    source: Arc<dyn PolicySource>,
    sink: Arc<dyn NotificationSink>,
    clock: SharedClock,
    ids: Arc<AlertIdGenerator>,
    limit: RateLimit,
    bounds: TimeBounds,
}

impl AlertService {
    /// 创建告警服务
    ///
    /// # 参数
    /// * `limit` - 告警频率限制
    /// * `pool_config` - 工作者池参数
    /// * `ticker` - 共享定时器池
    /// * `source` - 策略库
    /// * `sink` - 告警投递方
    /// * `clock` - 时间源
    pub fn new(
        limit: RateLimit,
        pool_config: PoolConfig,
        ticker: Arc<TickerPool>,
        source: Arc<dyn PolicySource>,
        sink: Arc<dyn NotificationSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            pool: Arc::new(WorkerPool::new("alert", pool_config, ticker)),
            source,
            sink,
            clock,
            ids: Arc::new(AlertIdGenerator::new()),
            limit,
            bounds: TimeBounds::default(),
        }
    }

    /// 覆盖可接受的时间戳范围
    pub fn with_bounds(mut self, bounds: TimeBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_id_generator(mut self, ids: AlertIdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn pool(&self) -> &Arc<WorkerPool<EvaluatorWorker>> {
        &self.pool
    }

    pub async fn policy(&self, app_name: &str) -> Option<Arc<PolicySet>> {
        self.policies.read().await.get(app_name).cloned()
    }

    pub async fn app_count(&self) -> usize {
        self.policies.read().await.len()
    }

    /// 拉取策略快照并按版本号更新缓存
    ///
    /// 版本号未变的应用直接跳过；记录消失的应用被移除。
    pub async fn reload_policies(&self) -> Result<ReloadSummary> {
        let snapshot = self.source.fetch().await?;
        let records = snapshot.effective_records();

        let mut summary = ReloadSummary::default();
        let mut policies = self.policies.write().await;
        let mut seen = HashSet::new();

        for record in &records {
            if !seen.insert(record.app_name.clone()) {
                warn!(app = %record.app_name, "Duplicate policy record ignored");
                continue;
            }

            match policies.get(&record.app_name) {
                Some(existing) if existing.version() == record.version => {
                    summary.unchanged += 1;
                }
                Some(_) => {
                    let set = Arc::new(PolicySet::from_record(record));
                    policies.insert(record.app_name.clone(), set.clone());
                    self.pool
                        .control(&record.app_name, EvaluatorControl::Policies(set))
                        .await;
                    debug!(app = %record.app_name, version = record.version, "Policy updated");
                    summary.updated += 1;
                }
                None => {
                    let set = Arc::new(PolicySet::from_record(record));
                    policies.insert(record.app_name.clone(), set);
                    debug!(app = %record.app_name, version = record.version, "Policy added");
                    summary.added += 1;
                }
            }
        }

        let gone: Vec<String> = policies
            .keys()
            .filter(|app| !seen.contains(*app))
            .cloned()
            .collect();
        for app in gone {
            policies.remove(&app);
            self.pool.remove(&app).await;
            info!(app = %app, "Policy removed, app state freed");
            summary.removed += 1;
        }

        if summary.added + summary.updated + summary.removed > 0 {
            info!(
                added = summary.added,
                updated = summary.updated,
                removed = summary.removed,
                unchanged = summary.unchanged,
                "Policies reloaded"
            );
        }
        Ok(summary)
    }

    /// 将数据点投递到所属应用的评估器，没有策略的应用直接丢弃
    pub async fn route(&self, point: Point) -> Result<Delivery> {
        point.validate().map_err(ApmError::InvalidInput)?;
        point
            .check_time(self.clock.now(), &self.bounds)
            .map_err(ApmError::InvalidInput)?;

        let policies = self.policies.read().await;
        let policy = match policies.get(&point.entity.app_name) {
            Some(p) if p.accepts(point.family) => p.clone(),
            _ => return Ok(Delivery::Unknown),
        };

        let app = point.entity.app_name.clone();
        let delivery = self
            .pool
            .dispatch_or_spawn(&app, point, || {
                EvaluatorWorker::new(
                    AlertEvaluator::new(policy, self.limit, self.ids.clone()),
                    self.clock.clone(),
                    self.sink.clone(),
                )
            })
            .await;
        Ok(delivery)
    }

    /// 移除应用：停止工作者并释放状态
    pub async fn remove_app(&self, app_name: &str) -> bool {
        let removed = self.policies.write().await.remove(app_name).is_some();
        self.pool.remove(app_name).await || removed
    }

    /// 查询应用评估器的状态
    pub async fn stats(&self, app_name: &str) -> Option<EvaluatorStats> {
        let (tx, rx) = oneshot::channel();
        if !self.pool.control(app_name, EvaluatorControl::Stats(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    /// 启动策略轮询与空闲回收
    pub fn start(self: &Arc<Self>, reload_interval: Duration) -> Vec<JoinHandle<()>> {
        let service = Arc::clone(self);
        let poller = tokio::spawn(async move {
            let mut interval = tokio::time::interval(reload_interval);
            loop {
                interval.tick().await;
                if let Err(e) = service.reload_policies().await {
                    warn!(error = %e, "Policy reload failed, keeping cached policies");
                }
            }
        });

        let sweeper = self.pool.start_sweeper(self.pool.ticker().interval());
        info!(reload_interval = ?reload_interval, "Alert service started");
        vec![poller, sweeper]
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        info!("Alert service stopped");
    }
}

#[async_trait]
impl SummaryHandler for AlertService {
    async fn handle_summary(&self, payload: &[u8]) -> Result<usize> {
        let summary: MinuteSummary = serde_json::from_slice(payload)?;
        let app = summary.app_name.clone();
        let minute = summary.minute;

        let mut queued = 0;
        for point in summary.into_points() {
            match self.route(point).await {
                Ok(Delivery::Queued) => queued += 1,
                Ok(_) => {}
                Err(e) => debug!(app = %app, error = %e, "Invalid point in summary"),
            }
        }
        debug!(app = %app, minute, queued, "Summary received");
        Ok(queued)
    }
}
