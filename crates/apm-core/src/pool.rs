use crate::error::{ApmError, Result};
use crate::ticker::{TickerId, TickerPool};
use apm_logging::{LogSampler, SamplingStrategy};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 单个实体的工作者
///
/// 工作者独占自己的状态，收到数据点、控制消息与节拍时顺序处理，内部无需加锁。
#[async_trait]
pub trait EntityWorker: Send + 'static {
    type Input: Send + 'static;
    type Control: Send + 'static;

    /// 处理一个输入
    fn ingest(&mut self, input: Self::Input);

    /// 处理一个控制消息
    fn apply(&mut self, control: Self::Control);

    /// 周期处理
    async fn tick(&mut self);

    /// 没有缓存数据也没有未恢复的告警时为空闲
    fn is_idle(&self) -> bool;
}

/// 投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 已入队
    Queued,
    /// 队列已满，数据点被丢弃
    QueueFull,
    /// 没有该实体的工作者
    Unknown,
    /// 工作者已退出
    Closed,
    /// 达到工作者数量上限
    Rejected,
}

/// 工作者池参数
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub queue_capacity: usize,
    pub max_workers: usize,
    /// 连续空闲多少个节拍后回收
    pub idle_ticks: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            max_workers: 10_000,
            idle_ticks: 30,
        }
    }
}

/// 空闲标记的“非空闲”取值
const BUSY: u64 = u64::MAX;

struct WorkerHandle<W: EntityWorker> {
    input: mpsc::Sender<W::Input>,
    control: mpsc::UnboundedSender<W::Control>,
    stop: Option<oneshot::Sender<()>>,
    /// 已入队的数据点数，只在持有读锁时递增
    sent: AtomicU64,
    /// 工作者判定空闲时已处理的数据点数，非空闲为 `BUSY`
    idle_mark: Arc<AtomicU64>,
    ticker_id: TickerId,
    task: JoinHandle<()>,
}

impl<W: EntityWorker> WorkerHandle<W> {
    /// 空闲且判定之后没有新数据点入队
    ///
    /// 调用方持有写锁，`sent` 不会变化；已出队但尚未处理的数据点也计入 `sent`。
    fn is_retirable(&self) -> bool {
        let mark = self.idle_mark.load(Ordering::Acquire);
        mark != BUSY && mark == self.sent.load(Ordering::Acquire)
    }
}

/// 按实体键组织的有界工作者池
///
/// 路由热路径只持有读锁查找工作者，生产者从不阻塞：队列满时丢弃最新的数据点。
pub struct WorkerPool<W: EntityWorker> {
    name: &'static str,
    config: PoolConfig,
    ticker: Arc<TickerPool>,
    workers: RwLock<HashMap<String, WorkerHandle<W>>>,
    sampler: LogSampler,
    dropped: AtomicU64,
}

impl<W: EntityWorker> WorkerPool<W> {
    pub fn new(name: &'static str, config: PoolConfig, ticker: Arc<TickerPool>) -> Self {
        Self {
            name,
            config,
            ticker,
            workers: RwLock::new(HashMap::new()),
            sampler: LogSampler::new(SamplingStrategy::RateLimit(10)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn ticker(&self) -> &Arc<TickerPool> {
        &self.ticker
    }

    /// 因队列已满丢弃的数据点总数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.workers.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    /// 为实体启动工作者，已存在时返回 false
    pub async fn spawn(&self, key: &str, worker: W) -> Result<bool> {
        let mut workers = self.workers.write().await;
        if workers.contains_key(key) {
            return Ok(false);
        }
        if workers.len() >= self.config.max_workers {
            return Err(ApmError::QueueFull(format!(
                "{} pool reached {} workers",
                self.name, self.config.max_workers
            )));
        }
        let handle = self.start_worker(key, worker).await;
        workers.insert(key.to_string(), handle);
        Ok(true)
    }

    /// 投递到已存在的工作者
    pub async fn dispatch(&self, key: &str, input: W::Input) -> Delivery {
        let workers = self.workers.read().await;
        match workers.get(key) {
            Some(handle) => self.try_deliver(key, handle, input),
            None => Delivery::Unknown,
        }
    }

    /// 投递，实体首次出现时用工厂创建工作者
    pub async fn dispatch_or_spawn<F>(&self, key: &str, input: W::Input, factory: F) -> Delivery
    where
        F: FnOnce() -> W,
    {
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.get(key) {
                return self.try_deliver(key, handle, input);
            }
        }

        let mut workers = self.workers.write().await;
        if !workers.contains_key(key) {
            if workers.len() >= self.config.max_workers {
                warn!(pool = self.name, entity = %key, "Worker limit reached, rejecting entity");
                return Delivery::Rejected;
            }
            let handle = self.start_worker(key, factory()).await;
            workers.insert(key.to_string(), handle);
        }
        match workers.get(key) {
            Some(handle) => self.try_deliver(key, handle, input),
            None => Delivery::Unknown,
        }
    }

    fn try_deliver(&self, key: &str, handle: &WorkerHandle<W>, input: W::Input) -> Delivery {
        match handle.input.try_send(input) {
            Ok(()) => {
                handle.sent.fetch_add(1, Ordering::AcqRel);
                Delivery::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if self.sampler.should_sample() {
                    warn!(
                        pool = self.name,
                        entity = %key,
                        dropped,
                        "Input queue full, dropping point"
                    );
                }
                Delivery::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// 发送控制消息
    pub async fn control(&self, key: &str, control: W::Control) -> bool {
        let workers = self.workers.read().await;
        match workers.get(key) {
            Some(handle) => handle.control.send(control).is_ok(),
            None => false,
        }
    }

    /// 向所有工作者广播控制消息
    pub async fn broadcast<F>(&self, mut make: F) -> usize
    where
        F: FnMut(&str) -> W::Control,
    {
        let workers = self.workers.read().await;
        workers
            .iter()
            .filter(|(key, handle)| handle.control.send(make(key)).is_ok())
            .count()
    }

    /// 移除实体：丢弃队列中的数据，从定时器池注销，释放全部状态
    pub async fn remove(&self, key: &str) -> bool {
        let handle = self.workers.write().await.remove(key);
        match handle {
            Some(handle) => {
                self.stop_worker(handle).await;
                info!(pool = self.name, entity = %key, "Worker removed");
                true
            }
            None => false,
        }
    }

    /// 回收已退出或持续空闲的工作者
    pub async fn sweep(&self) -> usize {
        let stale: Vec<WorkerHandle<W>> = {
            let mut workers = self.workers.write().await;
            let keys: Vec<String> = workers
                .iter()
                .filter(|(_, h)| {
                    h.task.is_finished() || h.is_retirable()
                })
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| workers.remove(k)).collect()
        };

        let count = stale.len();
        for handle in stale {
            self.stop_worker(handle).await;
        }
        if count > 0 {
            debug!(pool = self.name, count, "Swept idle workers");
        }
        count
    }

    /// 周期回收任务
    pub fn start_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                pool.sweep().await;
            }
        })
    }

    /// 停止全部工作者
    pub async fn shutdown(&self) {
        let handles: Vec<(String, WorkerHandle<W>)> =
            self.workers.write().await.drain().collect();
        let count = handles.len();
        for (_, handle) in handles {
            self.stop_worker(handle).await;
        }
        info!(pool = self.name, count, "Worker pool shut down");
    }

    async fn stop_worker(&self, mut handle: WorkerHandle<W>) {
        self.ticker.remove(handle.ticker_id).await;
        if let Some(stop) = handle.stop.take() {
            let _ = stop.send(());
        }
    }

    async fn start_worker(&self, key: &str, mut worker: W) -> WorkerHandle<W> {
        let (input_tx, mut input_rx) = mpsc::channel::<W::Input>(self.config.queue_capacity.max(1));
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<W::Control>();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let (tick_tx, mut tick_rx) = mpsc::channel::<()>(1);
        let ticker_id = self.ticker.register(tick_tx).await;

        let idle_mark = Arc::new(AtomicU64::new(BUSY));
        let mark = idle_mark.clone();
        let idle_ticks = self.config.idle_ticks.max(1);
        let pool = self.name;
        let entity = key.to_string();

        let task = tokio::spawn(async move {
            let mut idle_count = 0u32;
            let mut processed = 0u64;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    Some(input) = input_rx.recv() => {
                        mark.store(BUSY, Ordering::Release);
                        idle_count = 0;
                        worker.ingest(input);
                        processed += 1;
                    }
                    Some(control) = control_rx.recv() => worker.apply(control),
                    Some(()) = tick_rx.recv() => {
                        worker.tick().await;
                        if worker.is_idle() {
                            idle_count = idle_count.saturating_add(1);
                            if idle_count >= idle_ticks {
                                mark.store(processed, Ordering::Release);
                            }
                        } else {
                            idle_count = 0;
                            mark.store(BUSY, Ordering::Release);
                        }
                    }
                    else => break,
                }
            }

            input_rx.close();
            let mut discarded = 0usize;
            while input_rx.try_recv().is_ok() {
                discarded += 1;
            }
            debug!(pool, entity = %entity, discarded, "Worker stopped");
        });

        debug!(pool = self.name, entity = %key, "Worker started");

        WorkerHandle {
            input: input_tx,
            control: control_tx,
            stop: Some(stop_tx),
            sent: AtomicU64::new(0),
            idle_mark,
            ticker_id,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    /// 计数工作者：tick 时把累计值发送出去
    struct Summer {
        total: u64,
        report: mpsc::UnboundedSender<u64>,
    }

    #[async_trait]
    impl EntityWorker for Summer {
        type Input = u64;
        type Control = u64;

        fn ingest(&mut self, input: u64) {
            self.total += input;
        }

        fn apply(&mut self, control: u64) {
            self.total = control;
        }

        async fn tick(&mut self) {
            let _ = self.report.send(self.total);
            self.total = 0;
        }

        fn is_idle(&self) -> bool {
            self.total == 0
        }
    }

    fn pool(config: PoolConfig) -> WorkerPool<Summer> {
        WorkerPool::new(
            "test",
            config,
            Arc::new(TickerPool::new(Duration::from_secs(3600), 2)),
        )
    }

    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_dispatch_and_tick() {
        let pool = pool(PoolConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert_eq!(pool.dispatch("a", 1).await, Delivery::Unknown);
        let report = tx.clone();
        let d = pool
            .dispatch_or_spawn("a", 5, move || Summer { total: 0, report })
            .await;
        assert_eq!(d, Delivery::Queued);
        assert_eq!(pool.dispatch("a", 7).await, Delivery::Queued);
        settle().await;

        pool.ticker().tick_now().await;
        let total = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(total, Some(12));
    }

    #[tokio::test]
    async fn test_queue_full_drops_newest() {
        let pool = pool(PoolConfig {
            queue_capacity: 2,
            ..PoolConfig::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        // 在工作者处理前连续写入，超出容量的被丢弃
        let mut results = Vec::new();
        pool.spawn("a", Summer { total: 0, report: tx }).await.unwrap();
        for i in 0..50 {
            results.push(pool.dispatch("a", i).await);
        }
        assert!(results.iter().all(|d| matches!(d, Delivery::Queued | Delivery::QueueFull)));
        let full = results.iter().filter(|d| **d == Delivery::QueueFull).count() as u64;
        assert_eq!(pool.dropped(), full);
    }

    #[tokio::test]
    async fn test_max_workers() {
        let pool = pool(PoolConfig {
            max_workers: 1,
            ..PoolConfig::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let report = tx.clone();
        assert!(pool.spawn("a", Summer { total: 0, report }).await.unwrap());
        let report = tx.clone();
        assert!(!pool.spawn("a", Summer { total: 0, report }).await.unwrap());

        let report = tx.clone();
        let d = pool
            .dispatch_or_spawn("b", 1, move || Summer { total: 0, report })
            .await;
        assert_eq!(d, Delivery::Rejected);
        tokio_test::assert_err!(pool.spawn("c", Summer { total: 0, report: tx }).await);
    }

    #[tokio::test]
    async fn test_remove_detaches_ticker() {
        let pool = pool(PoolConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        pool.spawn("a", Summer { total: 0, report: tx }).await.unwrap();
        assert_eq!(pool.ticker().registered().await, 1);

        assert!(pool.remove("a").await);
        assert!(!pool.remove("a").await);
        assert_eq!(pool.ticker().registered().await, 0);
        assert_eq!(pool.dispatch("a", 1).await, Delivery::Unknown);
    }

    #[tokio::test]
    async fn test_control_message() {
        let pool = pool(PoolConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        pool.spawn("a", Summer { total: 0, report: tx }).await.unwrap();

        assert!(pool.control("a", 40).await);
        assert!(!pool.control("missing", 1).await);
        settle().await;
        pool.ticker().tick_now().await;
        assert_eq!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap(), Some(40));
    }

    #[tokio::test]
    async fn test_idle_worker_is_swept() {
        let pool = pool(PoolConfig {
            idle_ticks: 2,
            ..PoolConfig::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        pool.spawn("a", Summer { total: 0, report: tx }).await.unwrap();

        for _ in 0..2 {
            pool.ticker().tick_now().await;
            timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        }
        settle().await;

        assert_eq!(pool.sweep().await, 1);
        assert!(pool.is_empty().await);
        assert_eq!(pool.ticker().registered().await, 0);
    }

    #[tokio::test]
    async fn test_busy_worker_is_not_swept() {
        let pool = pool(PoolConfig {
            idle_ticks: 1,
            ..PoolConfig::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        pool.spawn("a", Summer { total: 0, report: tx }).await.unwrap();
        pool.dispatch("a", 3).await;
        settle().await;

        assert_eq!(pool.sweep().await, 0);
        assert!(pool.contains("a").await);
    }

    /// 处理数据点时阻塞，直到测试放行
    struct Gate {
        entered: std::sync::mpsc::Sender<()>,
        release: std::sync::mpsc::Receiver<()>,
    }

    #[async_trait]
    impl EntityWorker for Gate {
        type Input = ();
        type Control = ();

        fn ingest(&mut self, _input: ()) {
            let _ = self.entered.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }

        fn apply(&mut self, _control: ()) {}

        async fn tick(&mut self) {}

        fn is_idle(&self) -> bool {
            true
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_point_in_flight_blocks_sweep() {
        let pool: WorkerPool<Gate> = WorkerPool::new(
            "test",
            PoolConfig {
                idle_ticks: 1,
                ..PoolConfig::default()
            },
            Arc::new(TickerPool::new(Duration::from_secs(3600), 1)),
        );
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        pool.spawn(
            "a",
            Gate {
                entered: entered_tx,
                release: release_rx,
            },
        )
        .await
        .unwrap();

        pool.ticker().tick_now().await;
        settle().await;

        // 数据点已出队，队列为空，但尚未处理完
        assert_eq!(pool.dispatch("a", ()).await, Delivery::Queued);
        tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.sweep().await, 0);
        assert!(pool.contains("a").await);

        release_tx.send(()).unwrap();
        settle().await;
        assert_eq!(pool.sweep().await, 0);

        pool.ticker().tick_now().await;
        settle().await;
        assert_eq!(pool.sweep().await, 1);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let pool = pool(PoolConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        pool.spawn("a", Summer { total: 0, report: tx.clone() }).await.unwrap();
        pool.spawn("b", Summer { total: 0, report: tx }).await.unwrap();
        assert_eq!(pool.len().await, 2);

        pool.shutdown().await;
        assert_eq!(pool.len().await, 0);
        assert_eq!(pool.ticker().registered().await, 0);
    }
}
