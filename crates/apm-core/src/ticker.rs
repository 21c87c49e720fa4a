use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 已注册任务的标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickerId {
    slot: usize,
    id: u64,
}

type Slot = Arc<RwLock<HashMap<u64, mpsc::Sender<()>>>>;

/// 有界定时器池
///
/// 固定数量的定时任务把节拍分发给所有注册的工作者，
/// 总定时器数量与实体数量无关。工作者忙碌时跳过本次节拍，不排队。
pub struct TickerPool {
    interval: Duration,
    slots: Vec<Slot>,
    next_id: AtomicU64,
    next_slot: AtomicUsize,
    handles: RwLock<Vec<JoinHandle<()>>>,
}

impl TickerPool {
    /// 创建定时器池
    ///
    /// # 参数
    /// * `interval` - 节拍间隔
    /// * `pool_size` - 定时任务数量
    pub fn new(interval: Duration, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            interval,
            slots: (0..pool_size)
                .map(|_| Arc::new(RwLock::new(HashMap::new())))
                .collect(),
            next_id: AtomicU64::new(1),
            next_slot: AtomicUsize::new(0),
            handles: RwLock::new(Vec::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// 注册一个节拍接收端，轮询分配到各个定时任务
    pub async fn register(&self, tick_tx: mpsc::Sender<()>) -> TickerId {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots[slot].write().await.insert(id, tick_tx);
        TickerId { slot, id }
    }

    /// 注销
    pub async fn remove(&self, ticker: TickerId) -> bool {
        match self.slots.get(ticker.slot) {
            Some(slot) => slot.write().await.remove(&ticker.id).is_some(),
            None => false,
        }
    }

    /// 已注册的接收端数量
    pub async fn registered(&self) -> usize {
        let mut total = 0;
        for slot in &self.slots {
            total += slot.read().await.len();
        }
        total
    }

    /// 启动所有定时任务，各任务起始时间错开
    pub async fn start(&self) {
        let mut handles = self.handles.write().await;
        if !handles.is_empty() {
            warn!("Ticker pool is already running");
            return;
        }

        let count = self.slots.len() as u32;
        for (index, slot) in self.slots.iter().enumerate() {
            let offset = self.interval / count * index as u32;
            let slot = slot.clone();
            let period = self.interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period + offset, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    Self::fan_out(&slot).await;
                }
            }));
        }

        info!(
            pool_size = self.slots.len(),
            interval = ?self.interval,
            "Ticker pool started"
        );
    }

    /// 立即向所有接收端发送一次节拍
    pub async fn tick_now(&self) {
        for slot in &self.slots {
            Self::fan_out(slot).await;
        }
    }

    async fn fan_out(slot: &Slot) {
        let mut closed = Vec::new();
        {
            let senders = slot.read().await;
            for (id, tx) in senders.iter() {
                match tx.try_send(()) {
                    Ok(()) => {}
                    // 上一个节拍尚未处理，跳过
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut senders = slot.write().await;
            for id in &closed {
                senders.remove(id);
            }
            debug!(count = closed.len(), "Removed closed tick receivers");
        }
    }

    /// 停止所有定时任务
    pub async fn stop(&self) {
        let mut handles = self.handles.write().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("Ticker pool stopped");
    }
}
