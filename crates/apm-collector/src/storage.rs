use apm_core::{ApmError, Result};
use apm_types::MinuteSummary;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// 分钟统计的持久化方
#[async_trait]
pub trait StatsStorage: Send + Sync {
    async fn persist(&self, summary: &MinuteSummary) -> Result<()>;
}

/// 内存存储，按应用保存已持久化的汇总
#[derive(Default)]
pub struct MemoryStorage {
    summaries: RwLock<HashMap<String, Vec<MinuteSummary>>>,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用，之后的写入全部失败
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn summaries(&self, app_name: &str) -> Vec<MinuteSummary> {
        self.summaries
            .read()
            .await
            .get(app_name)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.summaries.read().await.values().map(|v| v.len()).sum()
    }
}

#[async_trait]
impl StatsStorage for MemoryStorage {
    async fn persist(&self, summary: &MinuteSummary) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ApmError::Storage("storage unavailable".to_string()));
        }
        self.summaries
            .write()
            .await
            .entry(summary.app_name.clone())
            .or_default()
            .push(summary.clone());
        Ok(())
    }
}
