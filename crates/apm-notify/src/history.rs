use apm_types::AlertMessage;
use std::collections::VecDeque;
use tokio::sync::RwLock;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// 有界的告警历史，超出容量时淘汰最旧记录
pub struct AlertHistory {
    capacity: usize,
    entries: RwLock<VecDeque<AlertMessage>>,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn record(&self, message: AlertMessage) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(message);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 按应用查询，最新的在前
    pub async fn by_app(&self, app_name: &str) -> Vec<AlertMessage> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|m| m.entity.app_name == app_name)
            .cloned()
            .collect()
    }

    pub async fn by_id(&self, alert_id: i64) -> Option<AlertMessage> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .find(|m| m.alert_id == alert_id)
            .cloned()
    }

    /// 最近 `limit` 条，最新的在前
    pub async fn recent(&self, limit: usize) -> Vec<AlertMessage> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
