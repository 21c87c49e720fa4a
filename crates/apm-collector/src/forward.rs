use crate::transport::{Connection, Transport};
use apm_core::{ApmError, Result, ShardRouter};
use apm_types::MinuteSummary;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 汇总转发器
///
/// 每次转发都重新查询路由；每个评估实例缓存一条连接，
/// 发送失败时丢弃连接，下次重新建立，汇总本身不重发。
pub struct Forwarder {
    router: Arc<dyn ShardRouter>,
    transport: Arc<dyn Transport>,
    connections: DashMap<String, Arc<dyn Connection>>,
    seen_epoch: AtomicU64,
}

impl Forwarder {
    pub fn new(router: Arc<dyn ShardRouter>, transport: Arc<dyn Transport>) -> Self {
        let seen_epoch = AtomicU64::new(router.epoch());
        Self {
            router,
            transport,
            connections: DashMap::new(),
            seen_epoch,
        }
    }

    pub fn router(&self) -> &Arc<dyn ShardRouter> {
        &self.router
    }

    /// 已缓存连接的地址
    pub fn connected(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        addrs.sort();
        addrs
    }

    /// 转发一条汇总，返回目标地址
    pub async fn forward(&self, summary: &MinuteSummary) -> Result<String> {
        self.prune_departed().await;

        let addr = self.router.route(&summary.app_name).ok_or_else(|| {
            ApmError::Forward(format!("no evaluator for app {}", summary.app_name))
        })?;
        let payload = serde_json::to_vec(summary)?;

        let conn = self.connection(&addr).await?;
        if let Err(e) = conn.send(payload).await {
            warn!(addr = %addr, app = %summary.app_name, error = %e, "Forward failed, dropping connection");
            self.connections.remove(&addr);
            conn.close().await;
            return Err(e);
        }

        debug!(addr = %addr, app = %summary.app_name, minute = summary.minute, "Summary forwarded");
        Ok(addr)
    }

    async fn connection(&self, addr: &str) -> Result<Arc<dyn Connection>> {
        if let Some(conn) = self.connections.get(addr).map(|c| c.value().clone()) {
            return Ok(conn);
        }

        let conn = self.transport.connect(addr).await?;
        let conn = self
            .connections
            .entry(addr.to_string())
            .or_insert(conn)
            .value()
            .clone();
        Ok(conn)
    }

    /// 成员变化后关闭离开哈希环的实例的连接
    async fn prune_departed(&self) {
        let epoch = self.router.epoch();
        if self.seen_epoch.swap(epoch, Ordering::AcqRel) == epoch {
            return;
        }

        let members: HashSet<String> = self.router.members().into_iter().collect();
        let departed: Vec<String> = self
            .connections
            .iter()
            .filter(|e| !members.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();

        for addr in departed {
            if let Some((_, conn)) = self.connections.remove(&addr) {
                conn.close().await;
                info!(addr = %addr, epoch, "Closed connection to departed evaluator");
            }
        }
    }
}
