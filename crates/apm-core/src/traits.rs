use crate::error::Result;
use apm_types::AlertMessage;
use async_trait::async_trait;

/// 告警消息的持久化与投递方
///
/// 对核心而言是即发即弃：投递失败只记录日志，不重试。
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: AlertMessage);
}

/// 实体到二级评估实例的路由
pub trait ShardRouter: Send + Sync {
    /// 返回负责该键的评估实例地址
    fn route(&self, key: &str) -> Option<String>;

    /// 当前成员
    fn members(&self) -> Vec<String>;

    /// 成员变化计数，每次变化递增
    fn epoch(&self) -> u64;
}

/// 接收采集端转发的分钟汇总（序列化后的字节）
#[async_trait]
pub trait SummaryHandler: Send + Sync {
    /// 返回成功入队的数据点数量
    async fn handle_summary(&self, payload: &[u8]) -> Result<usize>;
}
