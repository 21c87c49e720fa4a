use crate::message::AlertNotice;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// 一次发送的回执，按接收地址统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// 成功送达的地址数
    pub delivered: usize,
    /// 发送失败的地址
    pub failed: Vec<String>,
    /// 整体失败原因，例如网关拒绝
    pub error: Option<String>,
}

impl SendReport {
    pub fn delivered(count: usize) -> Self {
        Self {
            delivered: count,
            ..Self::default()
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }
}

impl fmt::Display for SendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivered {}", self.delivered)?;
        if !self.failed.is_empty() {
            write!(f, ", failed {:?}", self.failed)?;
        }
        if let Some(error) = &self.error {
            write!(f, ", {}", error)?;
        }
        Ok(())
    }
}

/// 告警通知渠道
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 发送到 `notice.addrs` 中的全部地址
    async fn send(&self, notice: &AlertNotice) -> Result<SendReport>;

    /// 渠道名，对应策略中的 channel
    fn channel(&self) -> &str;

    /// 没有解析出接收地址时是否跳过发送
    fn needs_recipients(&self) -> bool {
        true
    }
}
