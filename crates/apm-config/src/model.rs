use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 全局配置
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApmConfig {
    pub system: SystemConfig,
    pub server: ServerConfig,
    pub alerting: AlertingConfig,
    pub ticker: TickerConfig,
    pub worker: WorkerConfig,
    pub policy: PolicyConfig,
    pub collector: CollectorConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
}

/// 系统配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    /// 本实例在哈希环中的地址
    pub instance: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "APM Alert Engine".to_string(),
            instance: "127.0.0.1:9100".to_string(),
        }
    }
}

/// HTTP 接入
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9100".to_string(),
        }
    }
}

/// 告警频率限制
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub alarm_interval_secs: u64,
    pub max_alarm_count: u32,
    /// 详情页地址前缀
    pub detail_url: String,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            alarm_interval_secs: 300,
            max_alarm_count: 3,
            detail_url: "http://localhost/alerts/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TickerConfig {
    pub interval_secs: u64,
    pub pool_size: usize,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            pool_size: 10,
        }
    }
}

/// 实体工作者
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    pub max_workers: usize,
    pub idle_ticks: u32,
    /// 拒绝早于当前时间这么多秒的数据点
    pub max_point_age_secs: u64,
    /// 告警端拒绝晚于当前时间这么多秒的数据点，采集端以延迟窗口为上限
    pub max_point_ahead_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            max_workers: 10_000,
            idle_ticks: 30,
            max_point_age_secs: 86_400,
            max_point_ahead_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub reload_interval_secs: u64,
    /// 策略快照文件（JSON）
    pub source_path: PathBuf,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reload_interval_secs: 60,
            source_path: PathBuf::from("./config/policies.json"),
        }
    }
}

/// 一级聚合
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// 分钟数据延迟刷出的秒数
    pub defer_secs: u64,
    pub flush_interval_secs: u64,
    pub virtual_nodes: usize,
    /// 二级评估实例地址
    pub evaluators: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            defer_secs: 120,
            flush_interval_secs: 60,
            virtual_nodes: 160,
            evaluators: Vec::new(),
        }
    }
}

/// 通知渠道
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub channels: Vec<String>,
    /// 用户目录文件（JSON，用户 ID → 联系方式）
    pub users_path: Option<PathBuf>,
    pub history_capacity: usize,
    pub email: Option<EmailSection>,
    pub sms: Option<SmsSection>,
    pub webhook: Option<WebhookSection>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channels: vec!["email".to_string(), "sms".to_string()],
            users_path: None,
            history_capacity: 1000,
            email: None,
            sms: None,
            webhook: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmailSection {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SmsSection {
    pub gateway_url: String,
    pub center_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebhookSection {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApmConfig::default();
        assert_eq!(config.alerting.alarm_interval_secs, 300);
        assert_eq!(config.alerting.max_alarm_count, 3);
        assert_eq!(config.ticker.pool_size, 10);
        assert_eq!(config.worker.queue_capacity, 100);
        assert_eq!(config.collector.defer_secs, 120);
        assert_eq!(config.notify.history_capacity, 1000);
    }
}
