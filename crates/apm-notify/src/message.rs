use apm_types::AlertMessage;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// 告警
    Alarm,
    /// 恢复
    Recovery,
}

/// 渲染后的告警通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotice {
    pub kind: NoticeKind,
    pub app_name: String,
    /// 应用名/指标描述/数值单位
    pub detail: String,
    pub alert_id: i64,
    /// 详情链接
    pub detail_addr: String,
    pub timestamp: DateTime<Utc>,
    /// 接收地址（邮箱或手机号）
    pub addrs: Vec<String>,
}

impl AlertNotice {
    /// 渲染告警消息
    ///
    /// # 参数
    /// * `message` - 评估器发出的告警
    /// * `detail_url` - 详情页地址前缀，与告警 ID 拼接
    /// * `addrs` - 已解析的接收地址
    pub fn render(message: &AlertMessage, detail_url: &str, addrs: Vec<String>) -> Self {
        let kind = if message.is_recovery {
            NoticeKind::Recovery
        } else {
            NoticeKind::Alarm
        };
        let detail = format!(
            "{}/{}/{:.2}{}",
            message.entity,
            message.metric_type.description(),
            message.computed_value,
            message.unit
        );
        let timestamp = Utc
            .timestamp_opt(message.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            kind,
            app_name: message.entity.app_name.clone(),
            detail,
            alert_id: message.alert_id,
            detail_addr: format!("{}{}", detail_url, message.alert_id),
            timestamp,
            addrs,
        }
    }

    pub fn title(&self) -> String {
        match self.kind {
            NoticeKind::Alarm => format!("[APM alarm] {}", self.app_name),
            NoticeKind::Recovery => format!("[APM recovery] {}", self.app_name),
        }
    }

    /// 纯文本正文
    pub fn body(&self) -> String {
        format!(
            "{}\n\nAlert ID: {}\nDetail: {}\nTime: {}",
            self.detail,
            self.alert_id,
            self.detail_addr,
            self.timestamp.to_rfc3339()
        )
    }
}
