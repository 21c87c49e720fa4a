use crate::directory::UserDirectory;
use crate::history::AlertHistory;
use crate::message::AlertNotice;
use crate::notifier::Notifier;
use apm_core::NotificationSink;
use apm_types::AlertMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// 通知管理器
///
/// 按告警消息中的渠道名选择通知器，记录历史后异步发送。
pub struct NotifyManager {
    /// 渠道名 → 通知器
    notifiers: Arc<RwLock<HashMap<String, Arc<dyn Notifier>>>>,
    directory: Arc<UserDirectory>,
    history: Arc<AlertHistory>,
    detail_url: String,
}

impl NotifyManager {
    pub fn new(
        directory: Arc<UserDirectory>,
        history: Arc<AlertHistory>,
        detail_url: impl Into<String>,
    ) -> Self {
        Self {
            notifiers: Arc::new(RwLock::new(HashMap::new())),
            directory,
            history,
            detail_url: detail_url.into(),
        }
    }

    /// 注册通知器
    pub async fn register(&self, channel: impl Into<String>, notifier: Arc<dyn Notifier>) {
        let channel = channel.into();
        let mut notifiers = self.notifiers.write().await;
        if channel != notifier.channel() {
            info!(channel = %channel, "Channel served by {} notifier", notifier.channel());
        } else {
            info!(channel = %channel, "Registered notifier");
        }
        notifiers.insert(channel, notifier);
    }

    pub async fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.notifiers.read().await.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn directory(&self) -> &Arc<UserDirectory> {
        &self.directory
    }

    pub fn history(&self) -> &Arc<AlertHistory> {
        &self.history
    }

    /// 解析接收人并渲染通知；渠道未注册或没有可用地址时返回 None
    pub async fn prepare(&self, message: &AlertMessage) -> Option<(Arc<dyn Notifier>, AlertNotice)> {
        let notifier = self.notifiers.read().await.get(&message.channel).cloned();
        let Some(notifier) = notifier else {
            warn!(
                channel = %message.channel,
                app = %message.entity.app_name,
                alert_id = message.alert_id,
                "No notifier registered for channel, alert dropped"
            );
            return None;
        };

        let addrs = self
            .directory
            .resolve(&message.recipients, &message.channel)
            .await;
        if addrs.is_empty() && notifier.needs_recipients() {
            warn!(
                channel = %message.channel,
                alert_id = message.alert_id,
                recipients = ?message.recipients,
                "No recipient address resolved, alert dropped"
            );
            return None;
        }
        Some((notifier, AlertNotice::render(message, &self.detail_url, addrs)))
    }

    /// 发送并等待结果
    pub async fn send(&self, message: &AlertMessage) -> bool {
        match self.prepare(message).await {
            Some((notifier, notice)) => send_notice(notifier.as_ref(), &notice).await,
            None => false,
        }
    }
}

async fn send_notice(notifier: &dyn Notifier, notice: &AlertNotice) -> bool {
    match notifier.send(notice).await {
        Ok(report) if report.is_success() => {
            info!(
                alert_id = notice.alert_id,
                channel = notifier.channel(),
                "Notification sent ({}): {}",
                report,
                notice.detail
            );
            true
        }
        Ok(report) => {
            error!(
                alert_id = notice.alert_id,
                channel = notifier.channel(),
                "Notification incomplete: {}",
                report
            );
            false
        }
        Err(e) => {
            error!(
                alert_id = notice.alert_id,
                channel = notifier.channel(),
                error = %e,
                "Notification error"
            );
            false
        }
    }
}

#[async_trait]
impl NotificationSink for NotifyManager {
    /// 记录历史，然后在后台任务中发送，不阻塞评估
    async fn deliver(&self, message: AlertMessage) {
        let prepared = self.prepare(&message).await;
        self.history.record(message).await;

        if let Some((notifier, notice)) = prepared {
            tokio::spawn(async move {
                send_notice(notifier.as_ref(), &notice).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Contact;
    use crate::notifier::SendReport;
    use apm_types::{EntityKey, MetricType};
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    struct CaptureNotifier {
        tx: mpsc::UnboundedSender<AlertNotice>,
    }

    #[async_trait]
    impl Notifier for CaptureNotifier {
        async fn send(&self, notice: &AlertNotice) -> anyhow::Result<SendReport> {
            let _ = self.tx.send(notice.clone());
            Ok(SendReport::delivered(notice.addrs.len()))
        }

        fn channel(&self) -> &str {
            "sms"
        }
    }

    fn message(channel: &str) -> AlertMessage {
        AlertMessage {
            entity: EntityKey::api("shop", "/pay"),
            metric_type: MetricType::ApiErrorRatio,
            computed_value: 10.0,
            threshold_value: 5.0,
            unit: "%".to_string(),
            is_recovery: false,
            channel: channel.to_string(),
            recipients: vec!["u1".to_string()],
            alert_id: 9,
            timestamp: 1_700_000_000,
        }
    }

    async fn manager() -> (NotifyManager, mpsc::UnboundedReceiver<AlertNotice>) {
        let directory = Arc::new(UserDirectory::new());
        directory
            .upsert(
                "u1",
                Contact {
                    email: "ops@example.com".to_string(),
                    mobile: "13800000001".to_string(),
                },
            )
            .await;
        let manager = NotifyManager::new(directory, Arc::new(AlertHistory::default()), "http://apm/");
        let (tx, rx) = mpsc::unbounded_channel();
        manager.register("sms", Arc::new(CaptureNotifier { tx })).await;
        (manager, rx)
    }

    #[tokio::test]
    async fn test_deliver_routes_by_channel() {
        let (manager, mut rx) = manager().await;
        manager.deliver(message("sms")).await;

        let notice = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.addrs, vec!["13800000001"]);
        assert_eq!(notice.detail_addr, "http://apm/9");
        assert_eq!(notice.detail, "shop/api:/pay/api error ratio/10.00%");
        assert_eq!(manager.history().len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_dropped_but_recorded() {
        let (manager, mut rx) = manager().await;
        manager.deliver(message("pager")).await;

        assert!(!manager.send(&message("pager")).await);
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.history().by_id(9).await.unwrap().channel, "pager");
        assert_eq!(manager.channels().await, vec!["sms"]);
    }

    #[tokio::test]
    async fn test_unresolved_recipients_skip_send() {
        let (manager, mut rx) = manager().await;
        let mut msg = message("sms");
        msg.recipients = vec!["ghost".to_string()];

        assert!(manager.prepare(&msg).await.is_none());
        manager.deliver(msg).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.history().len().await, 1);

        // 不需要地址的渠道照常发送
        manager.register("log", Arc::new(crate::providers::LogNotifier)).await;
        let mut msg = message("log");
        msg.recipients.clear();
        assert!(manager.send(&msg).await);
    }
}
