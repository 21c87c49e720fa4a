use anyhow::Result;
use apm_config::NotifyConfig;
use apm_notify::{
    AlertHistory, Contact, EmailConfig, EmailNotifier, LogNotifier, Notifier, NotifyManager,
    SmsConfig, SmsNotifier, UserDirectory, WebhookConfig, WebhookNotifier,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// 按配置创建通知管理器并注册渠道
///
/// 渠道缺少对应配置段时退化为日志通知。
pub async fn build_manager(config: &NotifyConfig, detail_url: &str) -> Arc<NotifyManager> {
    let manager = NotifyManager::new(
        Arc::new(UserDirectory::new()),
        Arc::new(AlertHistory::new(config.history_capacity)),
        detail_url,
    );

    for channel in &config.channels {
        let notifier: Arc<dyn Notifier> = match channel.as_str() {
            "email" => match &config.email {
                Some(email) => Arc::new(EmailNotifier::new(EmailConfig {
                    smtp_host: email.smtp_host.clone(),
                    smtp_port: email.smtp_port,
                    username: email.username.clone(),
                    password: email.password.clone(),
                    from: email.from.clone(),
                })),
                None => fallback(channel),
            },
            "sms" => match &config.sms {
                Some(sms) => Arc::new(SmsNotifier::new(SmsConfig {
                    gateway_url: sms.gateway_url.clone(),
                    center_id: sms.center_id.clone(),
                })),
                None => fallback(channel),
            },
            "webhook" => match &config.webhook {
                Some(webhook) => Arc::new(WebhookNotifier::new(WebhookConfig {
                    url: webhook.url.clone(),
                    headers: None,
                })),
                None => fallback(channel),
            },
            "log" => Arc::new(LogNotifier),
            other => {
                warn!(channel = %other, "Unknown notify channel in config, skipped");
                continue;
            }
        };
        manager.register(channel.clone(), notifier).await;
    }

    Arc::new(manager)
}

fn fallback(channel: &str) -> Arc<dyn Notifier> {
    warn!(channel = %channel, "Channel has no config section, alerts will only be logged");
    Arc::new(LogNotifier)
}

/// 读取用户目录文件（JSON：用户 ID → 联系方式）
pub async fn load_users(path: &Path) -> Result<HashMap<String, Contact>> {
    let content = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&content)?)
}

/// 周期刷新用户目录
pub fn start_directory_refresh(
    directory: Arc<UserDirectory>,
    path: std::path::PathBuf,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match load_users(&path).await {
                Ok(users) => directory.refresh(users).await,
                Err(e) => warn!(path = %path.display(), error = %e, "User directory refresh failed"),
            }
        }
    })
}
