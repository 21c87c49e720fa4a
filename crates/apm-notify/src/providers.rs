use crate::message::AlertNotice;
use crate::notifier::{Notifier, SendReport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// 邮件通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, notice: &AlertNotice) -> Result<SendReport> {
        use lettre::message::header::ContentType;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        if notice.addrs.is_empty() {
            return Ok(SendReport::rejected("no email recipients"));
        }

        let mut builder = Message::builder()
            .from(self.config.from.parse()?)
            .subject(notice.title())
            .header(ContentType::TEXT_PLAIN);
        for addr in &notice.addrs {
            builder = builder.to(addr.parse()?);
        }
        let email = builder.body(notice.body())?;

        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)?
            .credentials(creds)
            .port(self.config.smtp_port)
            .build();

        // 一封邮件抄送全部地址，成败一致
        match mailer.send(email).await {
            Ok(_) => Ok(SendReport::delivered(notice.addrs.len())),
            Err(e) => Ok(SendReport {
                failed: notice.addrs.clone(),
                error: Some(format!("smtp: {}", e)),
                ..SendReport::default()
            }),
        }
    }

    fn channel(&self) -> &str {
        "email"
    }
}

// ============================================================================
// 短信网关通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// 消息中心网关地址
    pub gateway_url: String,
    /// 消息中心 ID
    pub center_id: String,
}

pub struct SmsNotifier {
    config: SmsConfig,
    client: reqwest::Client,
}

impl SmsNotifier {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// 网关模板参数
    fn build_model(&self, notice: &AlertNotice) -> Result<String> {
        let model = serde_json::json!({
            "type": notice.kind,
            "appName": notice.app_name,
            "detail": notice.detail,
            "alertId": notice.alert_id,
            "detailAddr": notice.detail_addr,
            "time": notice.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        Ok(serde_json::to_string(&model)?)
    }

    async fn send_one(&self, mobile: &str, model: &str) -> Result<()> {
        let params = [
            ("messagecenterid", self.config.center_id.as_str()),
            ("typeOfMessageCenter", "sms"),
            ("model", model),
            ("mobilenumber", mobile),
        ];

        let response = self
            .client
            .post(&self.config.gateway_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() && body.contains("success") {
            Ok(())
        } else {
            Err(anyhow!("gateway rejected message: {} {}", status, body))
        }
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    async fn send(&self, notice: &AlertNotice) -> Result<SendReport> {
        if notice.addrs.is_empty() {
            return Ok(SendReport::rejected("no mobile recipients"));
        }

        // 网关一次只接受一个号码，逐个发送
        let model = self.build_model(notice)?;
        let mut report = SendReport::default();
        for mobile in &notice.addrs {
            match self.send_one(mobile, &model).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(mobile = %mobile, error = %e, "SMS delivery failed");
                    report.failed.push(mobile.clone());
                }
            }
        }
        Ok(report)
    }

    fn channel(&self) -> &str {
        "sms"
    }
}

// ============================================================================
// Webhook 通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub headers: Option<std::collections::HashMap<String, String>>,
}

pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notice: &AlertNotice) -> Result<SendReport> {
        let mut request = self.client.post(&self.config.url);

        if let Some(headers) = &self.config.headers {
            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        let response = request.json(notice).send().await?;

        if response.status().is_success() {
            Ok(SendReport::delivered(1))
        } else {
            Ok(SendReport::rejected(format!(
                "webhook responded with {}",
                response.status()
            )))
        }
    }

    fn channel(&self) -> &str {
        "webhook"
    }

    /// 接收方由 webhook 自己决定
    fn needs_recipients(&self) -> bool {
        false
    }
}

// ============================================================================
// 日志通知
// ============================================================================

/// 把告警写入日志，未配置外部渠道时使用
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notice: &AlertNotice) -> Result<SendReport> {
        info!(
            kind = ?notice.kind,
            app = %notice.app_name,
            alert_id = notice.alert_id,
            recipients = ?notice.addrs,
            "{}",
            notice.detail
        );
        Ok(SendReport::delivered(1))
    }

    fn channel(&self) -> &str {
        "log"
    }

    fn needs_recipients(&self) -> bool {
        false
    }
}
