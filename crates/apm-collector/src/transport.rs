use apm_core::{ApmError, Result, SummaryHandler};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// 到某个评估实例的连接
#[async_trait]
pub trait Connection: Send + Sync {
    fn addr(&self) -> &str;

    /// 发送一条序列化后的汇总
    async fn send(&self, payload: Vec<u8>) -> Result<()>;

    /// 关闭连接
    async fn close(&self) {}
}

/// 按地址建立连接
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn Connection>>;
}

// ============================================================================
// 进程内传输
// ============================================================================

/// 进程内传输：地址 → 告警端处理器
#[derive(Default)]
pub struct InProcessTransport {
    handlers: RwLock<HashMap<String, Arc<dyn SummaryHandler>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, addr: impl Into<String>, handler: Arc<dyn SummaryHandler>) {
        self.handlers.write().await.insert(addr.into(), handler);
    }

    pub async fn unregister(&self, addr: &str) -> bool {
        self.handlers.write().await.remove(addr).is_some()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn Connection>> {
        let handler = self
            .handlers
            .read()
            .await
            .get(addr)
            .cloned()
            .ok_or_else(|| ApmError::Transport(format!("no evaluator listening at {}", addr)))?;
        debug!(addr = %addr, "In-process connection opened");
        Ok(Arc::new(InProcessConnection {
            addr: addr.to_string(),
            handler,
        }))
    }
}

struct InProcessConnection {
    addr: String,
    handler: Arc<dyn SummaryHandler>,
}

#[async_trait]
impl Connection for InProcessConnection {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.handler
            .handle_summary(&payload)
            .await
            .map(|_| ())
            .map_err(|e| ApmError::Forward(format!("{}: {}", self.addr, e)))
    }
}

// ============================================================================
// HTTP 传输
// ============================================================================

/// 告警端接收汇总的路径
pub const SUMMARY_PATH: &str = "/api/v1/summaries";

/// HTTP 传输：把汇总 POST 到 `http://{addr}/api/v1/summaries`
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApmError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn Connection>> {
        let url = if addr.starts_with("http://") || addr.starts_with("https://") {
            format!("{}{}", addr.trim_end_matches('/'), SUMMARY_PATH)
        } else {
            format!("http://{}{}", addr, SUMMARY_PATH)
        };
        Ok(Arc::new(HttpConnection {
            addr: addr.to_string(),
            url,
            client: self.client.clone(),
        }))
    }
}

struct HttpConnection {
    addr: String,
    url: String,
    client: reqwest::Client,
}

#[async_trait]
impl Connection for HttpConnection {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| ApmError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ApmError::Forward(format!(
                "{} responded with {}",
                self.addr,
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        received: AtomicUsize,
    }

    #[async_trait]
    impl SummaryHandler for CountingHandler {
        async fn handle_summary(&self, payload: &[u8]) -> Result<usize> {
            self.received.fetch_add(payload.len(), Ordering::SeqCst);
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_in_process_transport() {
        let transport = InProcessTransport::new();
        let handler = Arc::new(CountingHandler::default());
        transport.register("eval-1", handler.clone()).await;

        let conn = transport.connect("eval-1").await.unwrap();
        assert_eq!(conn.addr(), "eval-1");
        conn.send(b"abc".to_vec()).await.unwrap();
        assert_eq!(handler.received.load(Ordering::SeqCst), 3);

        assert!(transport.connect("eval-2").await.is_err());
        assert!(transport.unregister("eval-1").await);
        assert!(transport.connect("eval-1").await.is_err());
    }

    #[tokio::test]
    async fn test_http_connect_builds_url() {
        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let conn = transport.connect("10.0.0.1:9100").await.unwrap();
        assert_eq!(conn.addr(), "10.0.0.1:9100");
    }
}
