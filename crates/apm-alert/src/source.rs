use apm_core::{ApmError, Result};
use apm_types::PolicySnapshot;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// 策略库
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// 拉取完整策略快照
    async fn fetch(&self) -> Result<PolicySnapshot>;
}

/// 内存中的策略快照，由调用方直接替换
#[derive(Default)]
pub struct StaticPolicySource {
    snapshot: RwLock<PolicySnapshot>,
}

impl StaticPolicySource {
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub async fn set(&self, snapshot: PolicySnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn fetch(&self) -> Result<PolicySnapshot> {
        Ok(self.snapshot.read().await.clone())
    }
}

/// 从 JSON 文件读取策略快照
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicySource for FilePolicySource {
    async fn fetch(&self) -> Result<PolicySnapshot> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let snapshot: PolicySnapshot = serde_json::from_str(&content).map_err(|e| {
            ApmError::Policy(format!("{}: {}", self.path.display(), e))
        })?;
        debug!(
            path = %self.path.display(),
            records = snapshot.records.len(),
            known_apps = snapshot.known_apps.len(),
            "Policy snapshot loaded"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticPolicySource::default();
        assert!(source.fetch().await.unwrap().records.is_empty());

        source
            .set(PolicySnapshot {
                known_apps: vec!["shop".to_string()],
                ..PolicySnapshot::default()
            })
            .await;
        assert_eq!(source.fetch().await.unwrap().known_apps, vec!["shop"]);
    }

    #[tokio::test]
    async fn test_file_source() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "defaults": {{
                    "channel": "email",
                    "recipients": ["ops"],
                    "rules": [{{"name": "apm.api_error.ratio", "compare": 1, "threshold": 5.0, "duration": 5, "unit": "%"}}]
                }},
                "known_apps": ["shop", "pay"],
                "records": [{{
                    "app_name": "shop",
                    "version": 1700000000,
                    "channel": "sms",
                    "recipients": ["u1"],
                    "rules": [{{"name": "apm.api.duration", "compare": 1, "threshold": 500, "duration": 3}}],
                    "api_overrides": [{{"api": "/checkout", "rules": [{{"name": "apm.api.duration", "threshold": 2000}}]}}]
                }}]
            }}"#
        )
        .unwrap();

        let snapshot = FilePolicySource::new(file.path()).fetch().await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].api_overrides[0].api, "/checkout");
        assert_eq!(snapshot.effective_records().len(), 2);
    }

    #[tokio::test]
    async fn test_file_source_errors() {
        let missing = FilePolicySource::new("/nonexistent/policies.json");
        assert!(matches!(missing.fetch().await, Err(ApmError::Io(_))));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let bad = FilePolicySource::new(file.path());
        assert!(matches!(bad.fetch().await, Err(ApmError::Policy(_))));
    }
}
