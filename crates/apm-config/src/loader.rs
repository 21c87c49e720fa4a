use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use crate::ApmConfig;

/// 环境变量前缀，如 `APM__ALERTING__MAX_ALARM_COUNT=5`
pub const ENV_PREFIX: &str = "APM";

/// 配置加载器
///
/// TOML 文件为底，`APM__` 前缀的环境变量覆盖；文件不存在时使用默认值。
pub struct ConfigLoader {
    path: PathBuf,
    use_env: bool,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            use_env: true,
        }
    }

    /// 不读取环境变量
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载并校验配置
    pub fn load(&self) -> Result<ApmConfig> {
        let mut builder = Config::builder();

        if self.path.exists() {
            builder = builder.add_source(File::new(
                self.path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ));
        }

        if self.use_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: ApmConfig = builder.build()?.try_deserialize()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(config: &ApmConfig) -> Result<()> {
        if config.ticker.interval_secs == 0 {
            return Err(anyhow!("ticker.interval_secs must be greater than 0"));
        }
        if config.ticker.pool_size == 0 {
            return Err(anyhow!("ticker.pool_size must be greater than 0"));
        }
        if config.worker.queue_capacity == 0 {
            return Err(anyhow!("worker.queue_capacity must be greater than 0"));
        }
        if config.worker.max_workers == 0 {
            return Err(anyhow!("worker.max_workers must be greater than 0"));
        }
        if config.worker.max_point_age_secs == 0 {
            return Err(anyhow!("worker.max_point_age_secs must be greater than 0"));
        }
        if config.alerting.alarm_interval_secs == 0 {
            return Err(anyhow!("alerting.alarm_interval_secs must be greater than 0"));
        }
        if config.alerting.max_alarm_count == 0 {
            return Err(anyhow!("alerting.max_alarm_count must be greater than 0"));
        }
        if config.policy.reload_interval_secs == 0 {
            return Err(anyhow!("policy.reload_interval_secs must be greater than 0"));
        }
        if config.collector.flush_interval_secs == 0 {
            return Err(anyhow!("collector.flush_interval_secs must be greater than 0"));
        }
        if config.collector.virtual_nodes == 0 {
            return Err(anyhow!("collector.virtual_nodes must be greater than 0"));
        }

        Ok(())
    }

    /// 序列化为 TOML，用于生成示例配置
    pub fn to_toml(config: &ApmConfig) -> Result<String> {
        Ok(toml::to_string_pretty(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlertingConfig;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let loader = ConfigLoader::new(temp_dir.path().join("apm.toml")).without_env();

        let config = loader.load().unwrap();
        assert_eq!(config, ApmConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("apm.toml");
        let content = r#"
[system]
name = "apm-test"
instance = "10.0.0.5:9100"

[alerting]
alarm_interval_secs = 120
max_alarm_count = 5

[collector]
defer_secs = 60
evaluators = ["10.0.0.5:9100", "10.0.0.6:9100"]

[notify]
channels = ["sms"]

[notify.sms]
gateway_url = "http://gateway.local/send"
center_id = "12"

[logging]
level = "debug"
json = true
"#;
        fs::write(&path, content).unwrap();

        let config = ConfigLoader::new(&path).without_env().load().unwrap();
        assert_eq!(config.system.name, "apm-test");
        assert_eq!(config.alerting.alarm_interval_secs, 120);
        assert_eq!(config.alerting.max_alarm_count, 5);
        // 未出现的字段保持默认
        assert_eq!(config.alerting.detail_url, AlertingConfig::default().detail_url);
        assert_eq!(config.collector.evaluators.len(), 2);
        assert_eq!(config.collector.virtual_nodes, 160);
        assert_eq!(config.notify.sms.unwrap().center_id, "12");
        assert!(config.notify.email.is_none());
        assert!(config.logging.json);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("apm.toml");
        fs::write(&path, "[alerting]\nmax_alarm_count = 0\n").unwrap();
        assert!(ConfigLoader::new(&path).without_env().load().is_err());

        let mut config = ApmConfig::default();
        config.worker.queue_capacity = 0;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = ApmConfig::default();
        config.ticker.interval_secs = 0;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = ApmConfig::default();
        config.worker.max_point_age_secs = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let text = ConfigLoader::to_toml(&ApmConfig::default()).unwrap();
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("apm.toml");
        fs::write(&path, text).unwrap();

        let config = ConfigLoader::new(&path).without_env().load().unwrap();
        assert_eq!(config, ApmConfig::default());
    }
}
