pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, ENV_PREFIX};
pub use model::{
    AlertingConfig, ApmConfig, CollectorConfig, EmailSection, LoggingConfig, NotifyConfig,
    PolicyConfig, ServerConfig, SmsSection, SystemConfig, TickerConfig, WebhookSection,
    WorkerConfig,
};
