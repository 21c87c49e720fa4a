pub mod directory;
pub mod history;
pub mod manager;
pub mod message;
pub mod notifier;
pub mod providers;

pub use directory::{Contact, UserDirectory};
pub use history::{AlertHistory, DEFAULT_HISTORY_CAPACITY};
pub use manager::NotifyManager;
pub use message::{AlertNotice, NoticeKind};
pub use notifier::{Notifier, SendReport};
pub use providers::{
    EmailConfig, EmailNotifier, LogNotifier, SmsConfig, SmsNotifier, WebhookConfig,
    WebhookNotifier,
};
