use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 用户联系方式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub mobile: String,
}

/// 用户目录：用户 ID → 联系方式
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, Contact>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, id: impl Into<String>, contact: Contact) {
        self.users.write().await.insert(id.into(), contact);
    }

    pub async fn remove(&self, id: &str) -> Option<Contact> {
        self.users.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Contact> {
        self.users.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// 整体替换目录内容
    pub async fn refresh(&self, users: HashMap<String, Contact>) {
        let count = users.len();
        *self.users.write().await = users;
        info!(users = count, "User directory refreshed");
    }

    /// 把接收人 ID 解析成渠道地址
    ///
    /// `email` 渠道取邮箱，其余渠道取手机号；未知用户或空地址被跳过。
    pub async fn resolve(&self, ids: &[String], channel: &str) -> Vec<String> {
        let users = self.users.read().await;
        let mut addrs = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(contact) = users.get(id) else {
                debug!(user = %id, "Recipient not found in directory");
                continue;
            };
            let addr = if channel == "email" {
                &contact.email
            } else {
                &contact.mobile
            };
            if addr.is_empty() {
                debug!(user = %id, channel = %channel, "Recipient has no address for channel");
                continue;
            }
            addrs.push(addr.clone());
        }

        addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(email: &str, mobile: &str) -> Contact {
        Contact {
            email: email.to_string(),
            mobile: mobile.to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_by_channel() {
        let directory = UserDirectory::new();
        directory.upsert("u1", contact("a@example.com", "13800000001")).await;
        directory.upsert("u2", contact("", "13800000002")).await;

        let ids = vec!["u1".to_string(), "u2".to_string(), "ghost".to_string()];
        assert_eq!(directory.resolve(&ids, "email").await, vec!["a@example.com"]);
        assert_eq!(
            directory.resolve(&ids, "sms").await,
            vec!["13800000001", "13800000002"]
        );
    }

    #[tokio::test]
    async fn test_refresh_replaces() {
        let directory = UserDirectory::new();
        directory.upsert("old", contact("o@example.com", "")).await;

        let mut users = HashMap::new();
        users.insert("new".to_string(), contact("n@example.com", ""));
        directory.refresh(users).await;

        assert_eq!(directory.len().await, 1);
        assert!(directory.get("old").await.is_none());
        assert!(directory.remove("new").await.is_some());
    }
}
