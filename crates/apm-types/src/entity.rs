use serde::{Deserialize, Serialize};
use std::fmt;

/// 应用内的聚合维度
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum Dimension {
    /// 应用整体
    App,
    /// 单个探针实例
    Agent(String),
    /// 单个接口
    Api(String),
    /// 单条 SQL 语句
    Sql(i32),
}

impl Dimension {
    pub fn is_app(&self) -> bool {
        matches!(self, Dimension::App)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::App => f.write_str("app"),
            Dimension::Agent(id) => write!(f, "agent:{}", id),
            Dimension::Api(path) => write!(f, "api:{}", path),
            Dimension::Sql(id) => write!(f, "sql:{}", id),
        }
    }
}

/// 被监控实体的标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub app_name: String,
    pub dimension: Dimension,
}

impl EntityKey {
    pub fn new(app_name: impl Into<String>, dimension: Dimension) -> Self {
        Self {
            app_name: app_name.into(),
            dimension,
        }
    }

    pub fn app(app_name: impl Into<String>) -> Self {
        Self::new(app_name, Dimension::App)
    }

    pub fn api(app_name: impl Into<String>, api: impl Into<String>) -> Self {
        Self::new(app_name, Dimension::Api(api.into()))
    }

    pub fn agent(app_name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::new(app_name, Dimension::Agent(agent.into()))
    }

    pub fn sql(app_name: impl Into<String>, sql_id: i32) -> Self {
        Self::new(app_name, Dimension::Sql(sql_id))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dimension {
            Dimension::App => f.write_str(&self.app_name),
            dim => write!(f, "{}/{}", self.app_name, dim),
        }
    }
}
