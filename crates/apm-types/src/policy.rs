use crate::metric::MetricType;
use serde::{Deserialize, Serialize};

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// 大于
    Greater,
    /// 小于
    Less,
    /// 等于
    Equal,
}

impl CompareOp {
    /// 策略库编码：1 = 大于，2 = 小于，3 = 等于
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(CompareOp::Greater),
            2 => Some(CompareOp::Less),
            3 => Some(CompareOp::Equal),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            CompareOp::Greater => 1,
            CompareOp::Less => 2,
            CompareOp::Equal => 3,
        }
    }

    pub fn matches(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Greater => value > threshold,
            CompareOp::Less => value < threshold,
            CompareOp::Equal => value == threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Greater => ">",
            CompareOp::Less => "<",
            CompareOp::Equal => "==",
        }
    }
}

/// 已解析的单条告警策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub metric_type: MetricType,
    pub compare: CompareOp,
    pub threshold: f64,
    /// 窗口时长（分钟）
    pub duration_minutes: u32,
    pub unit: String,
}

impl Policy {
    pub fn is_breach(&self, value: f64) -> bool {
        self.compare.matches(value, self.threshold)
    }

    /// 复制比较方式、时长与单位，只替换阈值
    pub fn with_threshold(&self, threshold: f64) -> Self {
        Self {
            threshold,
            ..self.clone()
        }
    }
}

/// 策略库中的一行规则，指标按外部名称引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRow {
    pub name: String,
    pub compare: i32,
    pub threshold: f64,
    pub duration: i64,
    #[serde(default)]
    pub unit: String,
}

/// 接口级阈值覆盖中的一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRow {
    pub name: String,
    pub threshold: f64,
}

/// 针对某个接口的阈值覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiOverride {
    pub api: String,
    pub rules: Vec<OverrideRow>,
}

/// 单个应用的自定义策略记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub app_name: String,
    /// 更新时间戳，作为版本号
    pub version: i64,
    pub channel: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleRow>,
    #[serde(default)]
    pub api_overrides: Vec<ApiOverride>,
}

/// 默认策略模板，应用于没有自定义策略的已知应用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultTemplate {
    pub channel: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleRow>,
}

impl DefaultTemplate {
    /// 为指定应用生成版本号为 0 的策略记录
    pub fn to_record(&self, app_name: &str) -> PolicyRecord {
        PolicyRecord {
            app_name: app_name.to_string(),
            version: 0,
            channel: self.channel.clone(),
            recipients: self.recipients.clone(),
            rules: self.rules.clone(),
            api_overrides: Vec::new(),
        }
    }
}

/// 一次拉取得到的完整策略快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    #[serde(default)]
    pub defaults: Option<DefaultTemplate>,
    #[serde(default)]
    pub known_apps: Vec<String>,
    #[serde(default)]
    pub records: Vec<PolicyRecord>,
}

impl PolicySnapshot {
    /// 合并自定义记录与默认模板，自定义记录优先
    pub fn effective_records(&self) -> Vec<PolicyRecord> {
        let mut out = self.records.clone();
        if let Some(defaults) = &self.defaults {
            for app in &self.known_apps {
                if !self.records.iter().any(|r| &r.app_name == app) {
                    out.push(defaults.to_record(app));
                }
            }
        }
        out
    }
}
