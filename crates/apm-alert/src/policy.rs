use apm_types::{CompareOp, Dimension, MetricFamily, MetricType, Policy, PolicyRecord, RuleRow};
use std::collections::HashMap;
use tracing::warn;

/// 单个应用解析后的策略集合
///
/// 接口级覆盖在加载时预先解析：复制同类型通用策略的比较方式、时长与单位，只替换阈值。
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySet {
    app_name: String,
    version: i64,
    channel: String,
    recipients: Vec<String>,
    wide: HashMap<MetricType, Policy>,
    overrides: HashMap<String, HashMap<MetricType, Policy>>,
}

/// 解析一行规则，无法解析时返回原因
pub fn parse_rule(row: &RuleRow) -> Result<Policy, String> {
    let metric_type: MetricType = row.name.parse()?;
    let compare = CompareOp::from_code(row.compare)
        .ok_or_else(|| format!("unknown compare code {}", row.compare))?;
    if row.duration < 1 || row.duration > u32::MAX as i64 {
        return Err(format!("invalid duration {}", row.duration));
    }
    if !row.threshold.is_finite() {
        return Err(format!("invalid threshold {}", row.threshold));
    }
    Ok(Policy {
        metric_type,
        compare,
        threshold: row.threshold,
        duration_minutes: row.duration as u32,
        unit: row.unit.clone(),
    })
}

impl PolicySet {
    /// 从策略记录构建，无法解析的条目跳过，其余继续加载
    pub fn from_record(record: &PolicyRecord) -> Self {
        let mut wide = HashMap::new();
        for row in &record.rules {
            match parse_rule(row) {
                Ok(policy) => {
                    if wide.contains_key(&policy.metric_type) {
                        warn!(
                            app = %record.app_name,
                            metric = %policy.metric_type,
                            "Duplicate policy row ignored"
                        );
                        continue;
                    }
                    wide.insert(policy.metric_type, policy);
                }
                Err(reason) => {
                    warn!(app = %record.app_name, rule = %row.name, %reason, "Skipping policy row");
                }
            }
        }

        let mut overrides: HashMap<String, HashMap<MetricType, Policy>> = HashMap::new();
        for api_override in &record.api_overrides {
            for row in &api_override.rules {
                let metric_type = match row.name.parse::<MetricType>() {
                    Ok(m) => m,
                    Err(reason) => {
                        warn!(app = %record.app_name, api = %api_override.api, %reason, "Skipping override row");
                        continue;
                    }
                };
                let universal = match wide.get(&metric_type) {
                    Some(p) => p,
                    None => {
                        warn!(
                            app = %record.app_name,
                            api = %api_override.api,
                            metric = %metric_type,
                            "Override has no matching app-wide policy"
                        );
                        continue;
                    }
                };
                overrides
                    .entry(api_override.api.clone())
                    .or_default()
                    .insert(metric_type, universal.with_threshold(row.threshold));
            }
        }

        Self {
            app_name: record.app_name.clone(),
            version: record.version,
            channel: record.channel.clone(),
            recipients: record.recipients.clone(),
            wide,
            overrides,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn len(&self) -> usize {
        self.wide.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wide.is_empty()
    }

    /// 查找适用的策略，接口级覆盖优先
    pub fn resolve(&self, dimension: &Dimension, metric_type: MetricType) -> Option<&Policy> {
        if let Dimension::Api(api) = dimension {
            if let Some(policy) = self.overrides.get(api).and_then(|m| m.get(&metric_type)) {
                return Some(policy);
            }
        }
        self.wide.get(&metric_type)
    }

    /// 该指标族是否有任何策略
    pub fn accepts(&self, family: MetricFamily) -> bool {
        family
            .metric_types()
            .iter()
            .any(|m| self.wide.contains_key(m))
    }

    /// 该指标族中配置了策略的指标
    pub fn metrics_for(&self, family: MetricFamily) -> impl Iterator<Item = MetricType> + '_ {
        family
            .metric_types()
            .iter()
            .copied()
            .filter(move |m| self.wide.contains_key(m))
    }

    /// 规则是否相同（忽略版本号与通知配置）
    pub fn same_rules(&self, other: &PolicySet) -> bool {
        self.wide == other.wide && self.overrides == other.overrides
    }
}

/// 指标族对应的维度是否匹配
pub fn dimension_matches(family: MetricFamily, dimension: &Dimension) -> bool {
    matches!(
        (family, dimension),
        (MetricFamily::Api, Dimension::Api(_))
            | (MetricFamily::Sql, Dimension::Sql(_))
            | (MetricFamily::Exception, Dimension::App)
            | (MetricFamily::Cpu, Dimension::Agent(_))
            | (MetricFamily::Memory, Dimension::Agent(_))
    )
}
