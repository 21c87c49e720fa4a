use crate::bucket::Accumulator;
use crate::entity::{Dimension, EntityKey};
use crate::metric::{MetricFamily, MetricType};
use serde::{Deserialize, Serialize};

/// 默认最多接受一天前的数据点
pub const DEFAULT_MAX_AGE_SECS: i64 = 86_400;

/// 默认最多接受五分钟后的数据点
pub const DEFAULT_MAX_AHEAD_SECS: i64 = 300;

/// 数据点时间戳相对当前时间的可接受范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub max_ahead_secs: i64,
    pub max_age_secs: i64,
}

impl TimeBounds {
    pub fn new(max_ahead_secs: i64, max_age_secs: i64) -> Self {
        Self {
            max_ahead_secs,
            max_age_secs,
        }
    }

    /// `now - max_age <= ts <= now + max_ahead`
    pub fn contains(&self, ts: i64, now: i64) -> bool {
        ts <= now.saturating_add(self.max_ahead_secs) && ts >= now.saturating_sub(self.max_age_secs)
    }
}

impl Default for TimeBounds {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AHEAD_SECS, DEFAULT_MAX_AGE_SECS)
    }
}

/// 一个分钟数据点
///
/// 采集端解码后的增量计数，按实体、指标族与分钟时间戳归档。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub entity: EntityKey,
    pub family: MetricFamily,
    /// 分钟时间戳（秒）
    pub minute: i64,
    pub sample: Accumulator,
}

impl Point {
    pub fn new(entity: EntityKey, family: MetricFamily, minute: i64, sample: Accumulator) -> Self {
        Self {
            entity,
            family,
            minute,
            sample,
        }
    }

    /// 校验指标族与样本形状是否一致
    pub fn check_shape(&self) -> Result<(), String> {
        if self.family.shape() != self.sample.shape() {
            return Err(format!(
                "family {} expects {:?} samples, got {:?}",
                self.family,
                self.family.shape(),
                self.sample.shape()
            ));
        }
        Ok(())
    }

    /// 校验时间戳是否落在 `bounds` 允许的范围内
    pub fn check_time(&self, now: i64, bounds: &TimeBounds) -> Result<(), String> {
        if bounds.contains(self.minute, now) {
            Ok(())
        } else {
            Err(format!(
                "timestamp {} outside accepted range around {}",
                self.minute, now
            ))
        }
    }

    /// 校验形状与分钟对齐
    pub fn validate(&self) -> Result<(), String> {
        self.check_shape()?;
        if self.minute % 60 != 0 {
            return Err(format!("timestamp {} is not minute aligned", self.minute));
        }
        Ok(())
    }
}

/// 分钟汇总中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub dimension: Dimension,
    pub family: MetricFamily,
    pub sample: Accumulator,
}

/// 一个应用一分钟的汇总，由采集端转发给告警端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteSummary {
    pub app_name: String,
    pub minute: i64,
    pub entries: Vec<SummaryEntry>,
}

impl MinuteSummary {
    pub fn new(app_name: impl Into<String>, minute: i64) -> Self {
        Self {
            app_name: app_name.into(),
            minute,
            entries: Vec::new(),
        }
    }

    /// 展开为数据点
    pub fn into_points(self) -> impl Iterator<Item = Point> {
        let app = self.app_name;
        let minute = self.minute;
        self.entries.into_iter().map(move |e| Point {
            entity: EntityKey::new(app.clone(), e.dimension),
            family: e.family,
            minute,
            sample: e.sample,
        })
    }
}

/// 告警或恢复消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub entity: EntityKey,
    pub metric_type: MetricType,
    pub computed_value: f64,
    pub threshold_value: f64,
    pub unit: String,
    pub is_recovery: bool,
    pub channel: String,
    pub recipients: Vec<String>,
    pub alert_id: i64,
    /// 秒级时间戳
    pub timestamp: i64,
}

impl AlertMessage {
    pub fn kind(&self) -> &'static str {
        if self.is_recovery {
            "recovery"
        } else {
            "alarm"
        }
    }
}
