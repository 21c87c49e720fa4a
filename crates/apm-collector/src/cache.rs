use apm_types::{
    round_to_minute, Accumulator, Dimension, MetricFamily, MinuteSummary, Point, SummaryEntry,
};
use std::collections::BTreeMap;

type MinuteEntries = BTreeMap<(Dimension, MetricFamily), Accumulator>;

/// 一级聚合缓存：分钟 → （维度，指标族）→ 累加器
///
/// 同一分钟、同一维度的数据点在插入时合并。
#[derive(Debug, Default)]
pub struct MinuteCache {
    minutes: BTreeMap<i64, MinuteEntries>,
}

impl MinuteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一个数据点，形状不匹配时返回 false
    pub fn merge(&mut self, point: &Point) -> bool {
        if point.check_shape().is_err() {
            return false;
        }
        let minute = round_to_minute(point.minute);
        let entries = self.minutes.entry(minute).or_default();
        match entries.get_mut(&(point.entity.dimension.clone(), point.family)) {
            Some(acc) => acc.merge(&point.sample),
            None => {
                entries.insert((point.entity.dimension.clone(), point.family), point.sample);
                true
            }
        }
    }

    /// 满足 `now >= minute + defer` 的分钟，从旧到新
    pub fn due(&self, now: i64, defer_secs: i64) -> Vec<i64> {
        self.minutes
            .keys()
            .copied()
            .take_while(|minute| now >= minute.saturating_add(defer_secs))
            .collect()
    }

    /// 生成某分钟的汇总，不移除缓存
    pub fn summary(&self, app_name: &str, minute: i64) -> Option<MinuteSummary> {
        let entries = self.minutes.get(&minute)?;
        let mut summary = MinuteSummary::new(app_name, minute);
        summary.entries = entries
            .iter()
            .map(|((dimension, family), sample)| SummaryEntry {
                dimension: dimension.clone(),
                family: *family,
                sample: *sample,
            })
            .collect();
        Some(summary)
    }

    pub fn remove(&mut self, minute: i64) -> bool {
        self.minutes.remove(&minute).is_some()
    }

    /// 缓存中的分钟数
    pub fn len(&self) -> usize {
        self.minutes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty()
    }

    /// 全部分钟的条目总数
    pub fn entry_count(&self) -> usize {
        self.minutes.values().map(|e| e.len()).sum()
    }
}
