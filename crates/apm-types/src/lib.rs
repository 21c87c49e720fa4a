pub mod bucket;
pub mod entity;
pub mod message;
pub mod metric;
pub mod policy;

pub use bucket::{Accumulator, Counters, CpuLoad, HeapUsage, Shape};
pub use entity::{Dimension, EntityKey};
pub use message::{
    AlertMessage, MinuteSummary, Point, SummaryEntry, TimeBounds, DEFAULT_MAX_AGE_SECS,
    DEFAULT_MAX_AHEAD_SECS,
};
pub use metric::{MetricFamily, MetricStrategy, MetricType};
pub use policy::{
    ApiOverride, CompareOp, DefaultTemplate, OverrideRow, Policy, PolicyRecord, PolicySnapshot,
    RuleRow,
};

/// 将秒级时间戳向下取整到分钟，下限处饱和
pub fn round_to_minute(ts: i64) -> i64 {
    ts.saturating_sub(ts.rem_euclid(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_minute() {
        assert_eq!(round_to_minute(0), 0);
        assert_eq!(round_to_minute(59), 0);
        assert_eq!(round_to_minute(60), 60);
        assert_eq!(round_to_minute(1_700_000_123), 1_700_000_100);
        assert_eq!(round_to_minute(-1), -60);
        assert_eq!(round_to_minute(i64::MIN), i64::MIN);
    }
}
