use crate::store::BucketStore;
use apm_types::{round_to_minute, Accumulator, MetricType};
use tracing::debug;

const MINUTE: i64 = 60;

/// 一个已就绪的窗口
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// 窗口起点（最早的桶）
    pub first: i64,
    pub duration_minutes: u32,
    /// 窗口内存在的桶之和
    pub sum: Accumulator,
    /// 窗口内实际存在的桶数
    pub present: usize,
    /// 数据不完整，按超时强制计算
    pub lost_data: bool,
}

impl Window {
    /// 推导指标值，分母为零时没有值
    pub fn value(&self, metric: MetricType) -> Option<f64> {
        metric.derive(&self.sum, self.duration_minutes)
    }
}

/// 窗口计算结果
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    /// 存储为空
    Empty,
    /// 还在等待数据
    Pending,
    Ready(Window),
}

impl WindowOutcome {
    pub fn ready(self) -> Option<Window> {
        match self {
            WindowOutcome::Ready(w) => Some(w),
            _ => None,
        }
    }
}

/// 滑动窗口聚合器
///
/// 每次计算最多滑动一个桶；判定数据丢失时一次性丢弃整个窗口范围。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAggregator {
    duration_minutes: u32,
}

impl WindowAggregator {
    pub fn new(duration_minutes: u32) -> Self {
        Self {
            duration_minutes: duration_minutes.max(1),
        }
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    fn span(&self) -> i64 {
        self.duration_minutes as i64 * MINUTE
    }

    /// 判断窗口是否就绪，就绪时求和并淘汰已消费的桶
    ///
    /// # 参数
    /// * `store` - 该（实体，指标）的分钟桶
    /// * `now` - 当前时间（秒）
    pub fn poll(&self, store: &mut BucketStore, now: i64) -> WindowOutcome {
        let first = match store.first() {
            Some(first) => first,
            None => return WindowOutcome::Empty,
        };

        // 接近 i64 上限时饱和
        let end = first.saturating_add(self.span());
        let complete = store.has_at_or_after(end.saturating_sub(MINUTE));
        // 额外一分钟宽限
        let stale = !complete && round_to_minute(now) >= end.saturating_add(MINUTE);
        if !complete && !stale {
            return WindowOutcome::Pending;
        }

        let (sum, present) = match store.sum_range(first, end) {
            Some(s) => s,
            None => return WindowOutcome::Pending,
        };

        if stale {
            let discarded = store.discard_before(end);
            debug!(
                first,
                duration = self.duration_minutes,
                present,
                discarded,
                "Window evaluated with lost data"
            );
        } else {
            store.remove(first);
        }

        WindowOutcome::Ready(Window {
            first,
            duration_minutes: self.duration_minutes,
            sum,
            present,
            lost_data: stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_types::Counters;

    const T0: i64 = 1_700_000_040;

    fn counters(count: u64, err: u64) -> Accumulator {
        Counters::new(count, err, count * 100).into()
    }

    #[test]
    fn test_empty_store() {
        let mut store = BucketStore::new();
        assert_eq!(WindowAggregator::new(5).poll(&mut store, T0), WindowOutcome::Empty);
    }

    #[test]
    fn test_complete_window_slides_one_bucket() {
        let mut store = BucketStore::new();
        for i in 0..5 {
            store.merge(T0 + i * 60, &counters(10, 1));
        }
        let agg = WindowAggregator::new(5);

        let window = agg.poll(&mut store, T0 + 5 * 60).ready().unwrap();
        assert_eq!(window.first, T0);
        assert_eq!(window.present, 5);
        assert!(!window.lost_data);
        let ratio = window.value(MetricType::ApiErrorRatio).unwrap();
        assert!((ratio - 10.0).abs() < 1e-9);

        assert_eq!(store.len(), 4);
        assert_eq!(store.first(), Some(T0 + 60));

        // 剩余四个桶不足以构成完整窗口
        assert_eq!(agg.poll(&mut store, T0 + 5 * 60), WindowOutcome::Pending);
    }

    #[test]
    fn test_pending_until_grace_elapsed() {
        let mut store = BucketStore::new();
        store.merge(T0, &counters(10, 1));
        let agg = WindowAggregator::new(5);

        assert_eq!(agg.poll(&mut store, T0 + 5 * 60 + 59), WindowOutcome::Pending);
        assert_eq!(store.len(), 1);

        let window = agg.poll(&mut store, T0 + 6 * 60).ready().unwrap();
        assert!(window.lost_data);
        assert!(store.is_empty());
    }

    #[test]
    fn test_lost_data_window_consumes_whole_range() {
        let mut store = BucketStore::new();
        for offset in [0, 2, 3] {
            store.merge(T0 + offset * 60, &counters(10, 2));
        }
        // 窗口外的桶保留
        store.merge(T0 + 6 * 60, &counters(7, 0));

        let agg = WindowAggregator::new(5);
        let window = agg.poll(&mut store, T0 + 6 * 60).ready().unwrap();
        assert!(!window.lost_data);

        let mut store = BucketStore::new();
        for offset in [0, 2, 3] {
            store.merge(T0 + offset * 60, &counters(10, 2));
        }
        let window = agg.poll(&mut store, T0 + 5 * 60 + 60).ready().unwrap();
        assert!(window.lost_data);
        assert_eq!(window.present, 3);
        assert_eq!(window.sum, counters(30, 6));
        assert!(store.is_empty());
    }

    #[test]
    fn test_late_bucket_completes_window() {
        let mut store = BucketStore::new();
        for offset in [0, 2, 4] {
            store.merge(T0 + offset * 60, &counters(10, 1));
        }
        let agg = WindowAggregator::new(5);

        let window = agg.poll(&mut store, T0 + 4 * 60).ready().unwrap();
        assert!(!window.lost_data);
        assert_eq!(window.present, 3);
        assert_eq!(store.first(), Some(T0 + 2 * 60));
    }

    #[test]
    fn test_duration_one_is_immediate() {
        let mut store = BucketStore::new();
        store.merge(T0, &counters(4, 0));
        let window = WindowAggregator::new(1).poll(&mut store, T0).ready().unwrap();
        assert_eq!(window.present, 1);
        assert!(!window.lost_data);
        assert!(store.is_empty());
    }

    #[test]
    fn test_zero_count_window_has_no_value() {
        let mut store = BucketStore::new();
        store.merge(T0, &counters(0, 0));
        let window = WindowAggregator::new(1).poll(&mut store, T0).ready().unwrap();
        assert_eq!(window.value(MetricType::ApiErrorRatio), None);
        assert_eq!(window.value(MetricType::ApiDuration), None);
        assert_eq!(window.value(MetricType::ApiCount), Some(0.0));
    }

    #[test]
    fn test_readiness_is_monotonic() {
        let mut store = BucketStore::new();
        store.merge(T0, &counters(1, 0));
        store.merge(T0 + 2 * 60, &counters(1, 0));
        let agg = WindowAggregator::new(3);

        // 后续时间推进不会让已就绪的窗口变回等待
        let mut copy = store.clone();
        assert!(agg.poll(&mut copy, T0).ready().is_some());
        let mut copy = store.clone();
        assert!(agg.poll(&mut copy, T0 + 3600).ready().is_some());
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let top = i64::MAX - i64::MAX.rem_euclid(60);
        for duration in [1, 5, 60] {
            let mut store = BucketStore::new();
            store.merge(top, &counters(1, 0));
            let agg = WindowAggregator::new(duration);
            let window = agg.poll(&mut store, T0).ready().unwrap();
            assert_eq!(window.first, top);
            assert!(store.is_empty());
        }

        let bottom = round_to_minute(i64::MIN + 120);
        let mut store = BucketStore::new();
        store.merge(bottom, &counters(1, 0));
        let window = WindowAggregator::new(5).poll(&mut store, T0).ready().unwrap();
        assert!(window.lost_data);
        assert!(store.is_empty());

        let mut store = BucketStore::new();
        store.merge(T0, &counters(1, 0));
        assert_eq!(
            WindowAggregator::new(5).poll(&mut store, i64::MAX),
            WindowOutcome::Ready(Window {
                first: T0,
                duration_minutes: 5,
                sum: counters(1, 0),
                present: 1,
                lost_data: true,
            })
        );
    }
}
