use apm_types::{round_to_minute, Accumulator};
use std::collections::BTreeMap;

/// 单个（实体，指标）的分钟桶存储
///
/// 以分钟时间戳为键，同一分钟的数据点合并累加。
#[derive(Debug, Clone, Default)]
pub struct BucketStore {
    buckets: BTreeMap<i64, Accumulator>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一个数据点，时间戳先向下取整到分钟
    ///
    /// 形状与已有桶不一致时丢弃并返回 false。
    pub fn merge(&mut self, minute: i64, sample: &Accumulator) -> bool {
        let minute = round_to_minute(minute);
        match self.buckets.get_mut(&minute) {
            Some(existing) => existing.merge(sample),
            None => {
                self.buckets.insert(minute, *sample);
                true
            }
        }
    }

    /// 最早的时间戳
    pub fn first(&self) -> Option<i64> {
        self.buckets.keys().next().copied()
    }

    /// 最晚的时间戳
    pub fn last(&self) -> Option<i64> {
        self.buckets.keys().next_back().copied()
    }

    pub fn get(&self, minute: i64) -> Option<&Accumulator> {
        self.buckets.get(&minute)
    }

    pub fn remove(&mut self, minute: i64) -> Option<Accumulator> {
        self.buckets.remove(&minute)
    }

    /// 是否存在时间戳不早于 `ts` 的桶
    pub fn has_at_or_after(&self, ts: i64) -> bool {
        self.buckets.range(ts..).next().is_some()
    }

    /// 对 `[start, end)` 区间内存在的桶求和，返回和与实际存在的桶数
    pub fn sum_range(&self, start: i64, end: i64) -> Option<(Accumulator, usize)> {
        let mut iter = self.buckets.range(start..end);
        let (_, first) = iter.next()?;
        let mut sum = *first;
        let mut present = 1;
        for (_, acc) in iter {
            if sum.merge(acc) {
                present += 1;
            }
        }
        Some((sum, present))
    }

    /// 丢弃早于 `ts` 的所有桶，返回丢弃数量
    pub fn discard_before(&mut self, ts: i64) -> usize {
        let keep = self.buckets.split_off(&ts);
        let discarded = self.buckets.len();
        self.buckets = keep;
        discarded
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.buckets.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_types::{Counters, HeapUsage};

    fn counters(count: u64, err: u64) -> Accumulator {
        Counters::new(count, err, count * 10).into()
    }

    #[test]
    fn test_merge_into_same_minute() {
        let mut store = BucketStore::new();
        assert!(store.merge(120, &counters(1, 0)));
        assert!(store.merge(125, &counters(2, 1)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(120), Some(&counters(3, 1)));
    }

    #[test]
    fn test_merge_rejects_other_shape() {
        let mut store = BucketStore::new();
        store.merge(60, &counters(1, 0));
        assert!(!store.merge(60, &HeapUsage::new(1, 1).into()));
        assert_eq!(store.get(60), Some(&counters(1, 0)));
    }

    #[test]
    fn test_merge_order_does_not_change_sum() {
        let points = [(0, counters(3, 1)), (60, counters(5, 0)), (0, counters(2, 2)), (120, counters(1, 1))];

        let mut a = BucketStore::new();
        for (ts, p) in &points {
            a.merge(*ts, p);
        }
        let mut b = BucketStore::new();
        for (ts, p) in points.iter().rev() {
            b.merge(*ts, p);
        }

        assert_eq!(a.sum_range(0, 180), b.sum_range(0, 180));
        assert_eq!(a.sum_range(0, 180), Some((counters(11, 4), 3)));
    }

    #[test]
    fn test_sum_range_skips_absent_minutes() {
        let mut store = BucketStore::new();
        store.merge(0, &counters(10, 1));
        store.merge(240, &counters(10, 1));
        store.merge(600, &counters(10, 1));

        assert_eq!(store.sum_range(0, 300), Some((counters(20, 2), 2)));
        assert_eq!(store.sum_range(300, 600), None);
    }

    #[test]
    fn test_discard_before() {
        let mut store = BucketStore::new();
        for minute in 0..5 {
            store.merge(minute * 60, &counters(1, 0));
        }
        assert_eq!(store.discard_before(180), 3);
        assert_eq!(store.first(), Some(180));
        assert_eq!(store.last(), Some(240));
        assert!(store.has_at_or_after(240));
        assert!(!store.has_at_or_after(241));
    }

    #[test]
    fn test_counters_saturate_instead_of_wrapping() {
        let mut store = BucketStore::new();
        store.merge(60, &Counters::new(u64::MAX, 0, 0).into());
        store.merge(60, &Counters::new(1, 0, 0).into());
        store.merge(120, &Counters::new(u64::MAX, 1, 0).into());

        assert_eq!(store.get(60), Some(&Accumulator::from(Counters::new(u64::MAX, 0, 0))));
        let (sum, present) = store.sum_range(60, 180).unwrap();
        assert_eq!(present, 2);
        assert_eq!(sum, Accumulator::from(Counters::new(u64::MAX, 1, 0)));
    }
}
