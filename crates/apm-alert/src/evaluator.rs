use crate::alarm::{AlarmState, RateLimit, Transition};
use crate::id::AlertIdGenerator;
use crate::policy::{dimension_matches, PolicySet};
use apm_core::{EntityWorker, NotificationSink, SharedClock};
use apm_types::{AlertMessage, Dimension, EntityKey, MetricType, Point};
use apm_window::{BucketStore, WindowAggregator, WindowOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

type DimensionKey = (Dimension, MetricType);

/// 评估器状态概览
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluatorStats {
    pub stores: usize,
    pub buckets: usize,
    pub alarm_states: usize,
    pub alarmed: usize,
}

/// 单个应用的二级评估器
///
/// 为每个（维度，指标）维护分钟桶与告警状态。没有适用策略的数据点在入桶前即被丢弃。
pub struct AlertEvaluator {
    app_name: String,
    policies: Arc<PolicySet>,
    limit: RateLimit,
    ids: Arc<AlertIdGenerator>,
    stores: HashMap<DimensionKey, BucketStore>,
    alarms: HashMap<DimensionKey, AlarmState>,
}

impl AlertEvaluator {
    pub fn new(policies: Arc<PolicySet>, limit: RateLimit, ids: Arc<AlertIdGenerator>) -> Self {
        Self {
            app_name: policies.app_name().to_string(),
            policies,
            limit,
            ids,
            stores: HashMap::new(),
            alarms: HashMap::new(),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn policies(&self) -> &Arc<PolicySet> {
        &self.policies
    }

    /// 合并一个数据点，返回写入的指标数
    pub fn ingest(&mut self, point: &Point) -> usize {
        if point.entity.app_name != self.app_name {
            debug!(app = %self.app_name, entity = %point.entity, "Point routed to wrong app");
            return 0;
        }
        if !dimension_matches(point.family, &point.entity.dimension) {
            debug!(entity = %point.entity, family = %point.family, "Dimension does not match family");
            return 0;
        }

        let dimension = &point.entity.dimension;
        let mut merged = 0;
        for metric in self.policies.metrics_for(point.family) {
            if self.policies.resolve(dimension, metric).is_none() {
                continue;
            }
            let store = self
                .stores
                .entry((dimension.clone(), metric))
                .or_default();
            if store.merge(point.minute, &point.sample) {
                merged += 1;
            }
        }
        merged
    }

    /// 对所有缓存的维度执行一次窗口计算，返回需要发送的告警与恢复
    pub fn evaluate(&mut self, now: i64) -> Vec<AlertMessage> {
        let policies = Arc::clone(&self.policies);
        let mut messages = Vec::new();

        for (key, store) in self.stores.iter_mut() {
            let (dimension, metric) = key;
            let policy = match policies.resolve(dimension, *metric) {
                Some(p) => p,
                None => continue,
            };

            let window = match WindowAggregator::new(policy.duration_minutes).poll(store, now) {
                WindowOutcome::Ready(w) => w,
                _ => continue,
            };
            if window.lost_data {
                debug!(
                    app = %self.app_name,
                    dimension = %dimension,
                    metric = %metric,
                    present = window.present,
                    "Window closed with missing minutes"
                );
            }

            // 分母为零时不比较
            let value = match window.value(*metric) {
                Some(v) => v,
                None => continue,
            };
            let breach = policy.is_breach(value);

            let transition = match self.alarms.get_mut(key) {
                Some(state) => state.observe(breach, now, &self.limit),
                None if breach => {
                    let mut state = AlarmState::new();
                    let transition = state.observe(breach, now, &self.limit);
                    self.alarms.insert(key.clone(), state);
                    transition
                }
                None => Transition::Unchanged,
            };

            match transition {
                Transition::Alarm | Transition::Recover => {
                    let message = AlertMessage {
                        entity: EntityKey::new(self.app_name.clone(), dimension.clone()),
                        metric_type: *metric,
                        computed_value: value,
                        threshold_value: policy.threshold,
                        unit: policy.unit.clone(),
                        is_recovery: transition == Transition::Recover,
                        channel: policies.channel().to_string(),
                        recipients: policies.recipients().to_vec(),
                        alert_id: self.ids.next_id(),
                        timestamp: now,
                    };
                    info!(
                        app = %self.app_name,
                        dimension = %dimension,
                        metric = %metric,
                        value,
                        threshold = policy.threshold,
                        kind = message.kind(),
                        alert_id = message.alert_id,
                        "Alert emitted"
                    );
                    messages.push(message);
                }
                Transition::Suppressed => {
                    debug!(
                        app = %self.app_name,
                        dimension = %dimension,
                        metric = %metric,
                        value,
                        "Alarm suppressed by rate limit"
                    );
                }
                Transition::Unchanged => {}
            }
        }

        self.stores.retain(|_, store| !store.is_empty());
        messages
    }

    /// 替换策略；规则发生变化时丢弃全部告警状态与不再适用的分钟桶
    pub fn apply_policies(&mut self, policies: Arc<PolicySet>) {
        let changed = !self.policies.same_rules(&policies);
        self.policies = policies;
        if !changed {
            return;
        }

        let cleared = self.alarms.len();
        self.alarms.clear();
        let policies = Arc::clone(&self.policies);
        self.stores
            .retain(|(dimension, metric), _| policies.resolve(dimension, *metric).is_some());
        info!(
            app = %self.app_name,
            version = self.policies.version(),
            cleared,
            "Policy changed, alarm state reset"
        );
    }

    pub fn alarm_state(&self, dimension: &Dimension, metric: MetricType) -> Option<&AlarmState> {
        self.alarms.get(&(dimension.clone(), metric))
    }

    pub fn store(&self, dimension: &Dimension, metric: MetricType) -> Option<&BucketStore> {
        self.stores.get(&(dimension.clone(), metric))
    }

    pub fn stats(&self) -> EvaluatorStats {
        EvaluatorStats {
            stores: self.stores.len(),
            buckets: self.stores.values().map(BucketStore::len).sum(),
            alarm_states: self.alarms.len(),
            alarmed: self.alarms.values().filter(|s| s.is_alarmed()).count(),
        }
    }

    /// 没有缓存数据且没有未恢复的告警
    pub fn is_idle(&self) -> bool {
        self.stores.is_empty() && !self.alarms.values().any(AlarmState::is_alarmed)
    }
}

/// 评估器的控制消息
pub enum EvaluatorControl {
    /// 策略更新
    Policies(Arc<PolicySet>),
    /// 查询状态
    Stats(oneshot::Sender<EvaluatorStats>),
}

/// 运行在工作者池中的评估器
pub struct EvaluatorWorker {
    evaluator: AlertEvaluator,
    clock: SharedClock,
    sink: Arc<dyn NotificationSink>,
}

impl EvaluatorWorker {
    pub fn new(evaluator: AlertEvaluator, clock: SharedClock, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            evaluator,
            clock,
            sink,
        }
    }
}

#[async_trait]
impl EntityWorker for EvaluatorWorker {
    type Input = Point;
    type Control = EvaluatorControl;

    fn ingest(&mut self, input: Point) {
        self.evaluator.ingest(&input);
    }

    fn apply(&mut self, control: EvaluatorControl) {
        match control {
            EvaluatorControl::Policies(policies) => self.evaluator.apply_policies(policies),
            EvaluatorControl::Stats(reply) => {
                let _ = reply.send(self.evaluator.stats());
            }
        }
    }

    async fn tick(&mut self) {
        let now = self.clock.now();
        for message in self.evaluator.evaluate(now) {
            self.sink.deliver(message).await;
        }
    }

    fn is_idle(&self) -> bool {
        self.evaluator.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apm_types::{Counters, CpuLoad, MetricFamily, PolicyRecord, RuleRow};

    const T0: i64 = 1_700_000_040;

    fn rule(name: &str, compare: i32, threshold: f64, duration: i64) -> RuleRow {
        RuleRow {
            name: name.to_string(),
            compare,
            threshold,
            duration,
            unit: "%".to_string(),
        }
    }

    fn policies(rules: Vec<RuleRow>) -> Arc<PolicySet> {
        Arc::new(PolicySet::from_record(&PolicyRecord {
            app_name: "shop".to_string(),
            version: 1,
            channel: "email".to_string(),
            recipients: vec!["u1".to_string()],
            rules,
            api_overrides: Vec::new(),
        }))
    }

    fn evaluator(rules: Vec<RuleRow>) -> AlertEvaluator {
        AlertEvaluator::new(
            policies(rules),
            RateLimit::default(),
            Arc::new(AlertIdGenerator::starting_at(0)),
        )
    }

    fn api_point(minute: i64, count: u64, err: u64) -> Point {
        Point::new(
            EntityKey::api("shop", "/pay"),
            MetricFamily::Api,
            minute,
            Counters::new(count, err, count * 100).into(),
        )
    }

    #[test]
    fn test_points_without_policy_are_filtered() {
        let mut eval = evaluator(vec![rule("apm.api_error.ratio", 1, 5.0, 1)]);

        let cpu = Point::new(
            EntityKey::agent("shop", "a1"),
            MetricFamily::Cpu,
            T0,
            CpuLoad::new(0.5, 0.1, 1).into(),
        );
        assert_eq!(eval.ingest(&cpu), 0);

        let other_app = Point {
            entity: EntityKey::api("pay", "/pay"),
            ..api_point(T0, 1, 0)
        };
        assert_eq!(eval.ingest(&other_app), 0);

        assert_eq!(eval.ingest(&api_point(T0, 1, 0)), 1);
        assert_eq!(eval.stats().stores, 1);
    }

    #[test]
    fn test_alarm_and_recovery() {
        let mut eval = evaluator(vec![rule("apm.api_error.ratio", 1, 5.0, 1)]);
        let dim = Dimension::Api("/pay".to_string());

        eval.ingest(&api_point(T0, 10, 1));
        let messages = eval.evaluate(T0 + 60);
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].is_recovery);
        assert_eq!(messages[0].alert_id, 1);
        assert_eq!(messages[0].channel, "email");
        assert!((messages[0].computed_value - 10.0).abs() < 1e-9);
        assert!(eval.alarm_state(&dim, MetricType::ApiErrorRatio).unwrap().is_alarmed());

        eval.ingest(&api_point(T0 + 60, 10, 0));
        let messages = eval.evaluate(T0 + 120);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_recovery);
        assert_eq!(messages[0].alert_id, 2);

        eval.ingest(&api_point(T0 + 120, 10, 0));
        assert!(eval.evaluate(T0 + 180).is_empty());
        assert!(eval.is_idle());
    }

    #[test]
    fn test_non_breach_without_state_creates_nothing() {
        let mut eval = evaluator(vec![rule("apm.api_error.ratio", 1, 5.0, 1)]);
        eval.ingest(&api_point(T0, 10, 0));
        assert!(eval.evaluate(T0 + 60).is_empty());
        assert_eq!(eval.stats().alarm_states, 0);
    }

    #[test]
    fn test_zero_count_window_skips_comparison() {
        // 小于比较：若对零计数窗口求值，0 会被判为越线
        let mut eval = evaluator(vec![rule("apm.api.duration", 2, 100.0, 1)]);
        eval.ingest(&api_point(T0, 0, 0));
        assert!(eval.evaluate(T0 + 60).is_empty());
        assert_eq!(eval.stats().alarm_states, 0);
        assert_eq!(eval.stats().stores, 0);
    }

    #[test]
    fn test_policy_change_resets_alarms() {
        let mut eval = evaluator(vec![rule("apm.api_error.ratio", 1, 5.0, 1)]);
        eval.ingest(&api_point(T0, 10, 5));
        assert_eq!(eval.evaluate(T0 + 60).len(), 1);
        assert_eq!(eval.stats().alarmed, 1);

        // 规则不变，仅版本号变化
        eval.apply_policies(policies(vec![rule("apm.api_error.ratio", 1, 5.0, 1)]));
        assert_eq!(eval.stats().alarmed, 1);

        eval.apply_policies(policies(vec![rule("apm.api_error.ratio", 1, 50.0, 1)]));
        assert_eq!(eval.stats().alarm_states, 0);
    }

    #[test]
    fn test_policy_removal_drops_stores() {
        let mut eval = evaluator(vec![
            rule("apm.api_error.ratio", 1, 5.0, 5),
            rule("apm.api.count", 1, 1000.0, 5),
        ]);
        eval.ingest(&api_point(T0, 10, 1));
        assert_eq!(eval.stats().stores, 2);

        eval.apply_policies(policies(vec![rule("apm.api.count", 1, 1000.0, 5)]));
        assert_eq!(eval.stats().stores, 1);
        assert!(eval.store(&Dimension::Api("/pay".into()), MetricType::ApiErrorRatio).is_none());
    }

    #[test]
    fn test_fan_out_to_family_metrics() {
        let mut eval = evaluator(vec![
            rule("apm.api_error.ratio", 1, 5.0, 1),
            rule("apm.api.count", 1, 5.0, 1),
            rule("apm.api.duration", 1, 50.0, 1),
        ]);
        assert_eq!(eval.ingest(&api_point(T0, 10, 1)), 3);

        let messages = eval.evaluate(T0 + 60);
        assert_eq!(messages.len(), 3);
        let mut metrics: Vec<_> = messages.iter().map(|m| m.metric_type).collect();
        metrics.sort();
        assert_eq!(
            metrics,
            vec![MetricType::ApiErrorRatio, MetricType::ApiDuration, MetricType::ApiCount]
        );
    }
}
