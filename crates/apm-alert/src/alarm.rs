use serde::{Deserialize, Serialize};

/// 告警阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmPhase {
    /// 从未告警，或策略刚刚（重新）创建
    Normal,
    /// 已告警
    Alarmed,
    /// 已恢复
    Recovered,
}

/// 告警频率限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// 两次告警的基础间隔（秒）
    pub interval_secs: i64,
    /// 一轮告警内的最大告警次数
    pub max_alarm_count: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_alarm_count: 3,
        }
    }
}

/// 一次观察后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 发出告警
    Alarm,
    /// 发出恢复
    Recover,
    /// 越线但被频率限制
    Suppressed,
    /// 无变化
    Unchanged,
}

impl Transition {
    pub fn emits(&self) -> bool {
        matches!(self, Transition::Alarm | Transition::Recover)
    }
}

/// 每个（实体，指标）的告警状态机
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmState {
    phase: AlarmPhase,
    last_alarm_time: i64,
    alarm_count: u32,
}

impl Default for AlarmState {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmState {
    pub fn new() -> Self {
        Self {
            phase: AlarmPhase::Normal,
            last_alarm_time: 0,
            alarm_count: 0,
        }
    }

    pub fn phase(&self) -> AlarmPhase {
        self.phase
    }

    pub fn alarm_count(&self) -> u32 {
        self.alarm_count
    }

    pub fn last_alarm_time(&self) -> i64 {
        self.last_alarm_time
    }

    pub fn is_alarmed(&self) -> bool {
        self.phase == AlarmPhase::Alarmed
    }

    /// 告警间隔随次数线性增长，恢复后重置
    pub fn may_alarm(&self, now: i64, limit: &RateLimit) -> bool {
        now > self.last_alarm_time
            + self.alarm_count as i64 * limit.interval_secs
            + limit.interval_secs
            && self.alarm_count < limit.max_alarm_count
    }

    /// 根据本轮比较结果推进状态
    ///
    /// # 参数
    /// * `breach` - 计算值是否越过阈值
    /// * `now` - 当前时间（秒）
    /// * `limit` - 频率限制
    pub fn observe(&mut self, breach: bool, now: i64, limit: &RateLimit) -> Transition {
        if breach {
            if !self.may_alarm(now, limit) {
                return Transition::Suppressed;
            }
            self.phase = AlarmPhase::Alarmed;
            self.alarm_count += 1;
            self.last_alarm_time = now;
            return Transition::Alarm;
        }

        if self.phase == AlarmPhase::Alarmed {
            self.phase = AlarmPhase::Recovered;
            self.alarm_count = 0;
            self.last_alarm_time = 0;
            return Transition::Recover;
        }

        Transition::Unchanged
    }
}
