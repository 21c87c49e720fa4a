use std::sync::atomic::{AtomicI64, Ordering};

/// 进程内告警 ID 生成器
///
/// 以启动时的毫秒时间为起点递增，降低重启后 ID 冲突的概率。
#[derive(Debug)]
pub struct AlertIdGenerator {
    next: AtomicI64,
}

impl AlertIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp() * 1000)
    }

    pub fn starting_at(seed: i64) -> Self {
        Self {
            next: AtomicI64::new(seed),
        }
    }

    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for AlertIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
