use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// 采样策略
#[derive(Debug, Clone)]
pub enum SamplingStrategy {
    /// 始终记录
    Always,

    /// 从不记录
    Never,

    /// 按比例采样（0.0-1.0）
    Ratio(f64),

    /// 速率限制（每秒最多 N 条）
    RateLimit(u32),
}

/// 日志采样器
///
/// 用于热路径上的告警日志（如队列已满），被抑制的条数单独计数。
pub struct LogSampler {
    strategy: SamplingStrategy,
    origin: Instant,
    window_sec: AtomicU64,
    counter: AtomicU64,
    suppressed: AtomicU64,
}

impl LogSampler {
    pub fn new(strategy: SamplingStrategy) -> Self {
        Self {
            strategy,
            origin: Instant::now(),
            window_sec: AtomicU64::new(0),
            counter: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// 判断是否应该记录
    pub fn should_sample(&self) -> bool {
        let sampled = match &self.strategy {
            SamplingStrategy::Always => true,
            SamplingStrategy::Never => false,
            SamplingStrategy::Ratio(ratio) => rand::thread_rng().gen::<f64>() < *ratio,
            SamplingStrategy::RateLimit(max_per_sec) => self.check_rate_limit(*max_per_sec),
        };
        if !sampled {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
        sampled
    }

    fn check_rate_limit(&self, max_per_sec: u32) -> bool {
        let now_sec = self.origin.elapsed().as_secs();

        // 每秒重置计数器
        let window = self.window_sec.load(Ordering::Relaxed);
        if now_sec != window
            && self
                .window_sec
                .compare_exchange(window, now_sec, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.counter.store(0, Ordering::Relaxed);
        }

        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        count < max_per_sec as u64
    }

    /// 被抑制的日志条数
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    /// 取出并清零被抑制的条数
    pub fn take_suppressed(&self) -> u64 {
        self.suppressed.swap(0, Ordering::Relaxed)
    }
}

impl Default for LogSampler {
    fn default() -> Self {
        Self::new(SamplingStrategy::Always)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_sampler() {
        let sampler = LogSampler::new(SamplingStrategy::Always);
        assert!(sampler.should_sample());
        assert_eq!(sampler.suppressed(), 0);
    }

    #[test]
    fn test_never_sampler() {
        let sampler = LogSampler::new(SamplingStrategy::Never);
        assert!(!sampler.should_sample());
        assert!(!sampler.should_sample());
        assert_eq!(sampler.take_suppressed(), 2);
        assert_eq!(sampler.suppressed(), 0);
    }

    #[test]
    fn test_ratio_sampler() {
        let sampler = LogSampler::new(SamplingStrategy::Ratio(0.5));

        let sampled = (0..1000).filter(|_| sampler.should_sample()).count();

        // 应该接近 500（允许一些误差）
        assert!(sampled > 400 && sampled < 600);
        assert_eq!(sampler.suppressed() as usize, 1000 - sampled);
    }

    #[test]
    fn test_rate_limit_sampler() {
        let sampler = LogSampler::new(SamplingStrategy::RateLimit(10));

        let sampled = (0..20).filter(|_| sampler.should_sample()).count();

        assert!(sampled <= 10);
        assert!(sampler.suppressed() >= 10);
    }

    #[tokio::test]
    async fn test_rate_limit_resets_each_second() {
        let sampler = LogSampler::new(SamplingStrategy::RateLimit(1));
        assert!(sampler.should_sample());
        assert!(!sampler.should_sample());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(sampler.should_sample());
    }
}
