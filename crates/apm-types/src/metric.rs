use crate::bucket::{Accumulator, Shape};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 告警指标类型
///
/// 数值编码与策略库中的编码保持一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricType {
    /// 接口访问错误率
    ApiErrorRatio,
    /// 接口访问错误次数
    ApiErrorCount,
    /// 内部异常率
    ExceptionRatio,
    /// SQL 错误率
    SqlErrorRatio,
    /// 接口平均耗时
    ApiDuration,
    /// 接口访问次数
    ApiCount,
    /// CPU 使用率
    CpuUsedRatio,
    /// JVM Heap 使用量
    MemUsed,
}

/// 指标值推导函数：输入窗口求和后的累加器与窗口时长（分钟）
pub type DeriveFn = fn(&Accumulator, u32) -> Option<f64>;

/// 指标策略表项
#[derive(Debug, Clone, Copy)]
pub struct MetricStrategy {
    pub family: MetricFamily,
    pub derive: DeriveFn,
    pub description: &'static str,
}

impl MetricType {
    pub const ALL: [MetricType; 8] = [
        MetricType::ApiErrorRatio,
        MetricType::ApiErrorCount,
        MetricType::ExceptionRatio,
        MetricType::SqlErrorRatio,
        MetricType::ApiDuration,
        MetricType::ApiCount,
        MetricType::CpuUsedRatio,
        MetricType::MemUsed,
    ];

    /// 策略库使用的外部名称
    pub fn name(&self) -> &'static str {
        match self {
            MetricType::ApiErrorRatio => "apm.api_error.ratio",
            MetricType::ApiErrorCount => "apm.api_error.count",
            MetricType::ExceptionRatio => "apm.exception.ratio",
            MetricType::SqlErrorRatio => "apm.sql_error.ratio",
            MetricType::ApiDuration => "apm.api.duration",
            MetricType::ApiCount => "apm.api.count",
            MetricType::CpuUsedRatio => "system.cpu_used.ratio",
            MetricType::MemUsed => "system.mem_used.ratio",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            MetricType::ApiErrorRatio => 1,
            MetricType::ApiErrorCount => 2,
            MetricType::ExceptionRatio => 3,
            MetricType::SqlErrorRatio => 4,
            MetricType::ApiDuration => 5,
            MetricType::ApiCount => 6,
            MetricType::CpuUsedRatio => 7,
            MetricType::MemUsed => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.code() == code)
    }

    /// 查询策略表，每个维度只需解析一次
    pub fn strategy(&self) -> &'static MetricStrategy {
        match self {
            MetricType::ApiErrorRatio => &API_ERROR_RATIO,
            MetricType::ApiErrorCount => &API_ERROR_COUNT,
            MetricType::ExceptionRatio => &EXCEPTION_RATIO,
            MetricType::SqlErrorRatio => &SQL_ERROR_RATIO,
            MetricType::ApiDuration => &API_DURATION,
            MetricType::ApiCount => &API_COUNT,
            MetricType::CpuUsedRatio => &CPU_USED_RATIO,
            MetricType::MemUsed => &MEM_USED,
        }
    }

    pub fn family(&self) -> MetricFamily {
        self.strategy().family
    }

    pub fn description(&self) -> &'static str {
        self.strategy().description
    }

    /// 从窗口累加器推导指标值，分母为零时返回 None
    pub fn derive(&self, sum: &Accumulator, duration_minutes: u32) -> Option<f64> {
        (self.strategy().derive)(sum, duration_minutes)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown metric type: {}", s))
    }
}

/// 指标族：同一族共享样本形状与维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFamily {
    Api,
    Sql,
    Exception,
    Cpu,
    Memory,
}

impl MetricFamily {
    pub fn shape(&self) -> Shape {
        match self {
            MetricFamily::Api | MetricFamily::Sql | MetricFamily::Exception => Shape::Counters,
            MetricFamily::Cpu => Shape::Cpu,
            MetricFamily::Memory => Shape::Heap,
        }
    }

    pub fn metric_types(&self) -> &'static [MetricType] {
        match self {
            MetricFamily::Api => &[
                MetricType::ApiDuration,
                MetricType::ApiCount,
                MetricType::ApiErrorCount,
                MetricType::ApiErrorRatio,
            ],
            MetricFamily::Sql => &[MetricType::SqlErrorRatio],
            MetricFamily::Exception => &[MetricType::ExceptionRatio],
            MetricFamily::Cpu => &[MetricType::CpuUsedRatio],
            MetricFamily::Memory => &[MetricType::MemUsed],
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricFamily::Api => "api",
            MetricFamily::Sql => "sql",
            MetricFamily::Exception => "exception",
            MetricFamily::Cpu => "cpu",
            MetricFamily::Memory => "memory",
        };
        f.write_str(name)
    }
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn error_ratio(sum: &Accumulator, _duration: u32) -> Option<f64> {
    let c = sum.as_counters()?;
    if c.count == 0 {
        return None;
    }
    Some(c.err_count as f64 / c.count as f64 * 100.0)
}

fn error_count(sum: &Accumulator, _duration: u32) -> Option<f64> {
    sum.as_counters().map(|c| c.err_count as f64)
}

fn access_count(sum: &Accumulator, _duration: u32) -> Option<f64> {
    sum.as_counters().map(|c| c.count as f64)
}

fn avg_duration(sum: &Accumulator, _duration: u32) -> Option<f64> {
    let c = sum.as_counters()?;
    if c.count == 0 {
        return None;
    }
    Some(c.duration_sum as f64 / c.count as f64)
}

fn cpu_ratio(sum: &Accumulator, duration: u32) -> Option<f64> {
    let cpu = sum.as_cpu()?;
    if cpu.count == 0 || duration == 0 {
        return None;
    }
    Some(cpu.system_load_sum / duration as f64 * 100.0)
}

fn heap_mb(sum: &Accumulator, _duration: u32) -> Option<f64> {
    let heap = sum.as_heap()?;
    if heap.count == 0 {
        return None;
    }
    Some(heap.heap_sum as f64 / heap.count as f64 / BYTES_PER_MB)
}

static API_ERROR_RATIO: MetricStrategy = MetricStrategy {
    family: MetricFamily::Api,
    derive: error_ratio,
    description: "api error ratio",
};
static API_ERROR_COUNT: MetricStrategy = MetricStrategy {
    family: MetricFamily::Api,
    derive: error_count,
    description: "api error count",
};
static EXCEPTION_RATIO: MetricStrategy = MetricStrategy {
    family: MetricFamily::Exception,
    derive: error_ratio,
    description: "internal exception ratio",
};
static SQL_ERROR_RATIO: MetricStrategy = MetricStrategy {
    family: MetricFamily::Sql,
    derive: error_ratio,
    description: "sql error ratio",
};
static API_DURATION: MetricStrategy = MetricStrategy {
    family: MetricFamily::Api,
    derive: avg_duration,
    description: "api average duration",
};
static API_COUNT: MetricStrategy = MetricStrategy {
    family: MetricFamily::Api,
    derive: access_count,
    description: "api access count",
};
static CPU_USED_RATIO: MetricStrategy = MetricStrategy {
    family: MetricFamily::Cpu,
    derive: cpu_ratio,
    description: "cpu usage",
};
static MEM_USED: MetricStrategy = MetricStrategy {
    family: MetricFamily::Memory,
    derive: heap_mb,
    description: "jvm heap usage",
};
