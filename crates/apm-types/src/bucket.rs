use serde::{Deserialize, Serialize};

/// 累加器形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Counters,
    Cpu,
    Heap,
}

/// 通用计数累加器（接口、SQL、异常）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub count: u64,
    pub err_count: u64,
    pub duration_sum: u64,
    #[serde(default)]
    pub value: f64,
}

impl Counters {
    pub fn new(count: u64, err_count: u64, duration_sum: u64) -> Self {
        Self {
            count,
            err_count,
            duration_sum,
            value: 0.0,
        }
    }
}

/// CPU 负载累加器
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuLoad {
    pub system_load_sum: f64,
    pub jvm_load_sum: f64,
    pub count: u64,
}

impl CpuLoad {
    pub fn new(system_load_sum: f64, jvm_load_sum: f64, count: u64) -> Self {
        Self {
            system_load_sum,
            jvm_load_sum,
            count,
        }
    }
}

/// JVM 堆内存累加器（字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapUsage {
    pub heap_sum: u64,
    pub count: u64,
}

impl HeapUsage {
    pub fn new(heap_sum: u64, count: u64) -> Self {
        Self { heap_sum, count }
    }
}

/// 分钟桶累加器
///
/// 新数据点总是累加进已有字段，从不覆盖。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Accumulator {
    Counters(Counters),
    Cpu(CpuLoad),
    Heap(HeapUsage),
}

impl Accumulator {
    /// 指定形状的零值
    pub fn zero(shape: Shape) -> Self {
        match shape {
            Shape::Counters => Accumulator::Counters(Counters::default()),
            Shape::Cpu => Accumulator::Cpu(CpuLoad::default()),
            Shape::Heap => Accumulator::Heap(HeapUsage::default()),
        }
    }

    pub fn zero_like(&self) -> Self {
        Self::zero(self.shape())
    }

    pub fn shape(&self) -> Shape {
        match self {
            Accumulator::Counters(_) => Shape::Counters,
            Accumulator::Cpu(_) => Shape::Cpu,
            Accumulator::Heap(_) => Shape::Heap,
        }
    }

    /// 合并另一个累加器；形状不一致时不做任何修改并返回 false
///
/// 整数计数饱和累加。
    pub fn merge(&mut self, other: &Accumulator) -> bool {
        match (self, other) {
            (Accumulator::Counters(a), Accumulator::Counters(b)) => {
                a.count = a.count.saturating_add(b.count);
                a.err_count = a.err_count.saturating_add(b.err_count);
                a.duration_sum = a.duration_sum.saturating_add(b.duration_sum);
                a.value += b.value;
                true
            }
            (Accumulator::Cpu(a), Accumulator::Cpu(b)) => {
                a.system_load_sum += b.system_load_sum;
                a.jvm_load_sum += b.jvm_load_sum;
                a.count = a.count.saturating_add(b.count);
                true
            }
            (Accumulator::Heap(a), Accumulator::Heap(b)) => {
                a.heap_sum = a.heap_sum.saturating_add(b.heap_sum);
                a.count = a.count.saturating_add(b.count);
                true
            }
            _ => false,
        }
    }

    pub fn as_counters(&self) -> Option<&Counters> {
        match self {
            Accumulator::Counters(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_cpu(&self) -> Option<&CpuLoad> {
        match self {
            Accumulator::Cpu(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_heap(&self) -> Option<&HeapUsage> {
        match self {
            Accumulator::Heap(h) => Some(h),
            _ => None,
        }
    }

    /// 累加器中的样本数
    pub fn sample_count(&self) -> u64 {
        match self {
            Accumulator::Counters(c) => c.count,
            Accumulator::Cpu(c) => c.count,
            Accumulator::Heap(h) => h.count,
        }
    }
}

impl From<Counters> for Accumulator {
    fn from(c: Counters) -> Self {
        Accumulator::Counters(c)
    }
}

impl From<CpuLoad> for Accumulator {
    fn from(c: CpuLoad) -> Self {
        Accumulator::Cpu(c)
    }
}

impl From<HeapUsage> for Accumulator {
    fn from(h: HeapUsage) -> Self {
        Accumulator::Heap(h)
    }
}
