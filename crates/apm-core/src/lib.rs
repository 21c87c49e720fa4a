pub mod clock;
pub mod error;
pub mod pool;
pub mod ring;
pub mod ticker;
pub mod traits;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{ApmError, Result};
pub use pool::{Delivery, EntityWorker, PoolConfig, WorkerPool};
pub use ring::{ConsistentHashRouter, HashRing};
pub use ticker::{TickerId, TickerPool};
pub use traits::{NotificationSink, ShardRouter, SummaryHandler};
