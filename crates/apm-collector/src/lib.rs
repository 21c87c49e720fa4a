pub mod app;
pub mod cache;
pub mod forward;
pub mod service;
pub mod storage;
pub mod transport;

pub use app::{CollectorApp, CollectorControl, CollectorStats};
pub use cache::MinuteCache;
pub use forward::Forwarder;
pub use service::Collector;
pub use storage::{MemoryStorage, StatsStorage};
pub use transport::{Connection, HttpTransport, InProcessTransport, Transport, SUMMARY_PATH};
