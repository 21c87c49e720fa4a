pub mod aggregator;
pub mod store;

pub use aggregator::{Window, WindowAggregator, WindowOutcome};
pub use store::BucketStore;
