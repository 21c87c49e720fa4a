pub mod alarm;
pub mod evaluator;
pub mod id;
pub mod policy;
pub mod service;
pub mod source;

pub use alarm::{AlarmPhase, AlarmState, RateLimit, Transition};
pub use evaluator::{AlertEvaluator, EvaluatorControl, EvaluatorStats, EvaluatorWorker};
pub use id::AlertIdGenerator;
pub use policy::{parse_rule, PolicySet};
pub use service::{AlertService, ReloadSummary};
pub use source::{FilePolicySource, PolicySource, StaticPolicySource};
