//! Policy engine for pipeline step outcomes.
//!
//! Everything here is deterministic: a decision is a pure function of the
//! step, the recorded signal and the engine configuration, so replaying a
//! signal log reproduces the original decisions byte for byte.

pub mod decision_log;
pub mod engine;
pub mod replay;
pub mod signal;

pub use decision_log::DecisionLog;
pub use engine::{Action, EngineConfig, PolicyDecision, PolicyEngine, PolicyRisk};
pub use replay::{Divergence, SignalRecord, compare, read_signal_log, replay, replay_file};
pub use signal::Signal;
