// Position lifecycle: open, monitor, sell, recover
pub mod engine;
pub mod exit_rule;
pub mod monitor;
pub mod position_store;
pub mod recovery;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{Engine, EngineConfig, EngineError, OpenOutcome, QuoteOutcome};
pub use exit_rule::{ExitSignal, FeeSchedule, TakeProfitRule};
pub use monitor::{PositionMonitor, TickReport};
pub use position_store::PositionStore;
pub use recovery::{replay, ReplayState};
