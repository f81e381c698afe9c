// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod models;
pub mod persistence;

// Re-export commonly used types
pub use api::{JupiterPriceClient, PriceOracle};
pub use execution::{Engine, EngineConfig, OpenOutcome};
pub use models::*;
pub use persistence::Ledger;
