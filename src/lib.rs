// Re-export modules so they can be used from tests
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod metric;
pub mod orchestrator;
pub mod shipper;
pub mod trigger;
