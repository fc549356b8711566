//! Test harness
//!
//! A demo deployment plus a seeded save/restore simulator. Used by the
//! `simulate` command, the benchmarks and the integration tests.

pub mod fixtures;
pub mod simulator;

pub use fixtures::{demo_registry, PassThroughHandler, StampHandler};
pub use simulator::{run_simulator, Exchange, SimulatorConfig, SimulatorReport, SimulatorStats, Violation};
