//! blockcmp-analysis crate
//!
//! Comparative metrics over normalized Greedy, FCFS and Mined datasets:
//! outlier filtering, per-block aggregation, cross-dataset coverage,
//! latency and block similarity, and the three-scenario report.
//!
//! Everything here is pure: functions take datasets by reference and return
//! structured results. Rendering is left to the caller.

pub mod aggregate;
pub mod compare;
pub mod config;
pub mod outlier;
pub mod scenario;

pub use config::AnalysisConfig;
pub use scenario::{analyze, run_scenarios, AnalysisReport, Scenario, ScenarioReport, SourceSet};
