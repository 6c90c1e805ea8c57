//! blockcmp-data crate
//!
//! Raw tabular sources for the Greedy, FCFS and Mined datasets and the
//! normalizer that turns them into typed, unit-consistent datasets. The
//! Mined source itself is produced from an Ethereum node by [`mined`].

pub mod mined;
pub mod normalize;
pub mod rpc;
pub mod source;
pub mod types;

pub use source::{DataError, RawRecord};
pub use types::{Dataset, SourceLabel, TransactionRecord};
