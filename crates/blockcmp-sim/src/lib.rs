//! blockcmp-sim: simulated block builders.
//!
//! Replays a captured mempool into 12-second blocks under two ordering
//! policies (FCFS and Greedy) and writes the result in the layout the
//! analysis side reads.

pub mod export;
pub mod mempool;
pub mod ordering;

pub use mempool::MempoolEntry;
pub use ordering::{build_blocks, BuildOutcome, BuilderParams, BuiltBlock, OrderingAlgorithm};
