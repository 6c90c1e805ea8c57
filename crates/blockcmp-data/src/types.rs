//! Type definitions for normalized block-construction data.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin of a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceLabel {
    /// Simulated builder ranking by priority fee per gas.
    Greedy,
    /// Simulated builder including transactions in arrival order.
    Fcfs,
    /// Blocks actually mined on the network.
    Mined,
}

impl SourceLabel {
    /// All labels in report order.
    pub const ALL: [SourceLabel; 3] = [SourceLabel::Greedy, SourceLabel::Fcfs, SourceLabel::Mined];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLabel::Greedy => "Greedy",
            SourceLabel::Fcfs => "FCFS",
            SourceLabel::Mined => "Mined",
        }
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized transaction row.
///
/// Monetary fields are in display units (ETH). `block_reward` and
/// `block_gas` are block-level quantities; sources write them on one row
/// per block or repeat them on every row, and the remaining rows read as
/// zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction hash as it appears in the source.
    pub hash: String,
    /// Block number assigned by the source.
    pub block_number: u64,
    /// Gas consumed by the transaction.
    pub gas_used: u64,
    /// Gas recorded for the owning block, zero on rows that do not carry it.
    pub block_gas: u64,
    /// Profit attributed to this transaction, in ETH.
    pub profit: f64,
    /// Block reward, in ETH, zero on rows that do not carry it.
    pub block_reward: f64,
    /// Base fee per gas, in ETH.
    pub base_fee: f64,
    /// `base_fee * gas_used`, in ETH. Zero unless both are non-zero.
    pub burned_fee: f64,
    /// Transaction type (0 legacy, 2 EIP-1559, ...).
    pub tx_type: u8,
    /// Observation time, when the source records one.
    pub timestamp: Option<DateTime<Utc>>,
}

/// An ordered, labelled collection of normalized records.
///
/// Datasets are never mutated after construction; filters return new
/// datasets.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    label: SourceLabel,
    records: Vec<TransactionRecord>,
    block_origin: Option<u64>,
}

impl Dataset {
    /// Builds a dataset. For [`SourceLabel::Mined`] the smallest block
    /// number becomes the alignment origin so that mined blocks count
    /// from 1 like the simulated ones.
    pub fn new(label: SourceLabel, records: Vec<TransactionRecord>) -> Self {
        let block_origin = match label {
            SourceLabel::Mined => records.iter().map(|r| r.block_number).min(),
            SourceLabel::Greedy | SourceLabel::Fcfs => None,
        };

        Self {
            label,
            records,
            block_origin,
        }
    }

    pub fn label(&self) -> SourceLabel {
        self.label
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Minimum raw block number used for alignment (Mined only).
    pub fn block_origin(&self) -> Option<u64> {
        self.block_origin
    }

    /// Block number of `record` on the shared 1-based axis.
    pub fn aligned_block(&self, record: &TransactionRecord) -> u64 {
        match self.block_origin {
            Some(origin) => record.block_number.saturating_sub(origin) + 1,
            None => record.block_number,
        }
    }

    /// Returns a copy holding only the records `keep` accepts.
    ///
    /// The alignment origin is carried over unchanged so views of the
    /// same dataset stay on one block axis.
    pub fn retain<F>(&self, keep: F) -> Dataset
    where
        F: Fn(&TransactionRecord) -> bool,
    {
        Dataset {
            label: self.label,
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
            block_origin: self.block_origin,
        }
    }

    /// Distinct transaction hashes. Rows without a hash are skipped.
    pub fn hashes(&self) -> HashSet<&str> {
        self.records
            .iter()
            .map(|r| r.hash.as_str())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, block_number: u64) -> TransactionRecord {
        TransactionRecord {
            hash: hash.to_string(),
            block_number,
            gas_used: 21_000,
            block_gas: 0,
            profit: 0.0,
            block_reward: 0.0,
            base_fee: 0.0,
            burned_fee: 0.0,
            tx_type: 2,
            timestamp: None,
        }
    }

    #[test]
    fn mined_blocks_align_from_one() {
        let mined = Dataset::new(
            SourceLabel::Mined,
            vec![record("0xa", 8_500_002), record("0xb", 8_500_000)],
        );

        assert_eq!(mined.block_origin(), Some(8_500_000));
        assert_eq!(mined.aligned_block(&mined.records()[0]), 3);
        assert_eq!(mined.aligned_block(&mined.records()[1]), 1);
    }

    #[test]
    fn simulated_blocks_keep_their_numbers() {
        let fcfs = Dataset::new(SourceLabel::Fcfs, vec![record("0xa", 4)]);
        assert_eq!(fcfs.block_origin(), None);
        assert_eq!(fcfs.aligned_block(&fcfs.records()[0]), 4);
    }

    #[test]
    fn retain_keeps_alignment_origin() {
        let mined = Dataset::new(
            SourceLabel::Mined,
            vec![record("0xa", 100), record("0xb", 101)],
        );
        let view = mined.retain(|r| r.hash == "0xb");

        assert_eq!(view.len(), 1);
        assert_eq!(view.block_origin(), Some(100));
        assert_eq!(view.aligned_block(&view.records()[0]), 2);
        assert_eq!(mined.len(), 2, "source dataset must be untouched");
    }

    #[test]
    fn hashes_skip_missing_values() {
        let dataset = Dataset::new(
            SourceLabel::Greedy,
            vec![record("0xa", 1), record("", 1), record("0xa", 2)],
        );
        let hashes = dataset.hashes();

        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains("0xa"));
    }
}
