//! Block construction under simulated ordering policies.
//!
//! Time advances in fixed windows. In each window the transactions seen so
//! far are ranked by the policy and packed until the gas target is reached
//! or nothing else fits under the hard cap. Transactions that do not make
//! it stay in the pool for later windows. Once the capture is exhausted, a
//! bounded number of extra blocks drains what is left.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use blockcmp_data::SourceLabel;
use eyre::{ensure, eyre, Result};
use tracing::{debug, info};

use crate::mempool::MempoolEntry;

/// Transaction ordering policy.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum OrderingAlgorithm {
    /// First come, first served: arrival order.
    Fcfs,
    /// Highest priority fee per unit of gas limit first.
    Greedy,
}

impl OrderingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderingAlgorithm::Fcfs => "fcfs",
            OrderingAlgorithm::Greedy => "greedy",
        }
    }

    /// Dataset label the policy's output is analysed under.
    pub fn source_label(&self) -> SourceLabel {
        match self {
            OrderingAlgorithm::Fcfs => SourceLabel::Fcfs,
            OrderingAlgorithm::Greedy => SourceLabel::Greedy,
        }
    }

    /// Reorders pool indices into inclusion priority.
    ///
    /// `candidates` arrive in arrival order; the sort is stable so ties keep
    /// it.
    fn rank(&self, pool: &[MempoolEntry], candidates: &mut [usize]) {
        match self {
            OrderingAlgorithm::Fcfs => {}
            OrderingAlgorithm::Greedy => candidates
                .sort_by(|a, b| pool[*b].fee_ratio().total_cmp(&pool[*a].fee_ratio())),
        }
    }
}

impl fmt::Display for OrderingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderingAlgorithm {
    type Err = eyre::Report;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fcfs" => Ok(OrderingAlgorithm::Fcfs),
            "greedy" => Ok(OrderingAlgorithm::Greedy),
            other => Err(eyre!("unknown ordering algorithm '{other}'; use 'fcfs' or 'greedy'")),
        }
    }
}

/// Block-building parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuilderParams {
    /// Seconds between block windows.
    pub block_interval_secs: i64,
    /// Packing stops once a block reaches this much gas.
    pub gas_target: u128,
    /// A block never exceeds this much gas.
    pub gas_hard_cap: u128,
    /// Blocks built after the capture window closes.
    pub max_extra_blocks: usize,
}

impl Default for BuilderParams {
    fn default() -> Self {
        Self {
            block_interval_secs: 12,
            gas_target: 30_000_000,
            gas_hard_cap: 60_000_000,
            max_extra_blocks: 100,
        }
    }
}

impl BuilderParams {
    /// Checks that the windows advance and the target fits under the cap.
    ///
    /// # Errors
    /// Returns error if the block interval is not positive, the gas target
    /// is zero, or the target exceeds the hard cap.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.block_interval_secs > 0,
            "block interval must be positive, got {}",
            self.block_interval_secs
        );
        ensure!(self.gas_target > 0, "gas target must be positive");
        ensure!(
            self.gas_target <= self.gas_hard_cap,
            "gas target {} exceeds hard cap {}",
            self.gas_target,
            self.gas_hard_cap
        );
        Ok(())
    }
}

/// One simulated block.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltBlock {
    /// 1-based block number.
    pub number: u64,
    /// Included transactions in inclusion order.
    pub transactions: Vec<MempoolEntry>,
    /// Sum of included gas limits.
    pub gas_used: u128,
    /// Sum of included profit in Wei.
    pub reward_wei: u128,
    /// Built after the capture window closed.
    pub extra: bool,
}

/// Output of [`build_blocks`].
#[derive(Clone, Debug)]
pub struct BuildOutcome {
    pub algorithm: OrderingAlgorithm,
    pub blocks: Vec<BuiltBlock>,
    /// Transactions still pending when building stopped.
    pub leftover: usize,
}

impl BuildOutcome {
    /// Number of included transactions across all blocks.
    pub fn tx_count(&self) -> usize {
        self.blocks.iter().map(|b| b.transactions.len()).sum()
    }
}

/// Builds blocks from `entries` under `algorithm`.
///
/// # Errors
/// Returns error if `params` fails [`BuilderParams::validate`].
#[tracing::instrument(skip(entries, params), fields(entries = entries.len()))]
pub fn build_blocks(
    mut entries: Vec<MempoolEntry>,
    algorithm: OrderingAlgorithm,
    params: &BuilderParams,
) -> Result<BuildOutcome> {
    params.validate()?;
    entries.sort_by_key(MempoolEntry::timestamp_secs);
    let mut pool = entries;
    let mut blocks = Vec::new();

    if let Some(first) = pool.first() {
        let mut window_start = first.timestamp_secs();

        while let Some(latest) = pool.last().map(MempoolEntry::timestamp_secs) {
            if window_start > latest {
                break;
            }

            let window_end = window_start.saturating_add(params.block_interval_secs);
            let candidates: Vec<usize> = pool
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.timestamp_secs() <= window_end)
                .map(|(idx, _)| idx)
                .collect();

            let number = blocks.len() as u64 + 1;
            if let Some(block) = fill_block(&mut pool, candidates, algorithm, params, number, false) {
                blocks.push(block);
            }

            window_start = window_end;
        }
    }

    let mut extra_built = 0usize;
    while !pool.is_empty() && extra_built < params.max_extra_blocks {
        let candidates: Vec<usize> = (0..pool.len()).collect();
        let number = blocks.len() as u64 + 1;
        match fill_block(&mut pool, candidates, algorithm, params, number, true) {
            Some(block) => {
                blocks.push(block);
                extra_built += 1;
            }
            None => break,
        }
    }

    let outcome = BuildOutcome {
        algorithm,
        blocks,
        leftover: pool.len(),
    };

    info!(
        %algorithm,
        blocks = outcome.blocks.len(),
        extra_blocks = extra_built,
        transactions = outcome.tx_count(),
        leftover = outcome.leftover,
        "block building finished"
    );

    Ok(outcome)
}

/// Packs one block from `candidates` and removes the included transactions
/// (and any pending duplicates of their hashes) from `pool`.
fn fill_block(
    pool: &mut Vec<MempoolEntry>,
    mut candidates: Vec<usize>,
    algorithm: OrderingAlgorithm,
    params: &BuilderParams,
    number: u64,
    extra: bool,
) -> Option<BuiltBlock> {
    algorithm.rank(pool, &mut candidates);

    let mut chosen = Vec::new();
    let mut gas_used = 0u128;
    let mut reward_wei = 0u128;

    for idx in candidates {
        let entry = &pool[idx];
        match gas_used.checked_add(entry.gas_limit) {
            Some(next) if next <= params.gas_hard_cap => {
                gas_used = next;
                reward_wei = reward_wei.saturating_add(entry.profit_wei);
                chosen.push(idx);
                if gas_used >= params.gas_target {
                    break;
                }
            }
            _ => continue,
        }
    }

    if chosen.is_empty() {
        return None;
    }

    let mut slots: Vec<Option<MempoolEntry>> = std::mem::take(pool).into_iter().map(Some).collect();
    let transactions: Vec<MempoolEntry> = chosen.iter().filter_map(|&idx| slots[idx].take()).collect();

    let included: HashSet<&str> = transactions.iter().map(|tx| tx.hash.as_str()).collect();
    let before = slots.iter().flatten().count();
    *pool = slots
        .into_iter()
        .flatten()
        .filter(|entry| !included.contains(entry.hash.as_str()))
        .collect();
    let duplicates = before - pool.len();

    debug!(
        block = number,
        transactions = transactions.len(),
        gas_used = %gas_used,
        duplicates,
        extra,
        "block built"
    );

    Some(BuiltBlock {
        number,
        transactions,
        gas_used,
        reward_wei,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(hash: &str, second: i64, gas_limit: u128, priority_fee: u128) -> MempoolEntry {
        MempoolEntry {
            hash: hash.to_string(),
            tx_type: 2,
            gas_limit,
            max_priority_fee: priority_fee,
            profit_wei: gas_limit * priority_fee,
            timestamp: Utc
                .timestamp_opt(1_750_000_000 + second, 0)
                .single()
                .expect("valid timestamp"),
            network_block: None,
        }
    }

    fn hashes(block: &BuiltBlock) -> Vec<&str> {
        block.transactions.iter().map(|tx| tx.hash.as_str()).collect()
    }

    #[test]
    fn fcfs_keeps_arrival_order_within_window() {
        let entries = vec![
            entry("0xb", 5, 21_000, 1),
            entry("0xa", 0, 21_000, 9),
            entry("0xc", 30, 21_000, 5),
        ];
        let outcome = build_blocks(entries, OrderingAlgorithm::Fcfs, &BuilderParams::default())
            .expect("valid params");

        assert_eq!(outcome.blocks.len(), 2);
        assert_eq!(hashes(&outcome.blocks[0]), vec!["0xa", "0xb"]);
        assert_eq!(hashes(&outcome.blocks[1]), vec!["0xc"]);
        assert_eq!(outcome.blocks[1].number, 2);
        assert_eq!(outcome.leftover, 0);
    }

    #[test]
    fn greedy_ranks_by_fee_per_gas() {
        let entries = vec![
            entry("0xlow", 0, 21_000, 1),
            entry("0xhigh", 1, 21_000, 50),
            entry("0xmid", 2, 100_000, 100),
        ];
        let outcome = build_blocks(entries, OrderingAlgorithm::Greedy, &BuilderParams::default())
            .expect("valid params");

        assert_eq!(hashes(&outcome.blocks[0]), vec!["0xhigh", "0xmid", "0xlow"]);
    }

    #[test]
    fn gas_target_closes_block_and_rest_carries_over() {
        let params = BuilderParams {
            gas_target: 100,
            gas_hard_cap: 150,
            ..BuilderParams::default()
        };
        let entries = vec![
            entry("0x1", 0, 60, 1),
            entry("0x2", 1, 60, 1),
            entry("0x3", 2, 60, 1),
        ];
        let outcome = build_blocks(entries, OrderingAlgorithm::Fcfs, &params).expect("valid params");

        assert_eq!(outcome.blocks.len(), 2);
        assert_eq!(hashes(&outcome.blocks[0]), vec!["0x1", "0x2"]);
        assert_eq!(outcome.blocks[0].gas_used, 120);
        assert_eq!(outcome.blocks[0].reward_wei, 120);
        assert_eq!(hashes(&outcome.blocks[1]), vec!["0x3"]);
    }

    #[test]
    fn hard_cap_skips_oversized_and_keeps_packing() {
        let params = BuilderParams {
            gas_target: 100,
            gas_hard_cap: 100,
            ..BuilderParams::default()
        };
        let entries = vec![
            entry("0x1", 0, 70, 1),
            entry("0x2", 1, 50, 1),
            entry("0x3", 2, 30, 1),
        ];
        let outcome = build_blocks(entries, OrderingAlgorithm::Fcfs, &params).expect("valid params");

        assert_eq!(hashes(&outcome.blocks[0]), vec!["0x1", "0x3"]);
        assert_eq!(hashes(&outcome.blocks[1]), vec!["0x2"]);
    }

    #[test]
    fn extra_blocks_are_bounded() {
        let params = BuilderParams {
            gas_target: 10,
            gas_hard_cap: 10,
            max_extra_blocks: 1,
            ..BuilderParams::default()
        };
        let entries = vec![
            entry("0x1", 0, 10, 1),
            entry("0x2", 0, 10, 1),
            entry("0x3", 0, 10, 1),
        ];
        let outcome = build_blocks(entries, OrderingAlgorithm::Fcfs, &params).expect("valid params");

        assert_eq!(outcome.blocks.len(), 2);
        assert!(!outcome.blocks[0].extra);
        assert!(outcome.blocks[1].extra);
        assert_eq!(outcome.leftover, 1);
    }

    #[test]
    fn empty_pool_builds_nothing() {
        let outcome = build_blocks(Vec::new(), OrderingAlgorithm::Greedy, &BuilderParams::default())
            .expect("valid params");
        assert!(outcome.blocks.is_empty());
        assert_eq!(outcome.leftover, 0);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let params = BuilderParams {
            block_interval_secs: 0,
            ..BuilderParams::default()
        };
        let entries = vec![entry("0xa", 0, 21_000, 1), entry("0xb", 5, 21_000, 1)];

        let err = build_blocks(entries, OrderingAlgorithm::Fcfs, &params)
            .expect_err("a window that never advances must be refused");
        assert!(err.to_string().contains("block interval"));

        let negative = BuilderParams {
            block_interval_secs: -12,
            ..BuilderParams::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn target_above_cap_is_rejected() {
        let params = BuilderParams {
            gas_target: 61_000_000,
            ..BuilderParams::default()
        };
        let err = build_blocks(Vec::new(), OrderingAlgorithm::Greedy, &params)
            .expect_err("target over the cap must be refused");
        assert!(err.to_string().contains("exceeds hard cap"));

        let zero = BuilderParams {
            gas_target: 0,
            ..BuilderParams::default()
        };
        assert!(zero.validate().is_err());
        assert!(BuilderParams::default().validate().is_ok());
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("FCFS".parse::<OrderingAlgorithm>().ok(), Some(OrderingAlgorithm::Fcfs));
        assert_eq!("greedy".parse::<OrderingAlgorithm>().ok(), Some(OrderingAlgorithm::Greedy));
        assert!("egp".parse::<OrderingAlgorithm>().is_err());
    }
}
