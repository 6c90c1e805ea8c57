//! Per-block aggregation and dataset-level summary statistics.
//!
//! Sources record the block reward and block gas on transaction rows,
//! either repeated on every row of the block or written on one row with the
//! others left empty. Aggregation therefore groups by block first and
//! takes a single value per block before summing across blocks. A block's
//! value is its largest-magnitude row value, which resolves both layouts
//! and does not depend on row order.

use std::collections::BTreeMap;

use blockcmp_data::{Dataset, SourceLabel, TransactionRecord};
use serde::Serialize;
use tracing::info;

use crate::outlier::{filter_by, OutlierReport};

/// Gwei per ETH, used to express gain efficiency per unit of gas.
pub const GWEI_PER_ETH: f64 = 1e9;

/// One block's totals.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockAggregate {
    pub block_number: u64,
    /// Block reward in ETH.
    pub total_reward: f64,
    /// Gas recorded for the block.
    pub block_gas: u64,
    /// Transactions in the block.
    pub tx_count: usize,
}

impl BlockAggregate {
    fn empty(block_number: u64) -> Self {
        Self {
            block_number,
            total_reward: 0.0,
            block_gas: 0,
            tx_count: 0,
        }
    }

    fn absorb(&mut self, record: &TransactionRecord) {
        self.tx_count += 1;
        if record.block_reward.abs() > self.total_reward.abs()
            || (record.block_reward.abs() == self.total_reward.abs()
                && record.block_reward > self.total_reward)
        {
            self.total_reward = record.block_reward;
        }
        self.block_gas = self.block_gas.max(record.block_gas);
    }
}

/// Share of records carrying one transaction type.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryShare {
    pub tx_type: u8,
    pub count: usize,
    /// Fraction of the dataset's records, in [0, 1].
    pub share: f64,
}

/// One entry of the most profitable transactions ranking.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopTransaction {
    pub hash: String,
    /// Profit in ETH.
    pub profit: f64,
}

/// Dataset-level statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub label: SourceLabel,
    pub tx_count: usize,
    /// Transaction type distribution, ascending by type.
    pub categories: Vec<CategoryShare>,
    /// Sum of per-block rewards, in ETH.
    pub total_reward: f64,
    pub block_count: usize,
    /// `total_reward / block_count`, zero without blocks.
    pub avg_reward_per_block: f64,
    /// Blocks per second over the timestamp span, zero if the span is empty.
    pub block_frequency: f64,
    /// Reciprocal of `block_frequency` when that is non-zero.
    pub seconds_per_block: Option<f64>,
    /// Mean gas over blocks with positive gas, zero if there are none.
    pub avg_gas_occupancy: f64,
    /// Gwei of reward per unit of gas across blocks with positive gas.
    pub gain_efficiency: Option<f64>,
    /// Sum of burned base fees in ETH, when any record carries one.
    pub total_burned_fee: Option<f64>,
    pub top_transactions: Vec<TopTransaction>,
    pub top_blocks: Vec<BlockAggregate>,
}

fn group_blocks<F>(dataset: &Dataset, key: F) -> BTreeMap<u64, BlockAggregate>
where
    F: Fn(&TransactionRecord) -> u64,
{
    let mut blocks: BTreeMap<u64, BlockAggregate> = BTreeMap::new();
    for record in dataset.records() {
        let block_number = key(record);
        blocks
            .entry(block_number)
            .or_insert_with(|| BlockAggregate::empty(block_number))
            .absorb(record);
    }
    blocks
}

/// Per-block aggregates keyed by the source's own block numbers,
/// ascending.
pub fn block_aggregates(dataset: &Dataset) -> Vec<BlockAggregate> {
    group_blocks(dataset, |r| r.block_number).into_values().collect()
}

/// Per-block aggregates on the shared 1-based axis (Mined blocks shifted).
pub fn aligned_block_aggregates(dataset: &Dataset) -> Vec<BlockAggregate> {
    group_blocks(dataset, |r| dataset.aligned_block(r))
        .into_values()
        .collect()
}

/// Group-then-sum total reward.
pub fn total_reward(aggregates: &[BlockAggregate]) -> f64 {
    aggregates.iter().map(|b| b.total_reward).sum()
}

fn category_distribution(dataset: &Dataset) -> Vec<CategoryShare> {
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for record in dataset.records() {
        *counts.entry(record.tx_type).or_default() += 1;
    }

    let total = dataset.len() as f64;
    counts
        .into_iter()
        .map(|(tx_type, count)| CategoryShare {
            tx_type,
            count,
            share: count as f64 / total,
        })
        .collect()
}

/// Seconds between the earliest and latest timestamp, zero without any.
fn timestamp_span_secs(dataset: &Dataset) -> f64 {
    let mut stamps = dataset.records().iter().filter_map(|r| r.timestamp);
    let Some(first) = stamps.next() else {
        return 0.0;
    };
    let (min, max) = stamps.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
    (max - min).num_milliseconds() as f64 / 1000.0
}

fn top_transactions(dataset: &Dataset, top_n: usize) -> Vec<TopTransaction> {
    let mut ranked: Vec<&TransactionRecord> = dataset.records().iter().collect();
    ranked.sort_by(|a, b| b.profit.total_cmp(&a.profit));
    ranked
        .into_iter()
        .take(top_n)
        .map(|r| TopTransaction {
            hash: r.hash.clone(),
            profit: r.profit,
        })
        .collect()
}

/// Highest-reward blocks, ties broken by ascending block number.
pub fn top_blocks(aggregates: &[BlockAggregate], top_n: usize) -> Vec<BlockAggregate> {
    let mut ranked = aggregates.to_vec();
    ranked.sort_by(|a, b| {
        b.total_reward
            .total_cmp(&a.total_reward)
            .then(a.block_number.cmp(&b.block_number))
    });
    ranked.truncate(top_n);
    ranked
}

/// Computes the summary statistics of one dataset.
pub fn summarize(dataset: &Dataset, top_n: usize) -> DatasetSummary {
    let aggregates = block_aggregates(dataset);
    let total_reward = total_reward(&aggregates);
    let block_count = aggregates.len();

    let avg_reward_per_block = if block_count == 0 {
        0.0
    } else {
        total_reward / block_count as f64
    };

    let span = timestamp_span_secs(dataset);
    let block_frequency = if span > 0.0 {
        block_count as f64 / span
    } else {
        0.0
    };
    let seconds_per_block = (block_frequency > 0.0).then(|| span / block_count as f64);

    let gassed: Vec<u64> = aggregates
        .iter()
        .map(|b| b.block_gas)
        .filter(|gas| *gas > 0)
        .collect();
    let total_gas: u64 = gassed.iter().sum();
    let avg_gas_occupancy = if gassed.is_empty() {
        0.0
    } else {
        total_gas as f64 / gassed.len() as f64
    };
    let gain_efficiency = (total_gas > 0).then(|| total_reward * GWEI_PER_ETH / total_gas as f64);

    let total_burned_fee = dataset
        .records()
        .iter()
        .any(|r| r.burned_fee != 0.0)
        .then(|| dataset.records().iter().map(|r| r.burned_fee).sum());

    DatasetSummary {
        label: dataset.label(),
        tx_count: dataset.len(),
        categories: category_distribution(dataset),
        total_reward,
        block_count,
        avg_reward_per_block,
        block_frequency,
        seconds_per_block,
        avg_gas_occupancy,
        gain_efficiency,
        total_burned_fee,
        top_transactions: top_transactions(dataset, top_n),
        top_blocks: top_blocks(&aggregates, top_n),
    }
}

/// One point of a per-block reward chart.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// Block number on the shared 1-based axis.
    pub block: u64,
    /// Block reward in ETH.
    pub reward: f64,
}

/// Per-block reward series of one dataset, ready for charting.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RewardSeries {
    pub label: SourceLabel,
    pub points: Vec<SeriesPoint>,
    /// Blocks dropped by the block-level outlier filter.
    pub outliers: OutlierReport,
}

/// Builds the chart series with block-level outliers removed.
///
/// Block rewards are filtered as a population of their own; this never
/// feeds back into the transaction-level data.
pub fn reward_series(dataset: &Dataset, q: f64) -> RewardSeries {
    let points: Vec<SeriesPoint> = aligned_block_aggregates(dataset)
        .into_iter()
        .map(|b| SeriesPoint {
            block: b.block_number,
            reward: b.total_reward,
        })
        .collect();

    let filtered = filter_by(points, q, |p| p.reward);
    if filtered.report.removed > 0 {
        info!(
            label = %dataset.label(),
            removed = filtered.report.removed,
            "block outliers removed from chart series"
        );
    }

    RewardSeries {
        label: dataset.label(),
        points: filtered.kept,
        outliers: filtered.report,
    }
}
