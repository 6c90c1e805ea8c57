//! Shared test helpers and utilities.
//!
//! Factory functions that write small CSV sources to a temporary directory
//! in the layouts the loaders accept.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use blockcmp_analysis::AnalysisConfig;
use blockcmp_data::{Dataset, SourceLabel, TransactionRecord};
use tempfile::TempDir;

/// One ETH in Wei, as written in source files.
pub const ETH: u128 = 1_000_000_000_000_000_000;

/// Creates a fresh temporary directory for CSV fixtures.
///
/// # Panics
/// Panics if the directory cannot be created.
pub fn fixture_dir() -> TempDir {
    tempfile::tempdir().expect("temporary directory should be creatable")
}

/// Writes `header` and `rows` as a CSV file named `name` inside `dir`.
///
/// # Panics
/// Panics if the file cannot be written.
pub fn write_csv(dir: &Path, name: &str, header: &str, rows: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut text = String::from(header);
    text.push('\n');
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    fs::write(&path, text).expect("fixture should be writable");
    path
}

/// Header of mined sources, using the Gwei-suffixed reward alias.
pub const MINED_HEADER: &str = "TransactionHash,TransactionType,GasUsed,GananciaxTransaccion,BaseFee,BlockNumber,BlockGas,BlockReward(Gwei),TimeStamp";

/// Header of simulated sources, in the builder export layout.
pub const SIMULATED_HEADER: &str = "TransactionHash,TransactionType,GasLimit,MaxPriorityFee,GananciaxTransaccion,TimeStamp,BlockNumber,BlockReward,BlockGas";

/// Header of mempool captures.
pub const MEMPOOL_HEADER: &str =
    "TransactionHash,TransactionType,GasLimit,MaxPriorityFee,GananciaxTransaccion,TimeStamp,NetworkBlock";

/// A mined row repeating the block reward and gas on every transaction.
pub fn mined_row(hash: &str, tx_type: u8, profit_wei: u128, block: u64, block_gas: u64, reward_wei: u128, timestamp: &str) -> String {
    format!("{hash},{tx_type},21000,{profit_wei},1000000000,{block},{block_gas},{reward_wei},{timestamp}")
}

/// A simulated row; `block_values` carries (reward, gas) on the last row of
/// a block only.
pub fn simulated_row(hash: &str, tx_type: u8, profit_wei: u128, block: u64, block_values: Option<(u128, u64)>) -> String {
    let (reward, gas) = match block_values {
        Some((reward, gas)) => (reward.to_string(), gas.to_string()),
        None => (String::new(), String::new()),
    };
    format!("{hash},{tx_type},21000,1,{profit_wei},2025-06-15T15:06:40.000Z,{block},{reward},{gas}")
}

/// A mempool row observed `second` seconds after 2025-06-15T15:06:40Z.
pub fn mempool_row(hash: &str, second: u32, gas_limit: u128, priority_fee: u128, network_block: u64) -> String {
    let timestamp = format!("2025-06-15T15:{:02}:{:02}Z", 6 + (40 + second) / 60, (40 + second) % 60);
    format!(
        "{hash},2,{gas_limit},{priority_fee},{},{timestamp},{network_block}",
        gas_limit * priority_fee
    )
}

/// Writes the three reference sources used across pipeline tests.
///
/// Mined: block 8500000 = {0xa, 0xb}, block 8500001 = {0xc}.
/// Greedy: block 1 = {0xa, 0xc}, block 2 = {0xb}.
/// FCFS: block 1 = {0xa, 0xb}, block 2 = {0xc, 0xd}.
/// Types: 0xb is legacy (0), everything else is type 2.
pub fn write_reference_sources(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let mined = write_csv(
        dir,
        "mined.csv",
        MINED_HEADER,
        &[
            mined_row("0xa", 2, ETH, 8_500_000, 42_000, 3 * ETH, "2025-06-15T15:06:40Z"),
            mined_row("0xb", 0, ETH, 8_500_000, 42_000, 3 * ETH, "2025-06-15T15:06:40Z"),
            mined_row("0xc", 2, ETH / 2, 8_500_001, 21_000, ETH, "2025-06-15T15:06:52Z"),
        ],
    );
    let greedy = write_csv(
        dir,
        "greedy.csv",
        SIMULATED_HEADER,
        &[
            simulated_row("0xa", 2, ETH, 1, None),
            simulated_row("0xc", 2, ETH / 2, 1, Some((3 * ETH / 2, 42_000))),
            simulated_row("0xb", 0, ETH, 2, Some((ETH, 21_000))),
        ],
    );
    let fcfs = write_csv(
        dir,
        "fcfs.csv",
        SIMULATED_HEADER,
        &[
            simulated_row("0xa", 2, ETH, 1, None),
            simulated_row("0xb", 0, ETH, 1, Some((2 * ETH, 42_000))),
            simulated_row("0xc", 2, ETH / 2, 2, None),
            simulated_row("0xd", 2, 0, 2, Some((ETH / 2, 42_000))),
        ],
    );
    (greedy, fcfs, mined)
}

/// Default configuration.
pub fn test_config() -> AnalysisConfig {
    AnalysisConfig::default()
}

/// Builds an in-memory record with neutral defaults.
pub fn sample_record(hash: &str, block_number: u64, tx_type: u8, profit: f64) -> TransactionRecord {
    TransactionRecord {
        hash: hash.to_string(),
        block_number,
        gas_used: 21_000,
        block_gas: 0,
        profit,
        block_reward: 0.0,
        base_fee: 0.0,
        burned_fee: 0.0,
        tx_type,
        timestamp: None,
    }
}

/// Builds an in-memory dataset from `(hash, block)` pairs.
pub fn sample_dataset(label: SourceLabel, rows: &[(&str, u64)]) -> Dataset {
    Dataset::new(
        label,
        rows.iter()
            .map(|(hash, block)| sample_record(hash, *block, 2, 0.0))
            .collect(),
    )
}
