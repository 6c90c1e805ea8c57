//! CSV export of simulated blocks.
//!
//! Block-level values (`BlockReward`, `BlockGas`) are written on the last
//! row of each block only; the other rows leave them empty.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::SecondsFormat;
use eyre::{Context, Result};

use crate::ordering::BuiltBlock;

/// Column order of exported files.
pub const HEADERS: [&str; 9] = [
    "TransactionHash",
    "TransactionType",
    "GasLimit",
    "MaxPriorityFee",
    "GananciaxTransaccion",
    "TimeStamp",
    "BlockNumber",
    "BlockReward",
    "BlockGas",
];

/// Writes `blocks` as CSV to `writer`. Returns the number of rows written.
///
/// # Errors
/// Returns error if the underlying writer fails.
pub fn write_blocks<W: Write>(writer: W, blocks: &[BuiltBlock]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(HEADERS)
        .wrap_err("failed to write CSV header")?;

    let mut rows = 0usize;
    for block in blocks {
        let last = block.transactions.len().saturating_sub(1);
        for (idx, tx) in block.transactions.iter().enumerate() {
            let (reward, gas) = if idx == last {
                (block.reward_wei.to_string(), block.gas_used.to_string())
            } else {
                (String::new(), String::new())
            };

            csv_writer
                .write_record([
                    tx.hash.clone(),
                    tx.tx_type.to_string(),
                    tx.gas_limit.to_string(),
                    tx.max_priority_fee.to_string(),
                    tx.profit_wei.to_string(),
                    tx.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                    block.number.to_string(),
                    reward,
                    gas,
                ])
                .wrap_err_with(|| format!("failed to write row for {}", tx.hash))?;
            rows += 1;
        }
    }

    csv_writer.flush().wrap_err("failed to flush CSV writer")?;
    Ok(rows)
}

/// Writes `blocks` to a CSV file at `path`, replacing any existing file.
///
/// # Errors
/// Returns error if the file cannot be created or written.
pub fn write_blocks_csv(path: &Path, blocks: &[BuiltBlock]) -> Result<usize> {
    let file = File::create(path).wrap_err_with(|| format!("failed to create {}", path.display()))?;
    write_blocks(file, blocks).wrap_err_with(|| format!("failed to write {}", path.display()))
}
