//! Production of the Mined source from on-chain blocks.
//!
//! Each included transaction earns the builder
//! `(effective gas price - base fee) * gas used`. Block gas and the block
//! reward (the sum of those profits) are written on the last row of each
//! block, the same layout the simulated builders export.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use eyre::{eyre, Context, Result};
use tracing::{debug, info, warn};

use crate::normalize::columns;
use crate::source::{block_range, RawRecord};

/// Blocks fetched concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 70;

/// Attempts per block before it is given up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Wait after the first failed attempt; doubles on every further failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Column of mempool captures holding the chain head at capture time.
pub const NETWORK_BLOCK: &str = "NetworkBlock";

/// Column order of mined files.
pub const HEADERS: [&str; 9] = [
    columns::TRANSACTION_HASH,
    columns::TRANSACTION_TYPE,
    columns::GAS_USED,
    "MaxPriorityFee",
    columns::PROFIT,
    columns::BASE_FEE,
    columns::BLOCK_NUMBER,
    columns::BLOCK_GAS,
    columns::BLOCK_REWARD,
];

/// A transaction as seen in a mined block joined with its receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinedTransaction {
    pub hash: String,
    pub tx_type: u8,
    /// Gas consumed, from the receipt.
    pub gas_used: u128,
    /// Declared priority fee cap; zero for legacy transactions.
    pub max_priority_fee: u128,
    /// Price paid per unit of gas, from the receipt.
    pub effective_gas_price: Option<u128>,
    /// Declared gas price, used when the receipt has no effective price.
    pub gas_price: Option<u128>,
}

impl MinedTransaction {
    /// Builder profit in Wei. Negative when the price paid sits below the
    /// base fee.
    pub fn profit_wei(&self, base_fee: u128) -> i128 {
        let price = self.effective_gas_price.or(self.gas_price).unwrap_or(0);
        let priority = signed(price).saturating_sub(signed(base_fee));
        priority.saturating_mul(signed(self.gas_used))
    }
}

fn signed(value: u128) -> i128 {
    i128::try_from(value).unwrap_or(i128::MAX)
}

/// One mined block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinedBlock {
    pub number: u64,
    /// Zero before the base fee existed.
    pub base_fee: u128,
    /// Gas used by the whole block, from the header.
    pub gas_used: u128,
    pub transactions: Vec<MinedTransaction>,
}

impl MinedBlock {
    /// Sum of the per-transaction profits.
    pub fn reward_wei(&self) -> i128 {
        self.transactions
            .iter()
            .map(|tx| tx.profit_wei(self.base_fee))
            .fold(0i128, i128::saturating_add)
    }
}

/// Block range a mempool capture was recorded over, from its
/// `NetworkBlock` column.
pub fn capture_block_range(capture: &[RawRecord]) -> Option<(u64, u64)> {
    block_range(capture, NETWORK_BLOCK)
}

/// Writes `blocks` as CSV to `writer`. Returns the number of rows written.
///
/// Rows are ordered by block number, then by hash. Blocks without
/// transactions produce no rows.
///
/// # Errors
/// Returns error if the underlying writer fails.
pub fn write_mined<W: Write>(writer: W, blocks: &[MinedBlock]) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(HEADERS)
        .wrap_err("failed to write CSV header")?;

    let mut ordered: Vec<&MinedBlock> = blocks.iter().collect();
    ordered.sort_by_key(|block| block.number);

    let mut rows = 0usize;
    for block in ordered {
        let mut transactions: Vec<&MinedTransaction> = block.transactions.iter().collect();
        transactions.sort_by(|a, b| a.hash.cmp(&b.hash));

        let last = transactions.len().saturating_sub(1);
        for (idx, tx) in transactions.into_iter().enumerate() {
            let (gas, reward) = if idx == last {
                (block.gas_used.to_string(), block.reward_wei().to_string())
            } else {
                (String::new(), String::new())
            };

            csv_writer
                .write_record([
                    tx.hash.clone(),
                    tx.tx_type.to_string(),
                    tx.gas_used.to_string(),
                    tx.max_priority_fee.to_string(),
                    tx.profit_wei(block.base_fee).to_string(),
                    block.base_fee.to_string(),
                    block.number.to_string(),
                    gas,
                    reward,
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
pub fn write_mined_csv(path: &Path, blocks: &[MinedBlock]) -> Result<usize> {
    let file = File::create(path).wrap_err_with(|| format!("failed to create {}", path.display()))?;
    write_mined(file, blocks).wrap_err_with(|| format!("failed to write {}", path.display()))
}

/// Somewhere full blocks can be read from.
pub trait BlockSource {
    /// Fetches block `number` with its transactions and receipts.
    ///
    /// Returns `Ok(None)` if the block does not exist.
    fn fetch_block(&self, number: u64) -> Result<Option<MinedBlock>>;
}

/// Exponential backoff for failed block fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Fetches one block, retrying failures under `policy`.
///
/// # Errors
/// Returns the last error once every attempt has failed.
pub fn fetch_with_retries<S: BlockSource + ?Sized>(
    source: &S,
    number: u64,
    policy: &RetryPolicy,
) -> Result<Option<MinedBlock>> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match source.fetch_block(number) {
            Ok(block) => return Ok(block),
            Err(e) if attempt < attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    block_number = number,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "block fetch failed, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                return Err(e.wrap_err(format!(
                    "block {number} failed after {attempts} attempts"
                )))
            }
        }
    }
}

/// Settings for [`collect_range`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectOptions {
    /// Blocks fetched concurrently.
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of [`collect_range`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectedRange {
    /// Fetched blocks in ascending order.
    pub blocks: Vec<MinedBlock>,
    /// Block numbers the source does not know.
    pub missing: Vec<u64>,
    /// Block numbers that kept failing.
    pub failed: Vec<u64>,
}

/// Fetches every block in `start..=end`.
///
/// Blocks are fetched in concurrent batches. A block that is missing or
/// keeps failing is recorded and skipped; it never stops the range.
/// `progress` is called with the size of each finished batch.
#[tracing::instrument(skip(source, options, progress))]
pub fn collect_range<S, F>(
    source: &S,
    start: u64,
    end: u64,
    options: &CollectOptions,
    mut progress: F,
) -> CollectedRange
where
    S: BlockSource + Sync + ?Sized,
    F: FnMut(usize),
{
    let mut collected = CollectedRange::default();
    if start > end {
        return collected;
    }

    let numbers: Vec<u64> = (start..=end).collect();
    let retry = &options.retry;

    for batch in numbers.chunks(options.batch_size.max(1)) {
        let results: Vec<(u64, Result<Option<MinedBlock>>)> = thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|&number| (number, scope.spawn(move || fetch_with_retries(source, number, retry))))
                .collect();
            handles
                .into_iter()
                .map(|(number, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(eyre!("fetch of block {number} panicked")));
                    (number, result)
                })
                .collect()
        });

        for (number, result) in results {
            match result {
                Ok(Some(block)) => {
                    debug!(
                        block_number = number,
                        transactions = block.transactions.len(),
                        "block collected"
                    );
                    collected.blocks.push(block);
                }
                Ok(None) => {
                    warn!(block_number = number, "block not found");
                    collected.missing.push(number);
                }
                Err(e) => {
                    warn!(block_number = number, error = %e, "block skipped");
                    collected.failed.push(number);
                }
            }
        }
        progress(batch.len());
    }

    info!(
        start,
        end,
        blocks = collected.blocks.len(),
        missing = collected.missing.len(),
        failed = collected.failed.len(),
        "block range collected"
    );
    collected
}
