//! Typed mempool entries parsed from a raw capture.

use blockcmp_data::normalize::{parse_number, parse_timestamp};
use blockcmp_data::RawRecord;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// A pending transaction observed in the mempool.
#[derive(Clone, Debug, PartialEq)]
pub struct MempoolEntry {
    /// Transaction hash.
    pub hash: String,
    /// Transaction type (0 legacy, 2 EIP-1559, ...).
    pub tx_type: u8,
    /// Declared gas limit.
    pub gas_limit: u128,
    /// Max priority fee per gas in Wei.
    pub max_priority_fee: u128,
    /// Expected builder profit in Wei (gas limit times priority fee).
    pub profit_wei: u128,
    /// When the transaction was first seen.
    pub timestamp: DateTime<Utc>,
    /// Network head when the transaction was seen, if recorded.
    pub network_block: Option<u64>,
}

impl MempoolEntry {
    /// Observation time in whole Unix seconds.
    pub fn timestamp_secs(&self) -> i64 {
        self.timestamp.timestamp()
    }

    /// Priority fee per unit of gas limit, the Greedy ranking key.
    pub fn fee_ratio(&self) -> f64 {
        self.max_priority_fee as f64 / self.gas_limit as f64
    }
}

/// Why a raw row was not admitted to the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// `TimeStamp` missing or not a date.
    BadTimestamp,
    /// `GasLimit` missing, zero, unparseable or above the hard cap.
    BadGasLimit,
    /// Priority fee or profit is not an integer.
    BadAmount,
}

/// Result of parsing a mempool capture.
#[derive(Clone, Debug, Default)]
pub struct ParsedMempool {
    pub entries: Vec<MempoolEntry>,
    pub rejected: usize,
}

/// Integer amount in decimal or `0x`/`0X` hex. Empty cells count as zero.
fn parse_amount(cell: Option<&str>) -> Option<u128> {
    let trimmed = cell.unwrap_or("").trim();
    if trimmed.is_empty() {
        return Some(0);
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u128::from_str_radix(hex, 16).ok();
    }
    trimmed.parse::<u128>().ok()
}

/// Parses one raw row. `gas_hard_cap` bounds the admissible gas limit.
pub fn parse_entry(raw: &RawRecord, gas_hard_cap: u128) -> Result<MempoolEntry, RejectReason> {
    let timestamp = raw
        .get("TimeStamp")
        .and_then(parse_timestamp)
        .ok_or(RejectReason::BadTimestamp)?;

    let gas_limit = parse_amount(raw.get("GasLimit")).ok_or(RejectReason::BadGasLimit)?;
    if gas_limit == 0 || gas_limit > gas_hard_cap {
        return Err(RejectReason::BadGasLimit);
    }

    let max_priority_fee =
        parse_amount(raw.get("MaxPriorityFee")).ok_or(RejectReason::BadAmount)?;
    let profit_wei =
        parse_amount(raw.get("GananciaxTransaccion")).ok_or(RejectReason::BadAmount)?;

    Ok(MempoolEntry {
        hash: raw.get("TransactionHash").unwrap_or_default().to_string(),
        tx_type: raw
            .get("TransactionType")
            .and_then(parse_number)
            .unwrap_or(0.0) as u8,
        gas_limit,
        max_priority_fee,
        profit_wei,
        timestamp,
        network_block: raw
            .get("NetworkBlock")
            .and_then(parse_number)
            .filter(|v| *v >= 0.0)
            .map(|v| v as u64),
    })
}

/// Parses every row, dropping the ones that cannot enter the pool.
pub fn parse_mempool(raw: &[RawRecord], gas_hard_cap: u128) -> ParsedMempool {
    let mut parsed = ParsedMempool::default();

    for (row, record) in raw.iter().enumerate() {
        match parse_entry(record, gas_hard_cap) {
            Ok(entry) => parsed.entries.push(entry),
            Err(reason) => {
                debug!(row, ?reason, "mempool row rejected");
                parsed.rejected += 1;
            }
        }
    }

    info!(
        admitted = parsed.entries.len(),
        rejected = parsed.rejected,
        "mempool parsed"
    );
    parsed
}
