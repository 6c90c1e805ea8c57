//! Normalization of raw source rows into [`TransactionRecord`]s.
//!
//! Two steps:
//! 1. [`canonicalize`] rewrites column aliases, creates missing schema
//!    columns as zero and coerces numeric cells to canonical text. It is
//!    idempotent.
//! 2. Conversion into typed records divides monetary fields by the Wei
//!    scale and derives the burned base fee.
//!
//! Field-level problems never fail: a cell that is not a number reads as
//! zero and is only counted.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, info};

use crate::source::{read_raw_records, DataError, RawRecord};
use crate::types::{Dataset, SourceLabel, TransactionRecord};

/// Canonical column names.
pub mod columns {
    pub const TRANSACTION_HASH: &str = "TransactionHash";
    pub const BLOCK_NUMBER: &str = "BlockNumber";
    pub const BLOCK_REWARD: &str = "BlockReward";
    pub const PROFIT: &str = "GananciaxTransaccion";
    pub const BLOCK_GAS: &str = "BlockGas";
    pub const GAS_USED: &str = "GasUsed";
    pub const BASE_FEE: &str = "BaseFee";
    pub const TRANSACTION_TYPE: &str = "TransactionType";
    pub const TIMESTAMP: &str = "TimeStamp";
}

/// Wei per ETH.
pub const DEFAULT_WEI_SCALE: f64 = 1e18;

/// Columns coerced to numbers; absent ones are created as zero.
pub const NUMERIC_COLUMNS: [&str; 7] = [
    columns::BLOCK_REWARD,
    columns::PROFIT,
    columns::BLOCK_GAS,
    columns::GAS_USED,
    columns::BASE_FEE,
    columns::BLOCK_NUMBER,
    columns::TRANSACTION_TYPE,
];

/// Maps alternative column spellings onto canonical names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnAliases {
    map: BTreeMap<String, String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self::empty()
            .with("BlockReward(Gwei)", columns::BLOCK_REWARD)
            .with("GananciaxTransaccion(Gwei)", columns::PROFIT)
            .with("BaseFee(Gwei)", columns::BASE_FEE)
            .with("GananciaxTransaccion(post BaseFee)", columns::PROFIT)
    }
}

impl ColumnAliases {
    pub fn empty() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Adds `alias -> canonical`, replacing any previous target of `alias`.
    pub fn with(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.map.insert(alias.into(), canonical.into());
        self
    }

    /// Canonical name for `column`, following alias chains to their end.
    ///
    /// Returns `column` itself if it has no alias or its chain loops.
    pub fn canonical<'a>(&'a self, column: &'a str) -> &'a str {
        let mut current = column;
        let mut hops = 0usize;
        while let Some(next) = self.map.get(current) {
            if next == current {
                break;
            }
            hops += 1;
            if hops > self.map.len() {
                return column;
            }
            current = next.as_str();
        }
        current
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Settings for [`normalize`].
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizeOptions {
    pub aliases: ColumnAliases,
    /// Smallest-unit amount per display unit.
    pub wei_scale: f64,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            aliases: ColumnAliases::default(),
            wei_scale: DEFAULT_WEI_SCALE,
        }
    }
}

/// Parses a numeric cell. Accepts decimal, exponent and `0x` hex forms.
///
/// Returns `None` for empty cells and anything that is not a finite number.
pub fn parse_number(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u128::from_str_radix(hex, 16).ok().map(|v| v as f64);
    }

    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses an ISO-8601 style timestamp. Offset-less forms are read as UTC.
pub fn parse_timestamp(cell: &str) -> Option<DateTime<Utc>> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Rewrites a raw row into canonical form.
///
/// A canonical column present in the source takes precedence over an alias
/// of it.
pub fn canonicalize(raw: &RawRecord, aliases: &ColumnAliases) -> RawRecord {
    canonicalize_counting(raw, aliases, &mut 0)
}

fn canonicalize_counting(raw: &RawRecord, aliases: &ColumnAliases, anomalies: &mut usize) -> RawRecord {
    let mut out = RawRecord::new();

    for (column, value) in raw.iter().filter(|(c, _)| aliases.canonical(c) == *c) {
        out.insert(column, value);
    }
    for (column, value) in raw.iter() {
        let canonical = aliases.canonical(column);
        if canonical != column && !out.contains(canonical) {
            out.insert(canonical, value);
        }
    }

    for column in NUMERIC_COLUMNS {
        let cell = out.get(column).unwrap_or("");
        let value = match parse_number(cell) {
            Some(v) => v,
            None => {
                if !cell.trim().is_empty() {
                    *anomalies += 1;
                }
                0.0
            }
        };
        out.insert(column, value.to_string());
    }

    if !out.contains(columns::TRANSACTION_HASH) {
        out.insert(columns::TRANSACTION_HASH, "");
    }

    let timestamp = out
        .get(columns::TIMESTAMP)
        .and_then(parse_timestamp)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_default();
    out.insert(columns::TIMESTAMP, timestamp);

    out
}

fn to_transaction(canonical: &RawRecord, wei_scale: f64) -> TransactionRecord {
    let number = |column: &str| canonical.get(column).and_then(parse_number).unwrap_or(0.0);

    // `as` saturates: negatives and NaN become 0.
    let gas_used = number(columns::GAS_USED) as u64;
    let base_fee = number(columns::BASE_FEE) / wei_scale;
    let burned_fee = if base_fee != 0.0 && gas_used != 0 {
        base_fee * gas_used as f64
    } else {
        0.0
    };

    TransactionRecord {
        hash: canonical
            .get(columns::TRANSACTION_HASH)
            .unwrap_or_default()
            .to_string(),
        block_number: number(columns::BLOCK_NUMBER) as u64,
        gas_used,
        block_gas: number(columns::BLOCK_GAS) as u64,
        profit: number(columns::PROFIT) / wei_scale,
        block_reward: number(columns::BLOCK_REWARD) / wei_scale,
        base_fee,
        burned_fee,
        tx_type: number(columns::TRANSACTION_TYPE) as u8,
        timestamp: canonical.get(columns::TIMESTAMP).and_then(parse_timestamp),
    }
}

/// Normalizes raw rows into a labelled dataset.
#[tracing::instrument(skip(raw, options), fields(rows = raw.len()))]
pub fn normalize(raw: &[RawRecord], label: SourceLabel, options: &NormalizeOptions) -> Dataset {
    let mut anomalies = 0usize;
    let records = raw
        .iter()
        .map(|row| canonicalize_counting(row, &options.aliases, &mut anomalies))
        .map(|row| to_transaction(&row, options.wei_scale))
        .collect::<Vec<_>>();

    if anomalies > 0 {
        debug!(%label, anomalies, "non-numeric cells coerced to zero");
    }

    Dataset::new(label, records)
}

/// Reads and normalizes the source at `path`.
///
/// # Errors
/// Propagates [`DataError`] when the source cannot be read.
pub fn load_dataset(
    path: &Path,
    label: SourceLabel,
    options: &NormalizeOptions,
) -> Result<Dataset, DataError> {
    let raw = read_raw_records(path)?;
    let dataset = normalize(&raw, label, options);
    info!(%label, records = dataset.len(), "dataset normalized");
    Ok(dataset)
}
