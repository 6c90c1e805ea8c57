//! CSV ingestion for raw transaction sources.
//!
//! A source is read once into an ordered sequence of [`RawRecord`]s. Cells
//! are kept as text; typing and unit handling happen in
//! [`crate::normalize`]. The only failures surfaced here are sources that
//! cannot be opened or parsed at all.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::normalize::parse_number;

/// Errors raised while reading a raw source.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// The source could not be opened or read.
    #[error("source {} is unavailable", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The source was opened but is not valid CSV.
    #[error("source {} could not be parsed as CSV", .path.display())]
    MalformedSource {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One untyped row: column name to cell text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from `(column, value)` pairs. Later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.fields.remove(column)
    }

    /// Columns and values in column-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Reads every row of the CSV file at `path`.
///
/// # Errors
/// Returns [`DataError::SourceUnavailable`] if the file cannot be opened and
/// [`DataError::MalformedSource`] if its contents are not CSV.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn read_raw_records(path: &Path) -> Result<Vec<RawRecord>, DataError> {
    let file = File::open(path).map_err(|source| DataError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    let records = raw_records_from_reader(BufReader::new(file), path)?;
    info!(path = %path.display(), rows = records.len(), "source loaded");
    Ok(records)
}

/// Reads CSV rows from any reader. `origin` names the source in errors.
///
/// Headers and cells are trimmed. Rows shorter than the header simply lack
/// the trailing columns.
///
/// # Errors
/// Returns [`DataError::MalformedSource`] if the CSV stream is invalid.
pub fn raw_records_from_reader<R: Read>(
    reader: R,
    origin: &Path,
) -> Result<Vec<RawRecord>, DataError> {
    let malformed = |source: csv::Error| DataError::MalformedSource {
        path: origin.to_path_buf(),
        source,
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers().map_err(malformed)?.clone();
    let mut records = Vec::new();

    for (line, result) in csv_reader.records().enumerate() {
        let row = result.map_err(malformed)?;
        if row.iter().all(str::is_empty) {
            debug!(line, "skipping blank row");
            continue;
        }

        let record = RawRecord::from_pairs(
            headers
                .iter()
                .zip(row.iter())
                .filter(|(header, _)| !header.is_empty()),
        );
        records.push(record);
    }

    Ok(records)
}

/// Smallest and largest block number found in `column`.
///
/// Cells that do not hold a non-negative number are ignored. Returns `None`
/// when no cell qualifies.
pub fn block_range(records: &[RawRecord], column: &str) -> Option<(u64, u64)> {
    records
        .iter()
        .filter_map(|r| r.get(column))
        .filter_map(parse_number)
        .filter(|v| *v >= 0.0)
        .map(|v| v as u64)
        .fold(None, |acc, block| match acc {
            None => Some((block, block)),
            Some((lo, hi)) => Some((lo.min(block), hi.max(block))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
TransactionHash, BlockNumber ,BlockReward
0xaa,1,
0xbb,1,2500000000000000000

0xcc,2
";

    #[test]
    fn reads_trimmed_rows_and_skips_blank_lines() {
        let records = raw_records_from_reader(SAMPLE.as_bytes(), Path::new("sample.csv"))
            .expect("sample should parse");

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("BlockNumber"), Some("1"));
        assert_eq!(records[0].get("BlockReward"), Some(""));
        assert_eq!(records[1].get("BlockReward"), Some("2500000000000000000"));
        assert!(!records[2].contains("BlockReward"), "short row lacks trailing column");
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_raw_records(&dir.path().join("absent.csv"))
            .expect_err("missing file must fail");

        assert!(matches!(err, DataError::SourceUnavailable { .. }));
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write sample");

        let records = read_raw_records(file.path()).expect("file should load");
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn block_range_ignores_unparseable_cells() {
        let records = vec![
            RawRecord::from_pairs([("NetworkBlock", "8500010")]),
            RawRecord::from_pairs([("NetworkBlock", "pending")]),
            RawRecord::from_pairs([("NetworkBlock", "8500003")]),
            RawRecord::from_pairs([("Other", "1")]),
        ];

        assert_eq!(
            block_range(&records, "NetworkBlock"),
            Some((8_500_003, 8_500_010))
        );
        assert_eq!(block_range(&records, "BlockNumber"), None);
    }
}
