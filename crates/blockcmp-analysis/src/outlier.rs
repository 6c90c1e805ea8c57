//! Quantile-based outlier filtering.
//!
//! The threshold is the q-quantile of the strictly positive values only, so
//! a population dominated by zero-profit rows cannot pull it down to zero.
//! Values at or below the threshold are kept, as are all non-positive
//! values. With no positive values there is no threshold and nothing is
//! removed.
//!
//! Quantiles use linear interpolation between closest ranks: for `n`
//! sorted values the position is `(n - 1) * q`.

use blockcmp_data::Dataset;
use serde::Serialize;
use tracing::info;

/// What a filter pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct OutlierReport {
    /// Threshold applied, `None` when no positive value existed.
    pub threshold: Option<f64>,
    /// Number of items dropped.
    pub removed: usize,
}

/// Items surviving a filter pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Filtered<T> {
    pub kept: Vec<T>,
    pub report: OutlierReport,
}

/// Linearly interpolated q-quantile of an ascending slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let position = last as f64 * q.clamp(0.0, 1.0);
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// q-quantile over the strictly positive members of `values`.
pub fn positive_threshold<I>(values: I, q: f64) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut positive: Vec<f64> = values.into_iter().filter(|v| *v > 0.0).collect();
    positive.sort_by(f64::total_cmp);
    quantile_sorted(&positive, q)
}

/// Drops items whose `key` exceeds the positive-value q-quantile.
///
/// Order of the kept items is preserved.
pub fn filter_by<T, F>(items: Vec<T>, q: f64, key: F) -> Filtered<T>
where
    F: Fn(&T) -> f64,
{
    let Some(threshold) = positive_threshold(items.iter().map(&key), q) else {
        return Filtered {
            kept: items,
            report: OutlierReport::default(),
        };
    };

    let before = items.len();
    let kept: Vec<T> = items.into_iter().filter(|item| key(item) <= threshold).collect();

    Filtered {
        report: OutlierReport {
            threshold: Some(threshold),
            removed: before - kept.len(),
        },
        kept,
    }
}

/// Filters a plain sequence of values. Returns the survivors and how many
/// were removed.
pub fn filter_outliers(values: &[f64], q: f64) -> (Vec<f64>, usize) {
    let filtered = filter_by(values.to_vec(), q, |v| *v);
    (filtered.kept, filtered.report.removed)
}

/// Drops transactions whose profit is an outlier.
///
/// The result is a new dataset; for Mined its alignment origin is taken
/// from the surviving records.
pub fn filter_transactions(dataset: &Dataset, q: f64) -> (Dataset, OutlierReport) {
    let label = dataset.label();
    let filtered = filter_by(dataset.records().to_vec(), q, |r| r.profit);

    if filtered.report.removed > 0 {
        info!(
            %label,
            removed = filtered.report.removed,
            threshold = filtered.report.threshold,
            "transaction outliers removed"
        );
    }

    (Dataset::new(label, filtered.kept), filtered.report)
}
