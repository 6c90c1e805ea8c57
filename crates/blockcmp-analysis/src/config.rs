//! Analysis configuration.
//!
//! Built once by the caller and passed by reference to every entry point.

use blockcmp_data::normalize::{ColumnAliases, NormalizeOptions, DEFAULT_WEI_SCALE};
use eyre::{ensure, Result};

/// Default quantile for outlier thresholds.
pub const DEFAULT_OUTLIER_QUANTILE: f64 = 0.99;

/// Transaction type split out by the partitioned scenarios (EIP-1559).
pub const DEFAULT_CATEGORY: u8 = 2;

/// Length of top-N rankings.
pub const DEFAULT_TOP_N: usize = 5;

/// Settings shared by every stage of an analysis run.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisConfig {
    /// Quantile in (0, 1) above which positive values are outliers.
    pub outlier_quantile: f64,
    /// Transaction type excluded / isolated by the partitioned scenarios.
    pub category: u8,
    /// Smallest-unit amount per display unit.
    pub wei_scale: f64,
    /// Entries kept in top transaction and top block rankings.
    pub top_n: usize,
    /// Column spelling rewrites applied before normalization.
    pub column_aliases: ColumnAliases,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            outlier_quantile: DEFAULT_OUTLIER_QUANTILE,
            category: DEFAULT_CATEGORY,
            wei_scale: DEFAULT_WEI_SCALE,
            top_n: DEFAULT_TOP_N,
            column_aliases: ColumnAliases::default(),
        }
    }
}

impl AnalysisConfig {
    /// Checks that every knob is in range.
    ///
    /// # Errors
    /// Returns error if the quantile is outside (0, 1), the scale is not a
    /// positive finite number, or `top_n` is zero.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.outlier_quantile > 0.0 && self.outlier_quantile < 1.0,
            "outlier quantile must be in (0, 1), got {}",
            self.outlier_quantile
        );
        ensure!(
            self.wei_scale.is_finite() && self.wei_scale > 0.0,
            "wei scale must be a positive finite number, got {}",
            self.wei_scale
        );
        ensure!(self.top_n > 0, "top-N ranking length must be at least 1");
        Ok(())
    }

    /// Options handed to the normalizer.
    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            aliases: self.column_aliases.clone(),
            wei_scale: self.wei_scale,
        }
    }
}
