//! Scenario partitioning and the per-scenario report.
//!
//! Every scenario is a filtered copy of the cleaned datasets; the
//! canonical datasets are never touched, so scenarios cannot affect each
//! other.

use std::fmt;
use std::path::Path;

use blockcmp_data::normalize::load_dataset;
use blockcmp_data::{DataError, Dataset, SourceLabel, TransactionRecord};
use eyre::{ensure, Result};
use serde::Serialize;
use tracing::info;

use crate::aggregate::{reward_series, summarize, DatasetSummary, RewardSeries};
use crate::compare::{compare, ComparisonResult};
use crate::config::AnalysisConfig;
use crate::outlier::{filter_transactions, OutlierReport};

/// A view over the cleaned datasets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Scenario {
    /// Every record.
    Full,
    /// Records whose transaction type differs from the given one.
    Excluding(u8),
    /// Records of the given transaction type only.
    Only(u8),
}

impl Scenario {
    /// The three scenarios of a run, in report order.
    pub fn all(category: u8) -> [Scenario; 3] {
        [Scenario::Full, Scenario::Excluding(category), Scenario::Only(category)]
    }

    pub fn applies(&self, record: &TransactionRecord) -> bool {
        match self {
            Scenario::Full => true,
            Scenario::Excluding(category) => record.tx_type != *category,
            Scenario::Only(category) => record.tx_type == *category,
        }
    }

    /// Filtered copy of `dataset`.
    pub fn view(&self, dataset: &Dataset) -> Dataset {
        match self {
            Scenario::Full => dataset.clone(),
            _ => dataset.retain(|r| self.applies(r)),
        }
    }

    /// File-name friendly identifier.
    pub fn slug(&self) -> String {
        match self {
            Scenario::Full => "full".to_string(),
            Scenario::Excluding(category) => format!("excluding_type{category}"),
            Scenario::Only(category) => format!("only_type{category}"),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Full => write!(f, "all transactions"),
            Scenario::Excluding(category) => write!(f, "excluding type {category}"),
            Scenario::Only(category) => write!(f, "only type {category}"),
        }
    }
}

/// The three datasets of a comparative run.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSet {
    greedy: Dataset,
    fcfs: Dataset,
    mined: Dataset,
}

impl SourceSet {
    /// # Errors
    /// Returns error if a dataset carries the wrong label for its slot.
    pub fn new(greedy: Dataset, fcfs: Dataset, mined: Dataset) -> Result<Self> {
        ensure!(greedy.label() == SourceLabel::Greedy, "greedy slot holds {}", greedy.label());
        ensure!(fcfs.label() == SourceLabel::Fcfs, "fcfs slot holds {}", fcfs.label());
        ensure!(mined.label() == SourceLabel::Mined, "mined slot holds {}", mined.label());
        Ok(Self { greedy, fcfs, mined })
    }

    /// Loads and normalizes all three sources.
    ///
    /// # Errors
    /// Returns the first [`DataError`]; nothing is returned unless every
    /// source loaded.
    #[tracing::instrument(skip_all)]
    pub fn load(
        greedy: &Path,
        fcfs: &Path,
        mined: &Path,
        config: &AnalysisConfig,
    ) -> Result<Self, DataError> {
        let options = config.normalize_options();
        Ok(Self {
            greedy: load_dataset(greedy, SourceLabel::Greedy, &options)?,
            fcfs: load_dataset(fcfs, SourceLabel::Fcfs, &options)?,
            mined: load_dataset(mined, SourceLabel::Mined, &options)?,
        })
    }

    pub fn get(&self, label: SourceLabel) -> &Dataset {
        match label {
            SourceLabel::Greedy => &self.greedy,
            SourceLabel::Fcfs => &self.fcfs,
            SourceLabel::Mined => &self.mined,
        }
    }

    /// Datasets in report order.
    pub fn iter(&self) -> impl Iterator<Item = &Dataset> {
        [&self.greedy, &self.fcfs, &self.mined].into_iter()
    }

    /// Copy with transaction-level outliers removed from each dataset.
    pub fn cleaned(&self, q: f64) -> (SourceSet, Vec<LabelledOutliers>) {
        let (greedy, g) = filter_transactions(&self.greedy, q);
        let (fcfs, f) = filter_transactions(&self.fcfs, q);
        let (mined, m) = filter_transactions(&self.mined, q);

        let outliers = vec![
            LabelledOutliers::new(SourceLabel::Greedy, g),
            LabelledOutliers::new(SourceLabel::Fcfs, f),
            LabelledOutliers::new(SourceLabel::Mined, m),
        ];
        (SourceSet { greedy, fcfs, mined }, outliers)
    }

    fn view(&self, scenario: Scenario) -> SourceSet {
        SourceSet {
            greedy: scenario.view(&self.greedy),
            fcfs: scenario.view(&self.fcfs),
            mined: scenario.view(&self.mined),
        }
    }
}

/// Transaction outliers removed from one dataset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LabelledOutliers {
    pub label: SourceLabel,
    #[serde(flatten)]
    pub report: OutlierReport,
}

impl LabelledOutliers {
    fn new(label: SourceLabel, report: OutlierReport) -> Self {
        Self { label, report }
    }
}

/// Results of one scenario.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub title: String,
    /// One per dataset, Greedy, FCFS, Mined.
    pub summaries: Vec<DatasetSummary>,
    /// Greedy and FCFS, each against Mined.
    pub comparisons: Vec<ComparisonResult>,
    /// Per-block reward series with block outliers removed.
    pub series: Vec<RewardSeries>,
}

/// Transaction outlier counts plus every scenario report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub transaction_outliers: Vec<LabelledOutliers>,
    pub scenarios: Vec<ScenarioReport>,
}

/// Runs one scenario over already cleaned sources.
pub fn run_scenario(cleaned: &SourceSet, scenario: Scenario, config: &AnalysisConfig) -> ScenarioReport {
    let view = cleaned.view(scenario);
    let mined = view.get(SourceLabel::Mined);

    let summaries: Vec<DatasetSummary> = view.iter().map(|d| summarize(d, config.top_n)).collect();
    let comparisons = [SourceLabel::Greedy, SourceLabel::Fcfs]
        .into_iter()
        .map(|label| compare(mined, view.get(label)))
        .collect();
    let series = view
        .iter()
        .map(|d| reward_series(d, config.outlier_quantile))
        .collect();

    info!(
        %scenario,
        greedy = view.greedy.len(),
        fcfs = view.fcfs.len(),
        mined = mined.len(),
        "scenario evaluated"
    );

    ScenarioReport {
        scenario,
        title: scenario.to_string(),
        summaries,
        comparisons,
        series,
    }
}

/// Runs the full, excluding and only scenarios over cleaned sources.
pub fn run_scenarios(cleaned: &SourceSet, config: &AnalysisConfig) -> Vec<ScenarioReport> {
    Scenario::all(config.category)
        .into_iter()
        .map(|scenario| run_scenario(cleaned, scenario, config))
        .collect()
}

/// Cleans the sources once and evaluates every scenario.
///
/// # Errors
/// Returns error if the configuration is invalid.
#[tracing::instrument(skip_all)]
pub fn analyze(sources: &SourceSet, config: &AnalysisConfig) -> Result<AnalysisReport> {
    config.validate()?;
    let (cleaned, transaction_outliers) = sources.cleaned(config.outlier_quantile);
    Ok(AnalysisReport {
        transaction_outliers,
        scenarios: run_scenarios(&cleaned, config),
    })
}
