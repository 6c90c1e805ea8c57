//! End-to-end tests: CSV sources through normalization, cleaning and the
//! three scenario reports.

mod common;

use blockcmp_analysis::aggregate::block_aggregates;
use blockcmp_analysis::{analyze, Scenario, SourceSet};
use blockcmp_data::normalize::{load_dataset, NormalizeOptions};
use blockcmp_data::{DataError, SourceLabel};
use common::*;
use eyre::Result;

fn load_reference() -> (tempfile::TempDir, SourceSet) {
    let dir = fixture_dir();
    let (greedy, fcfs, mined) = write_reference_sources(dir.path());
    let sources = SourceSet::load(&greedy, &fcfs, &mined, &test_config())
        .expect("reference sources should load");
    (dir, sources)
}

/// Mined rewards repeat on every row; simulated ones sit on the last row of
/// each block. Both must sum one value per block.
#[test]
fn totals_group_by_block_before_summing() {
    let (_dir, sources) = load_reference();
    let report = analyze(&sources, &test_config()).expect("default config is valid");
    let full = &report.scenarios[0];

    let totals: Vec<f64> = full.summaries.iter().map(|s| s.total_reward).collect();
    assert_eq!(totals, vec![2.5, 2.5, 4.0]);

    let mined = &full.summaries[2];
    assert_eq!(mined.label, SourceLabel::Mined);
    assert_eq!(mined.block_count, 2);
    assert_eq!(mined.avg_reward_per_block, 2.0);
    assert_eq!(mined.seconds_per_block, Some(6.0));
    assert_eq!(mined.avg_gas_occupancy, 31_500.0);
    let burned = mined.total_burned_fee.expect("mined rows carry a base fee");
    assert!((burned - 3.0 * 21_000.0 * 1e-9).abs() < 1e-15);

    let greedy = &full.summaries[0];
    assert_eq!(greedy.seconds_per_block, None, "simulated rows share one timestamp");
    assert_eq!(greedy.top_blocks[0].block_number, 1);
}

#[test]
fn full_scenario_comparisons() {
    let (_dir, sources) = load_reference();
    let report = analyze(&sources, &test_config()).expect("default config is valid");
    let full = &report.scenarios[0];
    assert_eq!(full.scenario, Scenario::Full);

    let greedy = &full.comparisons[0];
    assert_eq!(greedy.candidate, SourceLabel::Greedy);
    assert_eq!(greedy.coverage, 100.0);
    let latency = greedy.latency.as_ref().expect("all hashes match");
    assert_eq!((latency.min, latency.max), (-1, 1));
    assert_eq!(latency.mean, 0.0);
    let similarity = greedy.similarity.as_ref().expect("blocks 1 and 2 align");
    assert!((similarity.mean_jaccard - 1.0 / 6.0).abs() < 1e-12);

    let fcfs = &full.comparisons[1];
    assert_eq!(fcfs.coverage, 100.0);
    assert_eq!(fcfs.latency.as_ref().map(|l| l.mean), Some(0.0));
    let similarity = fcfs.similarity.as_ref().expect("blocks 1 and 2 align");
    assert_eq!(similarity.mean_jaccard, 0.75);
}

#[test]
fn partitioned_scenarios_share_the_block_axis() {
    let (_dir, sources) = load_reference();
    let report = analyze(&sources, &test_config()).expect("default config is valid");

    let excluding = &report.scenarios[1];
    assert_eq!(excluding.scenario, Scenario::Excluding(2));
    assert!(excluding.summaries.iter().all(|s| s.tx_count == 1));
    let greedy = &excluding.comparisons[0];
    assert_eq!(greedy.latency.as_ref().map(|l| l.mean), Some(-1.0));
    assert!(greedy.similarity.is_none(), "0xb sits in different blocks");
    let fcfs = &excluding.comparisons[1];
    assert_eq!(fcfs.similarity.as_ref().map(|s| s.mean_jaccard), Some(1.0));

    let only = &report.scenarios[2];
    assert_eq!(only.scenario, Scenario::Only(2));
    let greedy = &only.comparisons[0];
    assert_eq!(greedy.latency.as_ref().map(|l| l.mean), Some(0.5));
    let fcfs = &only.comparisons[1];
    assert_eq!(fcfs.similarity.as_ref().map(|s| s.mean_jaccard), Some(0.75));
}

#[test]
fn series_drop_block_outliers_only() {
    let (_dir, sources) = load_reference();
    let report = analyze(&sources, &test_config()).expect("default config is valid");
    let full = &report.scenarios[0];

    let mined_series = &full.series[2];
    assert_eq!(mined_series.label, SourceLabel::Mined);
    assert_eq!(mined_series.outliers.removed, 1);
    assert_eq!(mined_series.points.len(), 1);
    assert_eq!(mined_series.points[0].block, 2);

    // rankings still see the filtered block
    assert_eq!(full.summaries[2].top_blocks[0].block_number, 8_500_000);
    assert!(report.transaction_outliers.iter().all(|o| o.report.removed == 0));
}

#[test]
fn missing_source_stops_the_run() {
    let dir = fixture_dir();
    let (greedy, _fcfs, mined) = write_reference_sources(dir.path());
    let missing = dir.path().join("fcfs_missing.csv");

    let err = SourceSet::load(&greedy, &missing, &mined, &test_config())
        .expect_err("a missing source must fail the load");

    match err {
        DataError::SourceUnavailable { path, .. } => assert_eq!(path, missing),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn wei_amounts_convert_to_eth() {
    let dir = fixture_dir();
    let path = write_csv(
        dir.path(),
        "mined.csv",
        MINED_HEADER,
        &[mined_row(
            "0xabc",
            2,
            2_500_000_000_000_000_000,
            100,
            21_000,
            0,
            "2025-06-15T15:06:40Z",
        )],
    );

    let dataset = load_dataset(&path, SourceLabel::Mined, &NormalizeOptions::default())
        .expect("fixture loads");

    assert_eq!(dataset.records()[0].profit, 2.5);
    assert_eq!(dataset.aligned_block(&dataset.records()[0]), 1);
    assert_eq!(block_aggregates(&dataset)[0].block_number, 100);
}

#[test]
fn unparseable_cells_read_as_zero() {
    let dir = fixture_dir();
    let path = write_csv(
        dir.path(),
        "greedy.csv",
        SIMULATED_HEADER,
        &[
            "0xa,2,21000,1,not-a-number,2025-06-15T15:06:40.000Z,1,,".to_string(),
            "0xb,2,21000,1,1000000000000000000,garbage,1,oops,21000".to_string(),
        ],
    );

    let dataset = load_dataset(&path, SourceLabel::Greedy, &NormalizeOptions::default())
        .expect("field problems never fail a load");

    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.records()[0].profit, 0.0);
    assert_eq!(dataset.records()[1].profit, 1.0);
    assert_eq!(dataset.records()[1].block_reward, 0.0);
    assert_eq!(dataset.records()[1].timestamp, None);
}

/// Records built in memory take the same path as loaded ones: the Mined
/// origin aligns block 900 with simulated block 1.
#[test]
fn in_memory_sources_align_like_loaded_ones() -> Result<()> {
    let mined = sample_dataset(SourceLabel::Mined, &[("0xa", 900), ("0xb", 900), ("0xc", 901)]);
    let greedy = sample_dataset(SourceLabel::Greedy, &[("0xa", 1), ("0xb", 1), ("0xc", 2)]);
    let fcfs = sample_dataset(SourceLabel::Fcfs, &[("0xa", 1), ("0xc", 1)]);
    assert_eq!(mined.block_origin(), Some(900));

    let sources = SourceSet::new(greedy, fcfs, mined)?;
    let report = analyze(&sources, &test_config())?;
    let full = &report.scenarios[0];

    let greedy = &full.comparisons[0];
    assert_eq!(greedy.coverage, 100.0);
    assert_eq!(greedy.latency.as_ref().map(|l| l.mean), Some(0.0));
    assert_eq!(greedy.similarity.as_ref().map(|s| s.mean_jaccard), Some(1.0));

    let fcfs = &full.comparisons[1];
    assert_eq!((fcfs.matched, fcfs.reference_size), (2, 3));
    assert!((fcfs.coverage - 200.0 / 3.0).abs() < 1e-9);
    let latency = fcfs.latency.as_ref().expect("0xa and 0xc match");
    assert_eq!((latency.min, latency.max, latency.mean), (0, 1, 0.5));
    let similarity = fcfs.similarity.as_ref().expect("block 1 aligns");
    assert_eq!(similarity.aligned_blocks, 1);
    assert!((similarity.mean_jaccard - 1.0 / 3.0).abs() < 1e-12);
    Ok(())
}
