use blockcmp_analysis::aggregate::{DatasetSummary, RewardSeries};
use blockcmp_analysis::compare::ComparisonResult;
use blockcmp_analysis::config::{DEFAULT_CATEGORY, DEFAULT_OUTLIER_QUANTILE, DEFAULT_TOP_N};
use blockcmp_analysis::scenario::{analyze, AnalysisReport, ScenarioReport};
use blockcmp_analysis::{AnalysisConfig, SourceSet};
use blockcmp_data::mined::{
    capture_block_range, collect_range, write_mined_csv, CollectOptions, RetryPolicy,
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS,
};
use blockcmp_data::normalize::{columns, ColumnAliases, DEFAULT_WEI_SCALE};
use blockcmp_data::rpc::RpcBlockSource;
use blockcmp_data::source::{block_range, read_raw_records};
use blockcmp_sim::export::write_blocks_csv;
use blockcmp_sim::mempool::parse_mempool;
use blockcmp_sim::{build_blocks, BuilderParams, OrderingAlgorithm};
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

const WEI_PER_ETH: f64 = 1e18;

#[derive(Parser, Debug)]
#[command(name = "block-compare")]
#[command(about = "Compare Greedy and FCFS simulated blocks against mined blocks")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the three-scenario comparison over Greedy, FCFS and Mined sources.
    Compare(CompareArgs),
    /// Build FCFS and/or Greedy blocks from a mempool capture.
    Simulate(SimulateArgs),
    /// Check that a mempool capture and the mined source span the same blocks.
    VerifyRange(VerifyRangeArgs),
    /// Fetch the blocks a mempool capture spans and write the mined source.
    CollectMined(CollectMinedArgs),
}

/// Knobs shared by every analysis stage.
#[derive(Args, Debug, Clone)]
struct AnalysisArgs {
    /// Quantile above which positive values count as outliers.
    #[arg(long, env = "BLOCKCMP_QUANTILE", default_value_t = DEFAULT_OUTLIER_QUANTILE)]
    quantile: f64,

    /// Transaction type split out by the excluding / only scenarios.
    #[arg(long, env = "BLOCKCMP_CATEGORY", default_value_t = DEFAULT_CATEGORY)]
    category: u8,

    /// Smallest-unit amount per display unit.
    #[arg(long, env = "BLOCKCMP_WEI_SCALE", default_value_t = DEFAULT_WEI_SCALE)]
    wei_scale: f64,

    /// Length of the top transaction and top block rankings.
    #[arg(long, env = "BLOCKCMP_TOP_N", default_value_t = DEFAULT_TOP_N)]
    top_n: usize,

    /// Extra column alias, repeatable.
    #[arg(long = "alias", value_name = "FROM=TO")]
    aliases: Vec<String>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[arg(long)]
    greedy: PathBuf,

    #[arg(long)]
    fcfs: PathBuf,

    #[arg(long)]
    mined: PathBuf,

    /// Output format: table (default) or json.
    #[arg(long, default_value = "table")]
    output: String,

    /// Directory receiving one per-block reward series CSV per scenario.
    #[arg(long)]
    series_dir: Option<PathBuf>,

    #[command(flatten)]
    analysis: AnalysisArgs,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long)]
    mempool: PathBuf,

    /// fcfs, greedy or both.
    #[arg(long, default_value = "both")]
    algorithm: String,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    #[arg(long, default_value_t = 12)]
    block_interval: i64,

    #[arg(long, default_value_t = 30_000_000)]
    gas_target: u128,

    #[arg(long, default_value_t = 60_000_000)]
    gas_hard_cap: u128,

    #[arg(long, default_value_t = 100)]
    max_extra_blocks: usize,
}

#[derive(Args, Debug)]
struct VerifyRangeArgs {
    #[arg(long)]
    mempool: PathBuf,

    #[arg(long)]
    mined: PathBuf,
}

#[derive(Args, Debug)]
struct CollectMinedArgs {
    /// Ethereum JSON-RPC endpoint.
    #[arg(long, env = "BLOCKCMP_RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Capture whose NetworkBlock column gives the block range.
    #[arg(long)]
    mempool: PathBuf,

    #[arg(long, default_value = "mined_transactions_data.csv")]
    out: PathBuf,

    /// Blocks fetched concurrently.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Attempts per block before it is skipped.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Backoff after the first failure; doubles on each retry.
    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Compare(args) => handle_compare(args),
        Commands::Simulate(args) => handle_simulate(args),
        Commands::VerifyRange(args) => handle_verify_range(args),
        Commands::CollectMined(args) => handle_collect_mined(args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .wrap_err("failed to create progress style")?,
    );
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn parse_alias(value: &str) -> Result<(String, String)> {
    let (from, to) = value
        .split_once('=')
        .ok_or_else(|| eyre!("invalid alias '{}'; expected FROM=TO", value))?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        return Err(eyre!("invalid alias '{}'; both sides must be non-empty", value));
    }
    Ok((from.to_string(), to.to_string()))
}

fn build_config(args: &AnalysisArgs) -> Result<AnalysisConfig> {
    let mut column_aliases = ColumnAliases::default();
    for alias in &args.aliases {
        let (from, to) = parse_alias(alias)?;
        column_aliases = column_aliases.with(from, to);
    }

    let config = AnalysisConfig {
        outlier_quantile: args.quantile,
        category: args.category,
        wei_scale: args.wei_scale,
        top_n: args.top_n,
        column_aliases,
    };
    config.validate().wrap_err("invalid analysis configuration")?;
    Ok(config)
}

fn handle_compare(args: CompareArgs) -> Result<()> {
    let config = build_config(&args.analysis)?;

    let pb = spinner("loading sources")?;
    let sources = SourceSet::load(&args.greedy, &args.fcfs, &args.mined, &config)
        .wrap_err("a required source failed to load; no scenario was run")?;

    pb.set_message("evaluating scenarios");
    let report = analyze(&sources, &config)?;
    pb.finish_and_clear();

    match args.output.to_lowercase().as_str() {
        "table" => print_report_table(&report),
        "json" => print_report_json(&report, &config)?,
        _ => {
            return Err(eyre!(
                "unknown output format '{}'; use 'table' or 'json'",
                args.output
            ))
        }
    }

    if let Some(dir) = &args.series_dir {
        ensure_dir(dir)?;
        for scenario in &report.scenarios {
            let path = dir.join(format!("{}_series.csv", scenario.scenario.slug()));
            let points = write_series_csv(&path, scenario)?;
            info!(path = %path.display(), points, "series written");
        }
    }

    info!(
        scenarios = report.scenarios.len(),
        output = %args.output,
        "compare command completed"
    );

    Ok(())
}

fn print_report_table(report: &AnalysisReport) {
    let mut outliers = Table::new();
    outliers.load_preset(UTF8_BORDERS_ONLY);
    outliers.set_header(vec!["Source", "Tx Outliers Removed", "Profit Threshold (ETH)"]);
    for entry in &report.transaction_outliers {
        outliers.add_row(vec![
            entry.label.to_string(),
            entry.report.removed.to_string(),
            fmt_opt(entry.report.threshold, 6),
        ]);
    }
    println!("{}\n", outliers);

    for scenario in &report.scenarios {
        println!("Scenario: {}", scenario.title);
        print_summary_table(&scenario.summaries);
        print_comparison_table(&scenario.comparisons);
        print_top_tables(&scenario.summaries);
        print_series_outlier_table(&scenario.series);
    }
}

fn print_summary_table(summaries: &[DatasetSummary]) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);

    let mut header = vec!["Metric".to_string()];
    header.extend(summaries.iter().map(|s| s.label.to_string()));
    table.set_header(header);

    let rows: [(&str, fn(&DatasetSummary) -> String); 10] = [
        ("Transactions", |s| s.tx_count.to_string()),
        ("Blocks", |s| s.block_count.to_string()),
        ("Total Reward (ETH)", |s| format!("{:.6}", s.total_reward)),
        ("Avg Reward / Block (ETH)", |s| format!("{:.6}", s.avg_reward_per_block)),
        ("Blocks / Second", |s| format!("{:.4}", s.block_frequency)),
        ("Seconds / Block", |s| fmt_opt(s.seconds_per_block, 2)),
        ("Avg Gas / Block", |s| format!("{:.0}", s.avg_gas_occupancy)),
        ("Gain (gwei / gas)", |s| fmt_opt(s.gain_efficiency, 4)),
        ("Burned Fee (ETH)", |s| fmt_opt(s.total_burned_fee, 6)),
        ("Type Shares", |s| {
            s.categories
                .iter()
                .map(|c| format!("{}: {:.1}%", c.tx_type, c.share * 100.0))
                .collect::<Vec<_>>()
                .join(", ")
        }),
    ];

    for (name, cell) in rows {
        let mut row = vec![name.to_string()];
        row.extend(summaries.iter().map(cell));
        table.add_row(row);
    }

    println!("{}", table);
}

fn print_comparison_table(comparisons: &[ComparisonResult]) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Candidate",
        "Matched",
        "Coverage",
        "Mean Latency",
        "Min / Max",
        "Aligned Blocks",
        "Mean Jaccard",
    ]);

    for comparison in comparisons {
        let (mean_latency, range) = match &comparison.latency {
            Some(latency) => (
                format!("{:.2}", latency.mean),
                format!("{} / {}", latency.min, latency.max),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        let (aligned, jaccard) = match &comparison.similarity {
            Some(similarity) => (
                similarity.aligned_blocks.to_string(),
                format!("{:.4}", similarity.mean_jaccard),
            ),
            None => ("-".to_string(), "-".to_string()),
        };

        table.add_row(vec![
            format!("{} vs {}", comparison.candidate, comparison.reference),
            format!("{} / {}", comparison.matched, comparison.reference_size),
            format!("{:.2}%", comparison.coverage),
            mean_latency,
            range,
            aligned,
            jaccard,
        ]);
    }

    println!("{}", table);
}

fn print_top_tables(summaries: &[DatasetSummary]) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Source", "Rank", "Transaction", "Profit (ETH)"]);

    for summary in summaries {
        for (rank, tx) in summary.top_transactions.iter().enumerate() {
            table.add_row(vec![
                summary.label.to_string(),
                (rank + 1).to_string(),
                truncate_hash(&tx.hash),
                format!("{:.6}", tx.profit),
            ]);
        }
    }

    println!("{}", table);

    let mut blocks = Table::new();
    blocks.load_preset(UTF8_BORDERS_ONLY);
    blocks.set_header(vec!["Source", "Rank", "Block", "Reward (ETH)", "Gas", "Transactions"]);
    for row in top_block_rows(summaries) {
        blocks.add_row(row);
    }
    println!("{}", blocks);
}

fn top_block_rows(summaries: &[DatasetSummary]) -> Vec<Vec<String>> {
    summaries
        .iter()
        .flat_map(|summary| {
            summary.top_blocks.iter().enumerate().map(move |(rank, block)| {
                vec![
                    summary.label.to_string(),
                    (rank + 1).to_string(),
                    block.block_number.to_string(),
                    format!("{:.6}", block.total_reward),
                    block.block_gas.to_string(),
                    block.tx_count.to_string(),
                ]
            })
        })
        .collect()
}

fn print_series_outlier_table(series: &[RewardSeries]) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Source",
        "Block Outliers Removed",
        "Reward Threshold (ETH)",
        "Blocks Charted",
    ]);
    for row in series_outlier_rows(series) {
        table.add_row(row);
    }
    println!("{}\n", table);
}

fn series_outlier_rows(series: &[RewardSeries]) -> Vec<Vec<String>> {
    series
        .iter()
        .map(|s| {
            vec![
                s.label.to_string(),
                s.outliers.removed.to_string(),
                fmt_opt(s.outliers.threshold, 6),
                s.points.len().to_string(),
            ]
        })
        .collect()
}

fn print_report_json(report: &AnalysisReport, config: &AnalysisConfig) -> Result<()> {
    use serde::Serialize;

    #[derive(Serialize)]
    struct JsonOutput<'a> {
        config: JsonConfig,
        #[serde(flatten)]
        report: &'a AnalysisReport,
    }

    #[derive(Serialize)]
    struct JsonConfig {
        outlier_quantile: f64,
        category: u8,
        wei_scale: f64,
        top_n: usize,
    }

    let output = JsonOutput {
        config: JsonConfig {
            outlier_quantile: config.outlier_quantile,
            category: config.category,
            wei_scale: config.wei_scale,
            top_n: config.top_n,
        },
        report,
    };
    let json_str = serde_json::to_string_pretty(&output).wrap_err("failed to serialize JSON")?;
    println!("{}", json_str);

    Ok(())
}

/// Writes every series of `scenario` to one CSV. Returns the point count.
fn write_series_csv(path: &Path, scenario: &ScenarioReport) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .wrap_err_with(|| format!("failed to create {}", path.display()))?;
    writer
        .write_record(["source", "block", "reward_eth"])
        .wrap_err("failed to write series header")?;

    let mut points = 0usize;
    for series in &scenario.series {
        for point in &series.points {
            writer
                .write_record([
                    series.label.to_string(),
                    point.block.to_string(),
                    point.reward.to_string(),
                ])
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            points += 1;
        }
    }

    writer.flush().wrap_err("failed to flush series writer")?;
    Ok(points)
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let algorithms = match args.algorithm.to_lowercase().as_str() {
        "both" => vec![OrderingAlgorithm::Fcfs, OrderingAlgorithm::Greedy],
        other => vec![other.parse::<OrderingAlgorithm>()?],
    };

    let params = BuilderParams {
        block_interval_secs: args.block_interval,
        gas_target: args.gas_target,
        gas_hard_cap: args.gas_hard_cap,
        max_extra_blocks: args.max_extra_blocks,
    };
    params.validate().wrap_err("invalid builder parameters")?;

    let raw = read_raw_records(&args.mempool).wrap_err("failed to read mempool capture")?;
    let parsed = parse_mempool(&raw, params.gas_hard_cap);
    if parsed.entries.is_empty() {
        return Err(eyre!("no usable transactions in {}", args.mempool.display()));
    }
    ensure_dir(&args.out_dir)?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Algorithm",
        "Blocks",
        "Extra Blocks",
        "Transactions",
        "Leftover",
        "Reward (ETH)",
        "Output",
    ]);

    let pb = spinner("building blocks")?;
    for algorithm in algorithms {
        let outcome = build_blocks(parsed.entries.clone(), algorithm, &params)?;
        let path = args.out_dir.join(format!("{}_results.csv", algorithm));
        write_blocks_csv(&path, &outcome.blocks)?;

        let reward: u128 = outcome.blocks.iter().map(|b| b.reward_wei).sum();
        table.add_row(vec![
            algorithm.to_string(),
            outcome.blocks.len().to_string(),
            outcome.blocks.iter().filter(|b| b.extra).count().to_string(),
            outcome.tx_count().to_string(),
            outcome.leftover.to_string(),
            format_eth(reward),
            path.display().to_string(),
        ]);
    }
    pb.finish_and_clear();

    println!("{}", table);
    info!(
        admitted = parsed.entries.len(),
        rejected = parsed.rejected,
        "simulate command completed"
    );
    Ok(())
}

fn handle_verify_range(args: VerifyRangeArgs) -> Result<()> {
    let mempool = read_raw_records(&args.mempool).wrap_err("failed to read mempool capture")?;
    let mined = read_raw_records(&args.mined).wrap_err("failed to read mined source")?;

    let (mempool_first, mempool_last) = capture_block_range(&mempool)
        .ok_or_else(|| eyre!("no NetworkBlock values in {}", args.mempool.display()))?;
    let (mined_first, mined_last) = block_range(&mined, columns::BLOCK_NUMBER)
        .ok_or_else(|| eyre!("no BlockNumber values in {}", args.mined.display()))?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Source", "First Block", "Last Block", "Span"]);
    table.add_row(vec![
        "Mempool".to_string(),
        mempool_first.to_string(),
        mempool_last.to_string(),
        (mempool_last - mempool_first + 1).to_string(),
    ]);
    table.add_row(vec![
        "Mined".to_string(),
        mined_first.to_string(),
        mined_last.to_string(),
        (mined_last - mined_first + 1).to_string(),
    ]);
    println!("{}", table);

    let first_ok = mempool_first == mined_first;
    let last_ok = mempool_last == mined_last;
    println!("First block matches: {}", if first_ok { "yes" } else { "no" });
    println!("Last block matches:  {}", if last_ok { "yes" } else { "no" });

    info!(first_ok, last_ok, "verify-range command completed");
    Ok(())
}

fn collect_options(args: &CollectMinedArgs) -> Result<CollectOptions> {
    if args.batch_size == 0 {
        return Err(eyre!("batch size must be at least 1"));
    }
    if args.max_attempts == 0 {
        return Err(eyre!("max attempts must be at least 1"));
    }
    Ok(CollectOptions {
        batch_size: args.batch_size,
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            base_delay: Duration::from_millis(args.retry_delay_ms),
        },
    })
}

fn handle_collect_mined(args: CollectMinedArgs) -> Result<()> {
    let options = collect_options(&args)?;
    let capture = read_raw_records(&args.mempool).wrap_err("failed to read mempool capture")?;
    let (start, end) = capture_block_range(&capture)
        .ok_or_else(|| eyre!("no NetworkBlock values in {}", args.mempool.display()))?;

    let source = RpcBlockSource::connect(&args.rpc_url)?;
    info!(start, end, rpc_url = %args.rpc_url, "collecting mined blocks");

    let pb = ProgressBar::new(end - start + 1);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} blocks")
            .wrap_err("failed to create progress style")?,
    );
    let collected = collect_range(&source, start, end, &options, |done| pb.inc(done as u64));
    pb.finish_and_clear();

    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let rows = write_mined_csv(&args.out, &collected.blocks)?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "First Block",
        "Last Block",
        "Collected",
        "Missing",
        "Failed",
        "Rows",
        "Output",
    ]);
    table.add_row(vec![
        start.to_string(),
        end.to_string(),
        collected.blocks.len().to_string(),
        collected.missing.len().to_string(),
        collected.failed.len().to_string(),
        rows.to_string(),
        args.out.display().to_string(),
    ]);
    println!("{}", table);

    if !collected.failed.is_empty() {
        warn!(failed = ?collected.failed, "some blocks could not be fetched");
    }
    info!(rows, "collect-mined command completed");
    Ok(())
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_else(|| "-".to_string())
}

fn format_eth(wei: u128) -> String {
    format!("{:.6} ETH", wei as f64 / WEI_PER_ETH)
}

fn truncate_hash(hash: &str) -> String {
    if hash.len() > 14 && hash.is_ascii() {
        format!("{}…{}", &hash[..8], &hash[hash.len() - 4..])
    } else {
        hash.to_string()
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .wrap_err_with(|| format!("failed to create directory {}", path.display()))?;
    Ok(())
}
