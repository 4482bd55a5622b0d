// float_cmp: only in tests where assert_eq! on f64 is intentional.
#![cfg_attr(test, allow(clippy::float_cmp))]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cryptolab::config::EngineConfig;
use cryptolab::data::binance::BinanceClient;
use cryptolab::data::store::CandleStore;
use cryptolab::data::FetchOptions;
use cryptolab::optimizer::{OptimizationRequest, Optimizer};

#[derive(Parser)]
#[command(name = "cryptolab", about = "Strategy backtesting and parameter optimization")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an optimization from a JSON request file.
    Optimize {
        /// Path to an OptimizationRequest JSON document.
        request: PathBuf,
        /// Write the full response JSON here (stdout shows a summary).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Backfill / refresh the candle cache for one symbol.
    Fetch {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1d")]
        timeframe: String,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        /// Backfill from inception when the cache is empty.
        #[arg(long)]
        full_history: bool,
    },
    /// List jobs that can be resumed.
    Jobs,
    /// Resume a paused or crashed job from its checkpoint.
    Resume {
        job_id: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Page through stored results for a job.
    Results {
        job_id: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load()?;
    let fetcher = Arc::new(BinanceClient::new()?);
    let store = Arc::new(CandleStore::new(
        config.data_root.clone(),
        &config.exchange_id,
        &config.inception,
        fetcher,
    )?);

    match cli.command {
        Command::Optimize { request, output } => {
            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("Failed to read request file: {}", request.display()))?;
            let request: OptimizationRequest =
                serde_json::from_str(&raw).context("Failed to parse optimization request")?;

            let optimizer = Optimizer::new(config, store)?;
            let response = optimizer.run_optimization(request)?;

            println!(
                "job {} [{:?}]: {} over {} {} — best {:?}",
                response.job_id,
                response.status,
                response.template_name,
                response.symbol,
                response.timeframe,
                response.best_parameters,
            );
            if let Some(metrics) = &response.best_metrics {
                println!(
                    "  trades: {}  win rate: {:.1}%  return: {:.2}  sharpe: {:.3}",
                    metrics.total_trades,
                    metrics.win_rate * 100.0,
                    metrics.total_return,
                    metrics.sharpe_ratio,
                );
            }
            for ranked in &response.top_results {
                let verdict = ranked
                    .heavy
                    .as_ref()
                    .map_or(String::new(), |h| format!(" [{:?}]", h.criteria.status));
                println!(
                    "  #{} score {:.3} params {:?}{verdict}",
                    ranked.rank, ranked.score, ranked.params
                );
            }
            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_vec_pretty(&response)?)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("full response written to {}", path.display());
            }
        }
        Command::Fetch {
            symbol,
            timeframe,
            since,
            until,
            full_history,
        } => {
            let since_ms = since.as_deref().map(parse_date).transpose()?;
            let until_ms = until.as_deref().map(parse_date).transpose()?;
            let options = FetchOptions {
                full_history_if_empty: full_history,
                ..FetchOptions::default()
            };
            let df = store.fetch(&symbol, &timeframe, since_ms, until_ms, options)?;
            println!("{} {}: {} candles cached", symbol, timeframe, df.height());
        }
        Command::Jobs => {
            let optimizer = Optimizer::new(config, store)?;
            let incomplete = optimizer.list_incomplete();
            if incomplete.is_empty() {
                println!("no incomplete jobs");
            }
            for cp in incomplete {
                println!(
                    "{} [{:?}] {} {} — round {}, stage {}, {}/{} tests",
                    cp.job_id,
                    cp.status,
                    cp.strategy,
                    cp.symbol,
                    cp.round,
                    cp.stage_index + 1,
                    cp.tests_completed_in_stage,
                    cp.total_tests_in_stage,
                );
            }
        }
        Command::Resume { job_id, output } => {
            let optimizer = Optimizer::new(config, store)?;
            let response = optimizer.resume(&job_id)?;
            println!(
                "job {} [{:?}] — best {:?}",
                response.job_id, response.status, response.best_parameters
            );
            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_vec_pretty(&response)?)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
        Command::Results {
            job_id,
            page,
            limit,
        } => {
            let optimizer = Optimizer::new(config, store)?;
            let results = optimizer.results_store().results(&job_id, page, limit)?;
            println!(
                "page {}/{} ({} results total)",
                results.page,
                results.total.div_ceil(limit.max(1)).max(1),
                results.total,
            );
            for r in results.results {
                match (&r.metrics, &r.error) {
                    (Some(m), _) => println!(
                        "  #{} {:?} -> sharpe {:.3}, return {:.3}, trades {}",
                        r.result_index, r.params, m.sharpe_ratio, m.total_return, m.total_trades
                    ),
                    (None, Some(e)) => println!("  #{} {:?} -> {e}", r.result_index, r.params),
                    (None, None) => println!("  #{} {:?}", r.result_index, r.params),
                }
            }
        }
    }

    Ok(())
}

fn parse_date(date: &str) -> Result<i64> {
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date (expected YYYY-MM-DD): {date}"))?;
    Ok(parsed
        .and_hms_opt(0, 0, 0)
        .expect("midnight is valid")
        .and_utc()
        .timestamp_millis())
}
