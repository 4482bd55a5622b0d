//! Hybrid optimizer: correlated-group joint grids plus singleton sweeps,
//! coarse-to-fine adaptive rounds, batched parallel execution with
//! pause/resume checkpoints and a durable results store.

pub mod checkpoint;
pub mod jobs;
pub mod results;
pub mod stages;
pub mod worker;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use garde::Validate;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::data::store::CandleStore;
use crate::data::FetchOptions;
use crate::engine::criteria::{evaluate_go_nogo, CriteriaConfig, CriteriaResult};
use crate::engine::metrics::{alpha, buy_and_hold, calculate_metrics, BenchmarkMetrics, PerformanceMetrics};
use crate::engine::regime::{breakdown, Regime, RegimeStats};
use crate::engine::strategy::{Strategy, StrategyTemplate};
use crate::engine::types::{Candle, CandleSeries, EquityPoint, ExecutionParams, Trade};
use crate::engine::{backtester, volatility_context};
use crate::error::EngineError;

use checkpoint::{BestSoFar, Checkpoint, JobStatus};
use jobs::JobRegistry;
use results::ResultsStore;
use stages::{plan_stages, refine_stage, OptimizationSchema, RangeOverride, Stage};
use worker::{ResultMetrics, StageResult, WorkerContext};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OptimizationRequest {
    #[garde(dive)]
    pub template: StrategyTemplate,
    #[garde(dive)]
    pub schema: OptimizationSchema,
    #[garde(length(min = 1))]
    pub symbol: String,
    #[garde(length(min = 1))]
    pub timeframe: String,
    #[serde(default)]
    #[garde(skip)]
    pub start_date: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub end_date: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub custom_ranges: Option<BTreeMap<String, RangeOverride>>,
    #[serde(default)]
    #[garde(skip)]
    pub deep_backtest: bool,
    #[serde(default)]
    #[garde(skip)]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_num: usize,
    pub name: String,
    pub parameters: Vec<String>,
    pub grid_mode: bool,
    pub grid_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeavyMetrics {
    pub performance: PerformanceMetrics,
    pub benchmark: BenchmarkMetrics,
    pub alpha: f64,
    pub avg_atr: f64,
    pub avg_adx: f64,
    pub regime_performance: BTreeMap<Regime, RegimeStats>,
    pub criteria: CriteriaResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub rank: usize,
    pub params: BTreeMap<String, f64>,
    pub metrics: ResultMetrics,
    pub score: f64,
    pub heavy: Option<HeavyMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResponse {
    pub job_id: String,
    pub template_name: String,
    pub symbol: String,
    pub timeframe: String,
    pub stages: Vec<StageSummary>,
    pub total_stages: usize,
    pub status: JobStatus,
    pub best_parameters: BTreeMap<String, f64>,
    pub best_metrics: Option<ResultMetrics>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub candles: Vec<Candle>,
    pub indicator_data: BTreeMap<String, Vec<f64>>,
    pub top_results: Vec<RankedResult>,
}

pub struct Optimizer {
    config: EngineConfig,
    store: Arc<CandleStore>,
    results: ResultsStore,
    jobs: JobRegistry,
    pool: rayon::ThreadPool,
}

impl Optimizer {
    pub fn new(config: EngineConfig, store: Arc<CandleStore>) -> Result<Self> {
        let results = ResultsStore::open(&config.results_db_path())?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count())
            .build()
            .context("Failed to build worker pool")?;
        Ok(Self {
            config,
            store,
            results,
            jobs: JobRegistry::new(),
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn results_store(&self) -> &ResultsStore {
        &self.results
    }

    pub fn run_optimization(&self, request: OptimizationRequest) -> Result<OptimizationResponse> {
        request
            .validate()
            .map_err(|e| EngineError::ParameterInvalid(e.to_string()))?;
        self.execute(request, None)
    }

    /// Signal a running job to pause between batches.
    pub fn pause(&self, job_id: &str) -> bool {
        self.jobs.pause(job_id)
    }

    /// Abort remaining batches; in-flight work finishes.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.jobs.cancel(job_id)
    }

    /// Resume a paused (or crashed in-progress) job from its checkpoint.
    pub fn resume(&self, job_id: &str) -> Result<OptimizationResponse> {
        let cp = Checkpoint::load(&self.config.checkpoint_dir, job_id)?;
        if !matches!(cp.status, JobStatus::Paused | JobStatus::InProgress) {
            anyhow::bail!("job {job_id} is {:?}, nothing to resume", cp.status);
        }
        self.jobs.handle(job_id).clear_pause();
        let request = cp.request.clone();
        self.execute(request, Some(cp))
    }

    pub fn list_incomplete(&self) -> Vec<Checkpoint> {
        Checkpoint::list_incomplete(&self.config.checkpoint_dir)
    }

    #[allow(clippy::too_many_lines)]
    fn execute(
        &self,
        request: OptimizationRequest,
        resume_from: Option<Checkpoint>,
    ) -> Result<OptimizationResponse> {
        let job_id = resume_from
            .as_ref()
            .map(|cp| cp.job_id.clone())
            .or_else(|| request.job_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let control = self.jobs.handle(&job_id);

        let since = parse_date_ms(request.start_date.as_deref())?;
        let until = parse_date_ms(request.end_date.as_deref())?;

        let daily = self.store.fetch_series(
            &request.symbol,
            &request.timeframe,
            since,
            until,
            FetchOptions::full_history(),
        )?;
        if daily.is_empty() {
            return Err(EngineError::DataUnavailable(format!(
                "no candles for {} {}",
                request.symbol, request.timeframe
            ))
            .into());
        }
        daily.validate_monotonic()?;
        let daily = Arc::new(daily);

        // Preflight: expression-bind and indicator errors surface on the
        // request, before any batch is scheduled.
        let preflight = Strategy::compile(request.template.clone())?;
        preflight.evaluate(&daily)?;

        let intraday = if request.deep_backtest {
            match self.store.fetch_intraday(
                &request.symbol,
                &self.config.deep_timeframe,
                since,
                until,
                FetchOptions::default(),
            ) {
                Ok(s) if !s.is_empty() => Some(Arc::new(s)),
                Ok(_) => {
                    tracing::warn!(
                        symbol = request.symbol,
                        "no intraday data; deep backtest degrades to daily resolution"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        symbol = request.symbol,
                        "intraday fetch failed ({e}); deep backtest degrades to daily resolution"
                    );
                    None
                }
            }
        } else {
            None
        };

        let mut stages = plan_stages(
            &request.schema,
            request.custom_ranges.as_ref(),
            self.config.max_grid_size,
        )?;
        let total_stages = stages.len();

        let has_grid = stages.iter().any(|s| s.grid_mode);
        let has_adaptive = stages.iter().any(|s| !s.adaptive.is_empty());
        let max_rounds = if has_grid {
            if has_adaptive {
                4
            } else {
                1
            }
        } else {
            5
        };
        tracing::info!(
            job_id,
            stages = total_stages,
            max_rounds,
            deep = request.deep_backtest,
            "optimization plan ready"
        );

        let ctx = WorkerContext {
            template: request.template.clone(),
            daily: Arc::clone(&daily),
            intraday,
            exec: ExecutionParams {
                initial_capital: self.config.initial_capital,
                fee: self.config.fee,
                slippage: self.config.slippage,
                position_size: 1.0,
                stop_loss: request.template.stop_loss,
                stop_gain: request.template.stop_gain,
                record_force_close: false,
            },
            deep: request.deep_backtest,
        };

        let mut best_params: BTreeMap<String, f64> = BTreeMap::new();
        let mut best_metrics: Option<ResultMetrics> = None;
        let mut result_index = 0usize;
        let mut start_round = 1usize;
        let mut resume_stage = 0usize;
        let mut resume_skip = 0usize;
        let mut resume_active = false;

        if let Some(cp) = &resume_from {
            best_params = cp.locked_params.clone();
            best_metrics = cp.best_so_far.as_ref().map(|b| b.metrics.clone());
            start_round = cp.round.max(1);
            resume_stage = cp.stage_index;
            resume_skip = cp.tests_completed_in_stage;
            resume_active = true;
            result_index = self.results.count(&job_id)?;
            // Rebuild refined grids for the rounds already behind us.
            for _ in 1..start_round {
                for stage in &mut stages {
                    refine_stage(stage, &best_params);
                }
            }
            tracing::info!(
                job_id,
                round = start_round,
                stage = resume_stage,
                completed = resume_skip,
                "resuming from checkpoint"
            );
        }

        let mut status = JobStatus::InProgress;
        let mut round = start_round;
        let mut converged = false;

        'rounds: while round <= max_rounds {
            let params_at_start = best_params.clone();

            for si in 0..stages.len() {
                if resume_active && si < resume_stage {
                    continue; // winners already inside locked_params
                }
                let combos = stages[si].combos(&best_params);
                let total = combos.len();
                if total == 0 {
                    continue;
                }
                let skip = if resume_active && si == resume_stage {
                    resume_skip.min(total)
                } else {
                    0
                };

                // Rebuild scoring state for combos already in the store.
                let mut stage_results: Vec<StageResult> = Vec::with_capacity(total);
                if skip > 0 {
                    let stage_start = result_index.saturating_sub(skip);
                    for stored in self.results.results_from(&job_id, stage_start)? {
                        stage_results.push(StageResult {
                            params: stored.params.clone(),
                            full_params: stored.params,
                            metrics: stored.metrics,
                            error: stored.error,
                        });
                    }
                }

                tracing::info!(
                    job_id,
                    round,
                    stage = stages[si].name,
                    combinations = total,
                    workers = self.config.worker_count(),
                    "stage started"
                );
                let pb = stage_progress_bar(&stages[si].name, total, skip);

                let mut completed = skip;
                let mut batches_done = 0usize;
                for batch in combos[skip..].chunks(self.config.batch_size.max(1)) {
                    if control.is_cancelled() {
                        tracing::warn!(job_id, "cancelled; aborting remaining batches");
                        status = JobStatus::Failed;
                        self.write_checkpoint(
                            &job_id, &request, round, si, completed, total, &best_params,
                            &best_metrics, status,
                        );
                        pb.abandon();
                        break 'rounds;
                    }
                    if control.is_paused() {
                        tracing::info!(job_id, completed, total, "paused between batches");
                        status = JobStatus::Paused;
                        self.write_checkpoint(
                            &job_id, &request, round, si, completed, total, &best_params,
                            &best_metrics, status,
                        );
                        pb.abandon();
                        break 'rounds;
                    }

                    let batch_results = self.pool.install(|| worker::run_batch(&ctx, batch));
                    self.results
                        .save_batch(&job_id, result_index, &batch_results)?;
                    result_index += batch_results.len();
                    completed += batch_results.len();
                    pb.inc(batch_results.len() as u64);
                    stage_results.extend(batch_results);

                    batches_done += 1;
                    if batches_done % self.config.checkpoint_every_batches.max(1) == 0 {
                        self.write_checkpoint(
                            &job_id,
                            &request,
                            round,
                            si,
                            completed,
                            total,
                            &best_params,
                            &best_metrics,
                            JobStatus::InProgress,
                        );
                    }
                }
                pb.finish();

                match self.score_stage(&stage_results, &stages[si]) {
                    Some((winner, metrics, score)) => {
                        tracing::info!(
                            job_id,
                            stage = stages[si].name,
                            ?winner,
                            score,
                            sharpe = metrics.sharpe_ratio,
                            "stage winner locked"
                        );
                        best_params.extend(winner);
                        best_metrics = Some(metrics);
                    }
                    None => {
                        tracing::warn!(
                            job_id,
                            stage = stages[si].name,
                            "stage produced no scorable results"
                        );
                        // Keep later stages runnable by locking the first
                        // value of each parameter.
                        for (p, vals) in stages[si].parameters.iter().zip(stages[si].values.iter())
                        {
                            if let Some(v) = vals.first() {
                                best_params.entry(p.clone()).or_insert(*v);
                            }
                        }
                    }
                }
            }

            resume_active = false;

            if best_params == params_at_start {
                converged = true;
                tracing::info!(job_id, round, "converged; parameters stable");
                break;
            }
            round += 1;
            if round > max_rounds {
                tracing::warn!(
                    job_id,
                    max_rounds,
                    "stopping without full convergence; returning best seen"
                );
                break;
            }
            tracing::info!(job_id, round, "refining grids around {best_params:?}");
            for stage in &mut stages {
                refine_stage(stage, &best_params);
            }
        }

        let stage_summaries: Vec<StageSummary> = stages
            .iter()
            .map(|s| StageSummary {
                stage_num: s.stage_num,
                name: s.name.clone(),
                parameters: s.parameters.clone(),
                grid_mode: s.grid_mode,
                grid_size: s.grid_size(),
            })
            .collect();

        if status != JobStatus::InProgress {
            // Paused or cancelled: partial response, no materialization.
            return Ok(OptimizationResponse {
                job_id,
                template_name: request.template.name.clone(),
                symbol: request.symbol.clone(),
                timeframe: request.timeframe.clone(),
                stages: stage_summaries,
                total_stages,
                status,
                best_parameters: best_params,
                best_metrics,
                trades: Vec::new(),
                equity_curve: Vec::new(),
                candles: Vec::new(),
                indicator_data: BTreeMap::new(),
                top_results: Vec::new(),
            });
        }

        status = JobStatus::Completed;
        self.write_checkpoint(
            &job_id,
            &request,
            round.min(max_rounds),
            total_stages.saturating_sub(1),
            0,
            0,
            &best_params,
            &best_metrics,
            status,
        );
        tracing::info!(job_id, converged, "optimization complete");

        // Final materialization: rich payload from a non-deep run with the
        // winning parameters over the full range.
        let (trades, equity_curve, indicator_data) =
            self.materialize(&request.template, &best_params, &daily)?;
        let candles: Vec<Candle> = (0..daily.len()).map(|i| daily.candle(i)).collect();
        let top_results = self.rank_top_results(&job_id, &request.template, &daily);

        Ok(OptimizationResponse {
            job_id,
            template_name: request.template.name.clone(),
            symbol: request.symbol.clone(),
            timeframe: request.timeframe.clone(),
            stages: stage_summaries,
            total_stages,
            status,
            best_parameters: best_params,
            best_metrics,
            trades,
            equity_curve,
            candles,
            indicator_data,
            top_results,
        })
    }

    /// Weighted composite scoring over a stage's successful results:
    /// min-max normalized Sharpe and total return, ties broken by raw
    /// Sharpe. Failed results never win.
    fn score_stage(
        &self,
        results: &[StageResult],
        stage: &Stage,
    ) -> Option<(BTreeMap<String, f64>, ResultMetrics, f64)> {
        let valid: Vec<&StageResult> = results
            .iter()
            .filter(|r| r.error.is_none() && r.metrics.is_some())
            .collect();
        if valid.is_empty() {
            return None;
        }

        let sharpes: Vec<f64> = valid
            .iter()
            .map(|r| r.metrics.as_ref().expect("filtered").sharpe_ratio)
            .collect();
        let returns: Vec<f64> = valid
            .iter()
            .map(|r| r.metrics.as_ref().expect("filtered").total_return)
            .collect();
        let (min_s, max_s) = min_max(&sharpes);
        let (min_r, max_r) = min_max(&returns);
        let range_s = max_s - min_s;
        let range_r = max_r - min_r;

        let mut best: Option<(usize, f64, f64)> = None; // (idx, score, sharpe)
        for (i, r) in valid.iter().enumerate() {
            let m = r.metrics.as_ref().expect("filtered");
            let norm_s = if range_s > 0.0 {
                (m.sharpe_ratio - min_s) / range_s
            } else {
                0.0
            };
            let norm_r = if range_r > 0.0 {
                (m.total_return - min_r) / range_r
            } else {
                0.0
            };
            let score = self.config.score_sharpe_weight * norm_s
                + self.config.score_return_weight * norm_r;
            let better = match best {
                None => true,
                Some((_, bs, bsh)) => {
                    score > bs || (score == bs && m.sharpe_ratio > bsh)
                }
            };
            if better {
                best = Some((i, score, m.sharpe_ratio));
            }
        }

        let (idx, score, _) = best?;
        let winner = valid[idx];
        Some((
            stage.stage_params(&winner.params),
            winner.metrics.clone().expect("filtered"),
            score,
        ))
    }

    fn materialize(
        &self,
        template: &StrategyTemplate,
        best_params: &BTreeMap<String, f64>,
        daily: &Arc<CandleSeries>,
    ) -> Result<(Vec<Trade>, Vec<EquityPoint>, BTreeMap<String, Vec<f64>>)> {
        let concrete = template.with_params(best_params)?;
        let mut exec = ExecutionParams {
            initial_capital: self.config.initial_capital,
            fee: self.config.fee,
            slippage: self.config.slippage,
            ..ExecutionParams::default()
        };
        exec.stop_loss = concrete.stop_loss;
        exec.stop_gain = concrete.stop_gain;

        let strategy = Strategy::compile(concrete)?;
        let frame = strategy.evaluate(daily)?;
        let bt = backtester::run(daily, &frame.entry, &frame.exit, &exec)?;

        let indicator_data: BTreeMap<String, Vec<f64>> = frame
            .columns
            .indicator_columns()
            .into_iter()
            .map(|(name, values)| {
                // NaN warm-up values flatten to zero so the payload stays
                // valid JSON (plot layers skip the zeros).
                let cleaned: Vec<f64> = values
                    .iter()
                    .map(|v| if v.is_finite() { *v } else { 0.0 })
                    .collect();
                (name.to_string(), cleaned)
            })
            .collect();

        Ok((bt.trades, bt.equity_curve, indicator_data))
    }

    /// Globally rank stored results and attach heavy metrics to the top K.
    fn rank_top_results(
        &self,
        job_id: &str,
        template: &StrategyTemplate,
        daily: &Arc<CandleSeries>,
    ) -> Vec<RankedResult> {
        let Ok(all) = self.results.all_results(job_id) else {
            return Vec::new();
        };
        let valid: Vec<_> = all
            .into_iter()
            .filter(|r| r.error.is_none() && r.metrics.is_some())
            .collect();
        if valid.is_empty() {
            return Vec::new();
        }

        let sharpes: Vec<f64> = valid
            .iter()
            .map(|r| r.metrics.as_ref().expect("filtered").sharpe_ratio)
            .collect();
        let returns: Vec<f64> = valid
            .iter()
            .map(|r| r.metrics.as_ref().expect("filtered").total_return)
            .collect();
        let (min_s, max_s) = min_max(&sharpes);
        let (min_r, max_r) = min_max(&returns);
        let range_s = max_s - min_s;
        let range_r = max_r - min_r;

        let mut scored: Vec<(f64, f64, results::StoredResult)> = valid
            .into_iter()
            .map(|r| {
                let m = r.metrics.as_ref().expect("filtered");
                let norm_s = if range_s > 0.0 {
                    (m.sharpe_ratio - min_s) / range_s
                } else {
                    0.0
                };
                let norm_r = if range_r > 0.0 {
                    (m.total_return - min_r) / range_r
                } else {
                    0.0
                };
                let score = self.config.score_sharpe_weight * norm_s
                    + self.config.score_return_weight * norm_r;
                (score, m.sharpe_ratio, r)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.2.result_index.cmp(&b.2.result_index))
        });

        scored
            .into_iter()
            .take(self.config.top_k)
            .enumerate()
            .map(|(i, (score, _, r))| {
                let heavy = self
                    .heavy_metrics(template, &r.params, daily)
                    .map_err(|e| {
                        tracing::warn!(job_id, "heavy metrics failed for rank {}: {e}", i + 1);
                    })
                    .ok();
                RankedResult {
                    rank: i + 1,
                    params: r.params,
                    metrics: r.metrics.expect("filtered"),
                    score,
                    heavy,
                }
            })
            .collect()
    }

    /// Heavier analysis for one parameter set: full performance metrics,
    /// benchmark and alpha, volatility/trend context, regime breakdown,
    /// and the go/no-go verdict.
    fn heavy_metrics(
        &self,
        template: &StrategyTemplate,
        params: &BTreeMap<String, f64>,
        daily: &Arc<CandleSeries>,
    ) -> Result<HeavyMetrics> {
        let concrete = template.with_params(params)?;
        let mut exec = ExecutionParams {
            initial_capital: self.config.initial_capital,
            fee: self.config.fee,
            slippage: self.config.slippage,
            ..ExecutionParams::default()
        };
        exec.stop_loss = concrete.stop_loss;
        exec.stop_gain = concrete.stop_gain;

        let strategy = Strategy::compile(concrete)?;
        let frame = strategy.evaluate(daily)?;
        let bt = backtester::run(daily, &frame.entry, &frame.exit, &exec)?;

        let performance =
            calculate_metrics(&bt.equity_curve, &bt.trades, self.config.initial_capital);
        let benchmark = buy_and_hold(&daily.close, &daily.timestamp, self.config.initial_capital);
        let (avg_atr, avg_adx) = volatility_context(daily);
        let regime_performance = breakdown(daily, &bt.trades);
        let criteria = evaluate_go_nogo(&performance, &benchmark, &CriteriaConfig::default());

        Ok(HeavyMetrics {
            alpha: alpha(performance.cagr, benchmark.cagr),
            performance,
            benchmark,
            avg_atr,
            avg_adx,
            regime_performance,
            criteria,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_checkpoint(
        &self,
        job_id: &str,
        request: &OptimizationRequest,
        round: usize,
        stage_index: usize,
        tests_completed_in_stage: usize,
        total_tests_in_stage: usize,
        locked_params: &BTreeMap<String, f64>,
        best_metrics: &Option<ResultMetrics>,
        status: JobStatus,
    ) {
        let cp = Checkpoint {
            job_id: job_id.to_string(),
            symbol: request.symbol.clone(),
            strategy: request.template.name.clone(),
            round,
            stage_index,
            tests_completed_in_stage,
            total_tests_in_stage,
            locked_params: locked_params.clone(),
            best_so_far: best_metrics.as_ref().map(|m| BestSoFar {
                params: locked_params.clone(),
                metrics: m.clone(),
            }),
            status,
            request: request.clone(),
        };
        // Checkpoint-write failures are logged, never fatal: the next
        // successful write subsumes the loss.
        if let Err(e) = cp.save(&self.config.checkpoint_dir) {
            tracing::error!("{e}");
        }
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    let mut lo = f64::MAX;
    let mut hi = f64::MIN;
    for &v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo, hi)
}

fn stage_progress_bar(name: &str, total: usize, skip: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {prefix:.bold} [{bar:30.cyan/dim}] {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb.set_prefix(name.to_string());
    pb.set_position(skip as u64);
    pb
}

fn parse_date_ms(date: Option<&str>) -> Result<Option<i64>> {
    let Some(date) = date else {
        return Ok(None);
    };
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date (expected YYYY-MM-DD): {date}"))?;
    Ok(Some(
        parsed
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc()
            .timestamp_millis(),
    ))
}
