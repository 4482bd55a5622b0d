//! Batch evaluation on the worker pool.
//!
//! A `WorkerContext` is built once per job and shared read-only across
//! every batch: the daily series, the optional intraday series for deep
//! mode (loaded once, reused by every backtest), and the execution
//! parameters. Each combination is evaluated independently; a failure is
//! recorded on its result row and never aborts the batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::backtester;
use crate::engine::deep;
use crate::engine::strategy::{Strategy, StrategyTemplate};
use crate::engine::types::{CandleSeries, ExecutionParams, Trade};
use crate::error::EngineError;

/// Lightweight per-combination metrics used for stage scoring. The rich
/// metric set is only computed for the final materialization and top-K.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetrics {
    pub total_trades: usize,
    pub win_rate: f64,
    /// Sum of per-trade realized fractions.
    pub total_return: f64,
    pub avg_profit: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The overrides tested (stage parameters merged over locked best).
    pub params: BTreeMap<String, f64>,
    /// Complete effective parameter state after application.
    pub full_params: BTreeMap<String, f64>,
    pub metrics: Option<ResultMetrics>,
    pub error: Option<String>,
}

pub struct WorkerContext {
    pub template: StrategyTemplate,
    pub daily: Arc<CandleSeries>,
    pub intraday: Option<Arc<CandleSeries>>,
    pub exec: ExecutionParams,
    pub deep: bool,
}

/// Evaluate one batch of combinations in parallel. Result order matches
/// input order, so stage scoring is deterministic.
pub fn run_batch(ctx: &WorkerContext, combos: &[BTreeMap<String, f64>]) -> Vec<StageResult> {
    combos.par_iter().map(|combo| run_combo(ctx, combo)).collect()
}

pub fn run_combo(ctx: &WorkerContext, combo: &BTreeMap<String, f64>) -> StageResult {
    match evaluate(ctx, combo) {
        Ok((full_params, metrics)) => StageResult {
            params: combo.clone(),
            full_params,
            metrics: Some(metrics),
            error: None,
        },
        Err(e) => StageResult {
            params: combo.clone(),
            full_params: combo.clone(),
            metrics: None,
            error: Some(format!("{}: {e}", error_code(&e))),
        },
    }
}

fn error_code(e: &anyhow::Error) -> &'static str {
    e.downcast_ref::<EngineError>()
        .map_or("worker_error", EngineError::code)
}

fn evaluate(
    ctx: &WorkerContext,
    combo: &BTreeMap<String, f64>,
) -> anyhow::Result<(BTreeMap<String, f64>, ResultMetrics)> {
    let concrete = ctx.template.with_params(combo)?;
    let full_params = concrete.effective_params();

    let mut exec = ctx.exec.clone();
    exec.stop_loss = concrete.stop_loss;
    exec.stop_gain = concrete.stop_gain;

    let strategy = Strategy::compile(concrete)?;
    let frame = strategy.evaluate(&ctx.daily)?;

    let trades = if ctx.deep {
        match &ctx.intraday {
            Some(intraday) if !intraday.is_empty() => {
                deep::refine(&ctx.daily, &frame.entry, &frame.exit, intraday, &exec)?
            }
            _ => {
                // Degrade silently to the coarse path; the caller already
                // logged the missing intraday series once per job.
                backtester::run(&ctx.daily, &frame.entry, &frame.exit, &exec)?.trades
            }
        }
    } else {
        backtester::run(&ctx.daily, &frame.entry, &frame.exit, &exec)?.trades
    };

    Ok((full_params, metrics_from_trades(&trades)))
}

/// Worker-level metrics from the trade list alone: simple sums and a
/// per-trade Sharpe (population deviation), matching what stage scoring
/// consumes.
pub fn metrics_from_trades(trades: &[Trade]) -> ResultMetrics {
    let mut m = ResultMetrics {
        total_trades: trades.len(),
        ..ResultMetrics::default()
    };
    if trades.is_empty() {
        return m;
    }
    let returns: Vec<f64> = trades.iter().map(|t| t.realized_pnl_fraction).collect();
    let wins = returns.iter().filter(|r| **r > 0.0).count();
    let total = returns.len() as f64;
    m.win_rate = wins as f64 / total;
    m.total_return = returns.iter().sum();
    m.avg_profit = m.total_return / total;

    let mean = m.avg_profit;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / total;
    let std = variance.sqrt();
    if std > 0.0 {
        m.sharpe_ratio = mean / std;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{make_series, ExitReason};
    use crate::indicators::{IndicatorKind, IndicatorSpec};

    const DAY: i64 = 86_400_000;

    fn oscillating_series(n: usize) -> CandleSeries {
        let bars: Vec<(i64, f64, f64, f64, f64)> = (0..n)
            .map(|i| {
                let p = 100.0 + ((i as f64) * 0.2).sin() * 15.0;
                (i as i64 * DAY, p, p + 1.0, p - 1.0, p)
            })
            .collect();
        make_series(&bars)
    }

    fn template() -> StrategyTemplate {
        StrategyTemplate {
            name: "sma_cross".into(),
            indicators: vec![
                IndicatorSpec::new(IndicatorKind::Sma, Some("fast")).with_param("length", 5.0),
                IndicatorSpec::new(IndicatorKind::Sma, Some("slow")).with_param("length", 20.0),
            ],
            entry_logic: "crossover(fast, slow)".into(),
            exit_logic: "crossunder(fast, slow)".into(),
            stop_loss: 0.08,
            stop_gain: None,
        }
    }

    fn context(deep: bool) -> WorkerContext {
        WorkerContext {
            template: template(),
            daily: Arc::new(oscillating_series(300)),
            intraday: None,
            exec: ExecutionParams::default(),
            deep,
        }
    }

    #[test]
    fn run_combo_produces_metrics() {
        let ctx = context(false);
        let mut combo = BTreeMap::new();
        combo.insert("fast_length".to_string(), 6.0);
        combo.insert("slow_length".to_string(), 18.0);
        let result = run_combo(&ctx, &combo);
        assert!(result.error.is_none(), "error: {:?}", result.error);
        let m = result.metrics.unwrap();
        assert!(m.total_trades > 0);
        assert!((result.full_params["fast_length"] - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn degenerate_length_reported_not_fatal() {
        let ctx = context(false);
        let mut combo = BTreeMap::new();
        combo.insert("fast_length".to_string(), 5000.0);
        let result = run_combo(&ctx, &combo);
        assert!(result.metrics.is_none());
        assert!(result.error.unwrap().starts_with("parameter_invalid"));
    }

    #[test]
    fn unknown_parameter_reported() {
        let ctx = context(false);
        let mut combo = BTreeMap::new();
        combo.insert("who_is_this".to_string(), 1.0);
        let result = run_combo(&ctx, &combo);
        assert!(result.error.unwrap().starts_with("parameter_invalid"));
    }

    #[test]
    fn batch_preserves_order_and_is_deterministic() {
        let ctx = context(false);
        let combos: Vec<BTreeMap<String, f64>> = (4..14)
            .map(|fast| {
                let mut c = BTreeMap::new();
                c.insert("fast_length".to_string(), f64::from(fast));
                c.insert("slow_length".to_string(), 21.0);
                c
            })
            .collect();
        let a = run_batch(&ctx, &combos);
        let b = run_batch(&ctx, &combos);
        assert_eq!(a.len(), 10);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(
                serde_json::to_string(x).unwrap(),
                serde_json::to_string(y).unwrap()
            );
        }
        // Order matches input
        for (i, r) in a.iter().enumerate() {
            assert!((r.params["fast_length"] - f64::from(4 + i as i32)).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn deep_mode_without_intraday_falls_back() {
        let ctx = context(true);
        let mut combo = BTreeMap::new();
        combo.insert("fast_length".to_string(), 6.0);
        let result = run_combo(&ctx, &combo);
        assert!(result.error.is_none());
        assert!(result.metrics.unwrap().total_trades > 0);
    }

    #[test]
    fn metrics_from_trades_sharpe() {
        let make = |fraction: f64| Trade {
            entry_ts: 0,
            entry_price: 100.0,
            exit_ts: DAY,
            exit_price: 100.0 * (1.0 + fraction),
            quantity: 1.0,
            fees: 0.0,
            exit_reason: ExitReason::Signal,
            realized_pnl_absolute: 100.0 * fraction,
            realized_pnl_fraction: fraction,
        };
        let trades = vec![make(0.10), make(-0.05), make(0.08), make(0.02)];
        let m = metrics_from_trades(&trades);
        assert_eq!(m.total_trades, 4);
        assert!((m.win_rate - 0.75).abs() < 1e-12);
        assert!((m.total_return - 0.15).abs() < 1e-12);
        assert!(m.sharpe_ratio > 0.0);

        let flat = vec![make(0.01), make(0.01)];
        let m = metrics_from_trades(&flat);
        assert_eq!(m.sharpe_ratio, 0.0); // zero deviation
    }
}
