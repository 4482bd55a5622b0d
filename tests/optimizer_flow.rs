//! End-to-end optimizer runs against an in-memory fake exchange: plan,
//! execute, converge, checkpoint, pause/resume.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use cryptolab::config::EngineConfig;
use cryptolab::data::store::CandleStore;
use cryptolab::data::CandleFetcher;
use cryptolab::engine::strategy::StrategyTemplate;
use cryptolab::engine::types::Candle;
use cryptolab::indicators::{IndicatorKind, IndicatorSpec};
use cryptolab::optimizer::checkpoint::JobStatus;
use cryptolab::optimizer::stages::{OptimizationSchema, ParameterRange};
use cryptolab::optimizer::{OptimizationRequest, Optimizer};

const DAY: i64 = 86_400_000;
// 2017-01-01T00:00:00Z
const T0: i64 = 1_483_228_800_000;

/// Serves a deterministic oscillating uptrend so MA crosses actually trade.
struct FakeExchange {
    bars: usize,
}

impl CandleFetcher for FakeExchange {
    fn fetch_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut out = Vec::new();
        let first_index = ((since_ms - T0).max(0) as f64 / DAY as f64).ceil() as usize;
        for i in first_index..self.bars {
            if out.len() >= limit {
                break;
            }
            let x = i as f64;
            let p = 100.0 + (x * 0.12).sin() * 18.0 + x * 0.02;
            out.push(Candle {
                timestamp: T0 + i as i64 * DAY,
                open: p,
                high: p + 1.5,
                low: p - 1.5,
                close: p + 0.4,
                volume: 1_000.0 + x,
            });
        }
        Ok(out)
    }
}

fn test_optimizer(tmp: &tempfile::TempDir) -> Optimizer {
    let config = EngineConfig {
        data_root: tmp.path().join("storage"),
        checkpoint_dir: tmp.path().join("checkpoints"),
        batch_size: 25,
        workers: Some(2),
        ..EngineConfig::default()
    };
    let store = Arc::new(
        CandleStore::new(
            config.data_root.clone(),
            &config.exchange_id,
            &config.inception,
            Arc::new(FakeExchange { bars: 500 }),
        )
        .unwrap(),
    );
    Optimizer::new(config, store).unwrap()
}

fn sma_cross_request(job_id: Option<&str>) -> OptimizationRequest {
    let template = StrategyTemplate {
        name: "sma_cross".into(),
        indicators: vec![
            IndicatorSpec::new(IndicatorKind::Sma, Some("fast")).with_param("length", 5.0),
            IndicatorSpec::new(IndicatorKind::Sma, Some("slow")).with_param("length", 20.0),
        ],
        entry_logic: "crossover(fast, slow)".into(),
        exit_logic: "crossunder(fast, slow)".into(),
        stop_loss: 0.08,
        stop_gain: None,
    };

    let mut parameters = BTreeMap::new();
    parameters.insert(
        "fast_length".to_string(),
        ParameterRange {
            min: 4.0,
            max: 12.0,
            step: 1.0,
            default: 5.0,
        },
    );
    parameters.insert(
        "slow_length".to_string(),
        ParameterRange {
            min: 15.0,
            max: 35.0,
            step: 1.0,
            default: 20.0,
        },
    );
    let schema = OptimizationSchema {
        parameters,
        correlated_groups: vec![vec!["fast_length".to_string(), "slow_length".to_string()]],
    };

    OptimizationRequest {
        template,
        schema,
        symbol: "BTC/USDT".into(),
        timeframe: "1d".into(),
        start_date: Some("2017-01-01".into()),
        end_date: Some("2018-05-01".into()),
        custom_ranges: None,
        deep_backtest: false,
        job_id: job_id.map(str::to_string),
    }
}

#[test]
fn optimization_completes_with_materialized_payload() {
    let tmp = tempfile::TempDir::new().unwrap();
    let optimizer = test_optimizer(&tmp);

    let response = optimizer
        .run_optimization(sma_cross_request(Some("e2e-job")))
        .unwrap();

    assert_eq!(response.status, JobStatus::Completed);
    assert_eq!(response.job_id, "e2e-job");
    assert_eq!(response.total_stages, 1);
    assert!(response.stages[0].grid_mode);

    // Winner stays inside the schema bounds.
    let fast = response.best_parameters["fast_length"];
    let slow = response.best_parameters["slow_length"];
    assert!((4.0..=12.0).contains(&fast));
    assert!((15.0..=35.0).contains(&slow));

    // Materialized payload: candles, equity curve, indicator series.
    assert!(!response.candles.is_empty());
    assert_eq!(response.equity_curve.len(), response.candles.len());
    assert!(!response.indicator_data.is_empty());
    assert!(response
        .indicator_data
        .values()
        .all(|v| v.len() == response.candles.len()));
    let metrics = response.best_metrics.expect("winner has metrics");
    assert!(metrics.total_trades > 0);

    // Every evaluated combination landed in the durable results store:
    // at least the full coarse round (5 x 5 samples).
    let total = optimizer.results_store().count("e2e-job").unwrap();
    assert!(total >= 25, "expected >= 25 stored results, got {total}");

    // Top-K ranking with heavy metrics attached.
    assert!(!response.top_results.is_empty());
    assert!(response.top_results.len() <= 10);
    let top = &response.top_results[0];
    assert!(top.heavy.is_some());
    let heavy = top.heavy.as_ref().unwrap();
    assert!(heavy.performance.total_trades > 0);
    assert!(heavy.avg_atr > 0.0);

    // Scores are non-increasing down the ranking.
    for pair in response.top_results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // The completed checkpoint is on disk and excluded from resume lists.
    assert!(optimizer.list_incomplete().is_empty());
}

#[test]
fn pause_then_resume_matches_uninterrupted_run() {
    let tmp = tempfile::TempDir::new().unwrap();
    let optimizer = test_optimizer(&tmp);

    // Pause lands before the first batch is dispatched, so the paused run
    // completes zero combinations deterministically.
    optimizer.pause("paused-job");
    let paused = optimizer
        .run_optimization(sma_cross_request(Some("paused-job")))
        .unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert!(paused.trades.is_empty());

    let incomplete = optimizer.list_incomplete();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].job_id, "paused-job");
    assert_eq!(incomplete[0].status, JobStatus::Paused);

    // Resume runs 0..N and must land on the same winner as a fresh run.
    let resumed = optimizer.resume("paused-job").unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);

    let fresh = optimizer
        .run_optimization(sma_cross_request(Some("fresh-job")))
        .unwrap();
    assert_eq!(resumed.best_parameters, fresh.best_parameters);
}

#[test]
fn unknown_expression_column_fails_the_request() {
    let tmp = tempfile::TempDir::new().unwrap();
    let optimizer = test_optimizer(&tmp);

    let mut request = sma_cross_request(Some("bad-job"));
    request.template.entry_logic = "crossover(fast, phantom_column)".into();
    let err = optimizer.run_optimization(request).unwrap_err();
    assert!(err.to_string().contains("phantom_column"));

    // Preflight rejected the request before any result was stored.
    assert_eq!(optimizer.results_store().count("bad-job").unwrap(), 0);
}

#[test]
fn invalid_schema_group_is_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let optimizer = test_optimizer(&tmp);

    let mut request = sma_cross_request(None);
    request.schema.correlated_groups = vec![vec!["missing_param".to_string()]];
    let err = optimizer.run_optimization(request).unwrap_err();
    assert!(err.to_string().contains("missing_param"));
}

#[test]
fn cancel_marks_job_failed() {
    let tmp = tempfile::TempDir::new().unwrap();
    let optimizer = test_optimizer(&tmp);

    optimizer.cancel("doomed-job");
    let response = optimizer
        .run_optimization(sma_cross_request(Some("doomed-job")))
        .unwrap();
    assert_eq!(response.status, JobStatus::Failed);
    assert!(response.trades.is_empty());

    // Failed jobs are not offered for resume.
    assert!(optimizer.list_incomplete().is_empty());
}
