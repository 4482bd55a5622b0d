//! Performance metrics: pure functions over the equity curve and trade
//! list. All ratios are finite; the no-downside / no-loss cases are capped
//! so results stay valid JSON.

use serde::{Deserialize, Serialize};

use super::types::{EquityPoint, Trade};

/// Finite stand-in for "no losing trades" / "no downside" ratios.
pub const MAX_RATIO: f64 = 999.99;

const MS_PER_DAY: f64 = 86_400_000.0;
/// Crypto trades every day.
const PERIODS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown: f64,
    pub max_dd_duration_days: f64,
    pub avg_drawdown: f64,
    pub recovery_factor: f64,
    pub total_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub trade_concentration: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_return: 0.0,
            cagr: 0.0,
            sharpe: 0.0,
            sortino: 0.0,
            calmar: 0.0,
            max_drawdown: 0.0,
            max_dd_duration_days: 0.0,
            avg_drawdown: 0.0,
            recovery_factor: 0.0,
            total_trades: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            expectancy: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
            trade_concentration: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    pub return_pct: f64,
    pub cagr: f64,
    pub final_value: f64,
}

pub fn calculate_metrics(
    equity_curve: &[EquityPoint],
    trades: &[Trade],
    initial_capital: f64,
) -> PerformanceMetrics {
    let mut m = PerformanceMetrics::default();
    if initial_capital <= 0.0 {
        return m;
    }

    trade_stats(trades, &mut m);

    if equity_curve.len() < 2 {
        return m;
    }

    let final_equity = equity_curve.last().expect("len >= 2").equity;
    m.total_return = final_equity / initial_capital - 1.0;

    let elapsed_days = (equity_curve.last().expect("len >= 2").timestamp
        - equity_curve[0].timestamp) as f64
        / MS_PER_DAY;
    if elapsed_days >= 1.0 && final_equity > 0.0 {
        m.cagr = (final_equity / initial_capital).powf(365.25 / elapsed_days) - 1.0;
    }

    // Bar returns off the curve.
    let mut returns = Vec::with_capacity(equity_curve.len());
    let mut prev = initial_capital;
    for p in equity_curve {
        if prev > 0.0 {
            returns.push((p.equity - prev) / prev);
        }
        prev = p.equity;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let std = std_dev(&returns);
    let annualize = PERIODS_PER_YEAR.sqrt();
    if std > 0.0 {
        m.sharpe = mean / std * annualize;
    }

    let negative: Vec<f64> = returns.iter().filter(|r| **r < 0.0).copied().collect();
    if negative.is_empty() {
        m.sortino = if mean > 0.0 { MAX_RATIO } else { 0.0 };
    } else {
        let downside =
            (negative.iter().map(|r| r * r).sum::<f64>() / returns.len() as f64).sqrt();
        if downside > 0.0 {
            m.sortino = (mean / downside * annualize).min(MAX_RATIO);
        }
    }

    drawdown_stats(equity_curve, &mut m);

    m.calmar = if m.max_drawdown > 0.0 {
        (m.cagr / m.max_drawdown).min(MAX_RATIO)
    } else if m.cagr > 0.0 {
        MAX_RATIO
    } else {
        0.0
    };
    m.recovery_factor = if m.max_drawdown > 0.0 {
        (m.total_return / m.max_drawdown).min(MAX_RATIO)
    } else if m.total_return > 0.0 {
        MAX_RATIO
    } else {
        0.0
    };

    m
}

fn drawdown_stats(equity_curve: &[EquityPoint], m: &mut PerformanceMetrics) {
    let mut peak = equity_curve[0].equity;
    let mut max_dd = 0.0f64;
    let mut dd_sum = 0.0f64;
    let mut dd_count = 0usize;
    let mut dd_start_ts: Option<i64> = None;
    let mut max_duration_ms = 0i64;

    for p in equity_curve {
        if p.equity >= peak {
            if let Some(start) = dd_start_ts.take() {
                max_duration_ms = max_duration_ms.max(p.timestamp - start);
            }
            peak = p.equity;
            continue;
        }
        let dd = (peak - p.equity) / peak;
        if dd > 0.0 {
            dd_sum += dd;
            dd_count += 1;
            if dd_start_ts.is_none() {
                dd_start_ts = Some(p.timestamp);
            }
        }
        max_dd = max_dd.max(dd);
    }
    // Still underwater at the end.
    if let Some(start) = dd_start_ts {
        let last = equity_curve.last().expect("non-empty").timestamp;
        max_duration_ms = max_duration_ms.max(last - start);
    }

    m.max_drawdown = max_dd;
    m.max_dd_duration_days = max_duration_ms as f64 / MS_PER_DAY;
    m.avg_drawdown = if dd_count > 0 {
        dd_sum / dd_count as f64
    } else {
        0.0
    };
}

fn trade_stats(trades: &[Trade], m: &mut PerformanceMetrics) {
    m.total_trades = trades.len();
    if trades.is_empty() {
        return;
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    let mut win_sum = 0.0f64;
    let mut loss_sum = 0.0f64;
    let mut win_streak = 0usize;
    let mut loss_streak = 0usize;

    for t in trades {
        let pnl = t.realized_pnl_absolute;
        if pnl > 0.0 {
            winners += 1;
            win_sum += pnl;
            win_streak += 1;
            loss_streak = 0;
        } else if pnl < 0.0 {
            losers += 1;
            loss_sum += pnl;
            loss_streak += 1;
            win_streak = 0;
        } else {
            // Scratch trades break both streaks.
            win_streak = 0;
            loss_streak = 0;
        }
        m.max_consecutive_wins = m.max_consecutive_wins.max(win_streak);
        m.max_consecutive_losses = m.max_consecutive_losses.max(loss_streak);
    }

    let total = trades.len() as f64;
    m.win_rate = winners as f64 / total;
    let loss_rate = losers as f64 / total;
    m.avg_win = if winners > 0 {
        win_sum / winners as f64
    } else {
        0.0
    };
    m.avg_loss = if losers > 0 {
        loss_sum / losers as f64
    } else {
        0.0
    };
    m.expectancy = m.win_rate * m.avg_win - loss_rate * m.avg_loss.abs();
    m.profit_factor = if loss_sum < 0.0 {
        (win_sum / loss_sum.abs()).min(MAX_RATIO)
    } else if win_sum > 0.0 {
        MAX_RATIO
    } else {
        0.0
    };

    // Fraction of gross profit carried by the top-10 winners.
    let mut winner_pnls: Vec<f64> = trades
        .iter()
        .map(|t| t.realized_pnl_absolute)
        .filter(|p| *p > 0.0)
        .collect();
    if win_sum > 0.0 {
        winner_pnls.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let top: f64 = winner_pnls.iter().take(10).sum();
        m.trade_concentration = top / win_sum;
    }
}

fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let variance =
        data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

/// Buy-and-hold benchmark: all-in at the first close, out at the last.
pub fn buy_and_hold(closes: &[f64], timestamps: &[i64], initial_capital: f64) -> BenchmarkMetrics {
    if closes.len() < 2 || closes[0] <= 0.0 {
        return BenchmarkMetrics {
            return_pct: 0.0,
            cagr: 0.0,
            final_value: initial_capital,
        };
    }
    let shares = initial_capital / closes[0];
    let final_value = shares * closes[closes.len() - 1];
    let return_pct = final_value / initial_capital - 1.0;

    let days = (timestamps[timestamps.len() - 1] - timestamps[0]) as f64 / MS_PER_DAY;
    let cagr = if days >= 1.0 && final_value > 0.0 {
        (final_value / initial_capital).powf(365.25 / days) - 1.0
    } else {
        return_pct
    };
    BenchmarkMetrics {
        return_pct,
        cagr,
        final_value,
    }
}

/// Excess annualized return over the benchmark.
pub fn alpha(strategy_cagr: f64, benchmark_cagr: f64) -> f64 {
    strategy_cagr - benchmark_cagr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ExitReason;

    const DAY: i64 = 86_400_000;

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: i as i64 * DAY,
                equity,
            })
            .collect()
    }

    fn trade(pnl: f64) -> Trade {
        Trade {
            entry_ts: 0,
            entry_price: 100.0,
            exit_ts: DAY,
            exit_price: 100.0 + pnl / 10.0,
            quantity: 10.0,
            fees: 0.0,
            exit_reason: ExitReason::Signal,
            realized_pnl_absolute: pnl,
            realized_pnl_fraction: pnl / 1000.0,
        }
    }

    #[test]
    fn max_drawdown_known_value() {
        let c = curve(&[10_000.0, 10_200.0, 9_800.0, 10_100.0]);
        let m = calculate_metrics(&c, &[], 10_000.0);
        let expected = (10_200.0 - 9_800.0) / 10_200.0;
        assert!((m.max_drawdown - expected).abs() < 1e-12);
    }

    #[test]
    fn cagr_one_year_equals_total_return() {
        // 366 points spanning exactly 365.25 days is close enough that
        // CAGR ~ total return.
        let values: Vec<f64> = (0..=365).map(|i| 10_000.0 + f64::from(i) * 10.0).collect();
        let m = calculate_metrics(&curve(&values), &[], 10_000.0);
        assert!((m.cagr - m.total_return).abs() < 0.01);
    }

    #[test]
    fn cagr_undefined_below_one_day() {
        let c = vec![
            EquityPoint {
                timestamp: 0,
                equity: 10_000.0,
            },
            EquityPoint {
                timestamp: 3_600_000,
                equity: 11_000.0,
            },
        ];
        let m = calculate_metrics(&c, &[], 10_000.0);
        assert_eq!(m.cagr, 0.0);
        assert!(m.total_return > 0.0);
    }

    #[test]
    fn sortino_capped_without_downside() {
        let values: Vec<f64> = (0..50).map(|i| 10_000.0 + f64::from(i) * 20.0).collect();
        let m = calculate_metrics(&curve(&values), &[], 10_000.0);
        assert_eq!(m.sortino, MAX_RATIO);
        assert!(m.sortino.is_finite());
    }

    #[test]
    fn dd_duration_counts_underwater_span() {
        // Peak at day 1, underwater days 2..=4, recovery day 5
        let c = curve(&[10_000.0, 10_500.0, 10_100.0, 10_200.0, 10_300.0, 10_600.0]);
        let m = calculate_metrics(&c, &[], 10_000.0);
        assert!(m.max_dd_duration_days >= 3.0);
        assert!(m.max_dd_duration_days <= 4.0);
    }

    #[test]
    fn expectancy_and_rates() {
        let trades = vec![trade(200.0), trade(-100.0), trade(150.0), trade(-50.0)];
        let m = calculate_metrics(&curve(&[10_000.0, 10_200.0]), &trades, 10_000.0);
        assert!((m.win_rate - 0.5).abs() < 1e-12);
        assert!((m.avg_win - 175.0).abs() < 1e-12);
        assert!((m.avg_loss - (-75.0)).abs() < 1e-12);
        // 0.5*175 - 0.5*75 = 50
        assert!((m.expectancy - 50.0).abs() < 1e-12);
    }

    #[test]
    fn profit_factor_capped_when_no_losses() {
        let trades = vec![trade(100.0), trade(50.0)];
        let m = calculate_metrics(&curve(&[10_000.0, 10_150.0]), &trades, 10_000.0);
        assert_eq!(m.profit_factor, MAX_RATIO);
    }

    #[test]
    fn streaks_and_scratch_trades() {
        let trades = vec![
            trade(10.0),
            trade(-5.0),
            trade(-5.0),
            trade(0.0),
            trade(-5.0),
            trade(20.0),
            trade(30.0),
        ];
        let m = calculate_metrics(&curve(&[10_000.0, 10_045.0]), &trades, 10_000.0);
        assert_eq!(m.max_consecutive_losses, 2); // scratch resets the run
        assert_eq!(m.max_consecutive_wins, 2);
    }

    #[test]
    fn concentration_of_top_winners() {
        // 12 winners of 10 plus one of 880: top-10 carries most of it
        let mut trades: Vec<Trade> = (0..12).map(|_| trade(10.0)).collect();
        trades.push(trade(880.0));
        let m = calculate_metrics(&curve(&[10_000.0, 11_000.0]), &trades, 10_000.0);
        assert!(m.trade_concentration > 0.97);
        assert!(m.trade_concentration <= 1.0);
    }

    #[test]
    fn buy_and_hold_benchmark_and_alpha() {
        let closes: Vec<f64> = (0..=365).map(|i| 100.0 + f64::from(i) * 0.5).collect();
        let ts: Vec<i64> = (0..=365).map(|i| i64::from(i) * DAY).collect();
        let b = buy_and_hold(&closes, &ts, 10_000.0);
        assert!(b.return_pct > 1.8); // ~+182%
        assert!(b.cagr > 1.0);
        assert!((alpha(2.0, b.cagr) - (2.0 - b.cagr)).abs() < 1e-12);
    }

    #[test]
    fn empty_inputs_give_defaults() {
        let m = calculate_metrics(&[], &[], 10_000.0);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.sharpe, 0.0);
        let m = calculate_metrics(&curve(&[10_000.0, 10_100.0]), &[], -1.0);
        assert_eq!(m.total_return, 0.0);
    }
}
