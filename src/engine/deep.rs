//! Deep-backtest refiner: re-simulates daily signals against a finer
//! intraday series so stop-loss and exit-signal events inside a single
//! daily bar are ordered by when they actually occurred.
//!
//! The intraday frame is injected by the caller (loaded once per batch);
//! when it is empty the caller degrades to the coarse backtester.

use crate::engine::types::{CandleSeries, ExecutionParams, ExitReason, Trade};
use crate::error::EngineError;

const MIN_NOTIONAL: f64 = 10.0;

struct OpenPosition {
    quantity: f64,
    entry_price: f64,
    entry_ts: i64,
    entry_fee: f64,
}

/// Walk daily bars, executing entries/exits on the intraday stream.
///
/// Within a day holding a position: the pending exit signal from the prior
/// daily close fires at the first intraday bar's open; otherwise the first
/// intraday bar breaching the stop closes at the exact stop price (or at
/// its open on a gap through). When stop and take-profit are touched by
/// the same intraday bar, the level nearer that bar's open fires; exact
/// ties prefer the stop.
pub fn refine(
    daily: &CandleSeries,
    entry: &[bool],
    exit: &[bool],
    intraday: &CandleSeries,
    params: &ExecutionParams,
) -> Result<Vec<Trade>, EngineError> {
    let n = daily.len();
    if entry.len() != n || exit.len() != n {
        return Err(EngineError::WorkerError(format!(
            "mask length mismatch: {n} daily bars, {} entry, {} exit",
            entry.len(),
            exit.len()
        )));
    }
    if intraday.is_empty() {
        return Err(EngineError::DataUnavailable(
            "intraday series is empty".into(),
        ));
    }

    let mut cash = params.initial_capital;
    let mut position: Option<OpenPosition> = None;
    let mut pending_entry = false;
    let mut pending_exit = false;
    let mut trades: Vec<Trade> = Vec::new();

    for u in 0..n {
        let day_start = daily.timestamp[u];
        let day_end = if u + 1 < n {
            daily.timestamp[u + 1]
        } else {
            i64::MAX
        };
        let lo = intraday.timestamp.partition_point(|&t| t < day_start);
        let hi = intraday.timestamp.partition_point(|&t| t < day_end);
        let bars = lo..hi;

        // Pending signals act at the first bar of the day.
        if pending_entry && position.is_none() {
            pending_entry = false;
            let (open, ts) = if bars.is_empty() {
                (daily.open[u], day_start)
            } else {
                (intraday.open[lo], intraday.timestamp[lo])
            };
            let exec = open * (1.0 + params.slippage);
            let alloc = cash * params.position_size;
            let quantity = alloc / (exec * (1.0 + params.fee));
            if quantity * exec > MIN_NOTIONAL {
                let fee = quantity * exec * params.fee;
                cash -= quantity * exec + fee;
                position = Some(OpenPosition {
                    quantity,
                    entry_price: exec,
                    entry_ts: ts,
                    entry_fee: fee,
                });
            }
        } else if pending_exit {
            pending_exit = false;
            if let Some(pos) = position.take() {
                let (open, ts) = if bars.is_empty() {
                    (daily.open[u], day_start)
                } else {
                    (intraday.open[lo], intraday.timestamp[lo])
                };
                let exec = open * (1.0 - params.slippage);
                cash += settle(&mut trades, &pos, exec, ts, ExitReason::Signal, params);
            }
        }

        // Protective exits ordered by the intraday stream.
        if position.is_some() {
            if bars.is_empty() {
                // No finer data for this day: fall back to the daily bar.
                if let Some(exit_fill) = protective_fill(
                    position.as_ref().expect("position is some"),
                    daily.open[u],
                    daily.high[u],
                    daily.low[u],
                    params,
                ) {
                    let pos = position.take().expect("position is some");
                    let (exec, reason) = exit_fill;
                    cash += settle(&mut trades, &pos, exec, day_start, reason, params);
                }
            } else {
                for i in bars {
                    let Some(pos) = position.as_ref() else { break };
                    if let Some((exec, reason)) = protective_fill(
                        pos,
                        intraday.open[i],
                        intraday.high[i],
                        intraday.low[i],
                        params,
                    ) {
                        let pos = position.take().expect("position is some");
                        cash += settle(
                            &mut trades,
                            &pos,
                            exec,
                            intraday.timestamp[i],
                            reason,
                            params,
                        );
                        break;
                    }
                }
            }
        }

        // Close-of-day observation schedules the next day's action.
        if position.is_some() {
            if exit[u] {
                pending_exit = true;
            }
        } else if entry[u] {
            pending_entry = true;
        }
    }

    Ok(trades)
}

/// Check stop-loss / take-profit against one bar. Returns the fill price
/// and reason, resolving a double touch by distance from the bar's open.
fn protective_fill(
    pos: &OpenPosition,
    open: f64,
    high: f64,
    low: f64,
    params: &ExecutionParams,
) -> Option<(f64, ExitReason)> {
    let stop_price = pos.entry_price * (1.0 - params.stop_loss);
    let stop_hit = params.stop_loss > 0.0 && low <= stop_price;
    let target = params.stop_gain.map(|sg| pos.entry_price * (1.0 + sg));
    let target_hit = target.is_some_and(|t| high >= t);

    let fill_stop = |open: f64| {
        if open < stop_price {
            open * (1.0 - params.slippage)
        } else {
            stop_price
        }
    };
    let fill_target = |open: f64, t: f64| {
        if open > t {
            open * (1.0 - params.slippage)
        } else {
            t
        }
    };

    match (stop_hit, target_hit) {
        (true, true) => {
            let t = target.expect("target hit implies configured");
            if (open - stop_price).abs() <= (t - open).abs() {
                Some((fill_stop(open), ExitReason::StopLoss))
            } else {
                Some((fill_target(open, t), ExitReason::TakeProfit))
            }
        }
        (true, false) => Some((fill_stop(open), ExitReason::StopLoss)),
        (false, true) => {
            let t = target.expect("target hit implies configured");
            Some((fill_target(open, t), ExitReason::TakeProfit))
        }
        (false, false) => None,
    }
}

fn settle(
    trades: &mut Vec<Trade>,
    pos: &OpenPosition,
    exec_price: f64,
    exit_ts: i64,
    reason: ExitReason,
    params: &ExecutionParams,
) -> f64 {
    let revenue = pos.quantity * exec_price;
    let exit_fee = revenue * params.fee;
    let fees = pos.entry_fee + exit_fee;
    let entry = pos.entry_price;
    let fraction =
        (exec_price * (1.0 - params.fee) - entry * (1.0 + params.fee)) / (entry * (1.0 + params.fee));
    trades.push(Trade {
        entry_ts: pos.entry_ts,
        entry_price: entry,
        exit_ts,
        exit_price: exec_price,
        quantity: pos.quantity,
        fees,
        exit_reason: reason,
        realized_pnl_absolute: (exec_price - entry) * pos.quantity - fees,
        realized_pnl_fraction: fraction,
    });
    revenue - exit_fee
}
