//! Deterministic bar-by-bar execution.
//!
//! Execution model: a signal observed at the close of bar t acts at the
//! open of bar t+1. A pending exit signal executes at the open before any
//! intra-bar level is observed, so it always wins over a stop touched in
//! the same bar. Stop-loss and take-profit fill at their exact level
//! unless the bar gaps through, in which case the fill is the open with
//! slippage applied (a market fill). Entry and signal exits carry
//! slippage; fees apply to both notionals.

use crate::engine::types::{
    CandleSeries, EquityPoint, ExecutionParams, ExitReason, Trade,
};
use crate::error::EngineError;

/// Entries below this notional (quote units) are skipped as dust.
const MIN_NOTIONAL: f64 = 10.0;

#[derive(Debug, Clone, Default)]
pub struct Backtest {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

struct OpenPosition {
    quantity: f64,
    entry_price: f64,
    entry_ts: i64,
    entry_fee: f64,
}

/// Run the simulation over precomputed entry/exit masks.
pub fn run(
    series: &CandleSeries,
    entry: &[bool],
    exit: &[bool],
    params: &ExecutionParams,
) -> Result<Backtest, EngineError> {
    let n = series.len();
    if entry.len() != n || exit.len() != n {
        return Err(EngineError::WorkerError(format!(
            "mask length mismatch: {n} candles, {} entry, {} exit",
            entry.len(),
            exit.len()
        )));
    }

    let mut cash = params.initial_capital;
    let mut position: Option<OpenPosition> = None;
    let mut pending_entry = false;
    let mut pending_exit = false;
    let mut trades: Vec<Trade> = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(n);

    for i in 0..n {
        let ts = series.timestamp[i];
        let open = series.open[i];
        let high = series.high[i];
        let low = series.low[i];
        let close = series.close[i];

        // Pending signals from the previous close act at this open.
        if pending_entry && position.is_none() {
            pending_entry = false;
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
                let exec = open * (1.0 - params.slippage);
                cash += settle(&mut trades, &pos, exec, ts, ExitReason::Signal, params);
            }
        }

        // Intra-bar protective exits (also on the entry bar itself).
        if let Some(pos) = &position {
            let stop_price = pos.entry_price * (1.0 - params.stop_loss);
            if params.stop_loss > 0.0 && low <= stop_price {
                let exec = if open < stop_price {
                    // Gapped through the stop: market fill at the open.
                    open * (1.0 - params.slippage)
                } else {
                    stop_price
                };
                let pos = position.take().expect("position checked above");
                cash += settle(&mut trades, &pos, exec, ts, ExitReason::StopLoss, params);
            } else if let Some(stop_gain) = params.stop_gain {
                let target = pos.entry_price * (1.0 + stop_gain);
                if high >= target {
                    let exec = if open > target {
                        open * (1.0 - params.slippage)
                    } else {
                        target
                    };
                    let pos = position.take().expect("position checked above");
                    cash += settle(&mut trades, &pos, exec, ts, ExitReason::TakeProfit, params);
                }
            }
        }

        // Close-of-bar observation schedules action for the next open.
        if position.is_some() {
            if exit[i] {
                pending_exit = true;
            }
        } else if entry[i] {
            pending_entry = true;
        }

        let marked = position.as_ref().map_or(0.0, |p| p.quantity * close);
        equity_curve.push(EquityPoint {
            timestamp: ts,
            equity: cash + marked,
        });
    }

    // A position still open on the final bar stays marked to market in the
    // curve; a synthetic trade is appended only on request.
    if params.record_force_close {
        if let Some(pos) = position.take() {
            let last = n - 1;
            let exec = series.close[last] * (1.0 - params.slippage);
            settle(
                &mut trades,
                &pos,
                exec,
                series.timestamp[last],
                ExitReason::ForceClose,
                params,
            );
        }
    }

    Ok(Backtest {
        trades,
        equity_curve,
    })
}

/// Record the closed trade and return the cash delta.
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
