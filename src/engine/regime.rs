//! Market-regime classification and per-regime trade breakdown.
//!
//! Trend filter: close versus a long SMA (200 by default) with ADX(14) as
//! the strength gate. Bars without a warmed-up SMA land in `Range`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::types::{CandleSeries, Trade};
use crate::indicators::{overlap, trend};

const SMA_PERIOD: usize = 200;
const ADX_PERIOD: usize = 14;
const ADX_TREND_THRESHOLD: f64 = 20.0;
/// Close within this fraction of the SMA counts as range-bound.
const RANGE_BAND: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    BullStrong,
    BullWeak,
    Range,
    BearWeak,
    BearStrong,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeStats {
    pub count: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
    pub win_rate: f64,
}

/// Classify every bar of the series.
pub fn classify(series: &CandleSeries) -> Vec<Regime> {
    let sma = overlap::sma(&series.close, SMA_PERIOD.min(series.len().saturating_sub(1)).max(2));
    let adx = trend::adx(&series.high, &series.low, &series.close, ADX_PERIOD);

    series
        .close
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let base = sma[i];
            if base.is_nan() || base <= 0.0 {
                return Regime::Range;
            }
            let pct = close / base - 1.0;
            let strong = !adx[i].is_nan() && adx[i] >= ADX_TREND_THRESHOLD;
            if pct > RANGE_BAND {
                if strong {
                    Regime::BullStrong
                } else {
                    Regime::BullWeak
                }
            } else if pct < -RANGE_BAND {
                if strong {
                    Regime::BearStrong
                } else {
                    Regime::BearWeak
                }
            } else {
                Regime::Range
            }
        })
        .collect()
}

/// Bucket trades by the regime at their entry bar.
pub fn breakdown(series: &CandleSeries, trades: &[Trade]) -> BTreeMap<Regime, RegimeStats> {
    let regimes = classify(series);
    let mut stats: BTreeMap<Regime, RegimeStats> = BTreeMap::new();

    for t in trades {
        // Last bar at or before the entry timestamp.
        let idx = match series.timestamp.binary_search(&t.entry_ts) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        let entry = stats.entry(regimes[idx]).or_default();
        entry.count += 1;
        entry.total_pnl += t.realized_pnl_absolute;
        if t.realized_pnl_absolute > 0.0 {
            entry.wins += 1;
        } else if t.realized_pnl_absolute < 0.0 {
            entry.losses += 1;
        }
    }

    for s in stats.values_mut() {
        if s.count > 0 {
            s.win_rate = s.wins as f64 / s.count as f64;
        }
    }
    stats
}
