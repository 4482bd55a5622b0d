use anyhow::{bail, Result};
use garde::Validate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// One OHLCV bar. `timestamp` is milliseconds since the Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Column-oriented candle series. The engine works on plain slices; the
/// candle store owns the parquet representation and converts at the edge.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    pub timestamp: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl CandleSeries {
    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    pub fn from_candles(candles: &[Candle]) -> Self {
        let mut s = Self::default();
        for c in candles {
            s.timestamp.push(c.timestamp);
            s.open.push(c.open);
            s.high.push(c.high);
            s.low.push(c.low);
            s.close.push(c.close);
            s.volume.push(c.volume);
        }
        s
    }

    /// Extract from a candle `DataFrame` (the candle store's schema).
    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        if df.height() == 0 {
            return Ok(Self::default());
        }
        let ts = df.column("timestamp")?.i64()?;
        let col_f64 = |name: &str| -> Result<Vec<f64>> {
            let ca = df.column(name)?.f64()?;
            Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        };
        let timestamp: Vec<i64> = ts.into_iter().map(|v| v.unwrap_or(0)).collect();
        Ok(Self {
            timestamp,
            open: col_f64("open")?,
            high: col_f64("high")?,
            low: col_f64("low")?,
            close: col_f64("close")?,
            volume: col_f64("volume")?,
        })
    }

    pub fn candle(&self, i: usize) -> Candle {
        Candle {
            timestamp: self.timestamp[i],
            open: self.open[i],
            high: self.high[i],
            low: self.low[i],
            close: self.close[i],
            volume: self.volume[i],
        }
    }

    /// Strictly ascending, duplicate-free timestamps.
    pub fn validate_monotonic(&self) -> Result<()> {
        for w in self.timestamp.windows(2) {
            if w[1] <= w[0] {
                bail!(
                    "candle timestamps not strictly ascending: {} then {}",
                    w[0],
                    w[1]
                );
            }
        }
        Ok(())
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    ForceClose,
}

/// A realized long trade. Prices are execution prices (slippage included
/// where it applies); immutable once the exit is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub entry_ts: i64,
    pub entry_price: f64,
    pub exit_ts: i64,
    pub exit_price: f64,
    pub quantity: f64,
    pub fees: f64,
    pub exit_reason: ExitReason,
    pub realized_pnl_absolute: f64,
    pub realized_pnl_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
}

/// Execution-model knobs for a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExecutionParams {
    #[garde(range(min = 0.01))]
    pub initial_capital: f64,
    #[garde(range(min = 0.0, max = 0.1))]
    pub fee: f64,
    #[garde(range(min = 0.0, max = 0.1))]
    pub slippage: f64,
    /// Fraction of available cash allocated per entry.
    #[garde(range(min = 0.0, max = 1.0))]
    pub position_size: f64,
    #[garde(range(min = 0.0, max = 1.0))]
    pub stop_loss: f64,
    #[garde(inner(range(min = 0.0, max = 1.0)))]
    pub stop_gain: Option<f64>,
    /// Append a synthetic force-close trade for a position still open on
    /// the final bar. Off by default; equity is marked either way.
    #[serde(default)]
    #[garde(skip)]
    pub record_force_close: bool,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            fee: 0.000_75,
            slippage: 0.000_5,
            position_size: 1.0,
            stop_loss: 0.06,
            stop_gain: None,
            record_force_close: false,
        }
    }
}

#[cfg(test)]
pub(crate) fn make_series(bars: &[(i64, f64, f64, f64, f64)]) -> CandleSeries {
    let candles: Vec<Candle> = bars
        .iter()
        .map(|&(ts, o, h, l, c)| Candle {
            timestamp: ts,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1000.0,
        })
        .collect();
    CandleSeries::from_candles(&candles)
}
