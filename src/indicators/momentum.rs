// Momentum studies: RSI, stochastic, MACD, ROC, CCI, Williams %R, MFI.

use super::helpers::{pad_series, typical_price, valid_tail};
use super::overlap::{ema, sma};

/// Wilder RSI over an arbitrary period.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change >= 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        let change = values[i] - values[i - 1];
        let (gain, loss) = if change >= 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = avg_gain * (1.0 - alpha) + gain * alpha;
        avg_loss = avg_loss * (1.0 - alpha) + loss * alpha;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return 50.0;
        }
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Stochastic %K: position of the close within the high/low window.
pub fn stochastic_k(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }
    for i in (period - 1)..n {
        let window = i + 1 - period..=i;
        let hh = high[window.clone()].iter().copied().fold(f64::MIN, f64::max);
        let ll = low[window].iter().copied().fold(f64::MAX, f64::min);
        let range = hh - ll;
        out[i] = if range > 0.0 {
            100.0 * (close[i] - ll) / range
        } else {
            50.0
        };
    }
    out
}

/// Stochastic %D: SMA of %K.
pub fn stochastic_d(k: &[f64], d_period: usize) -> Vec<f64> {
    sma(k, d_period)
}

pub struct MacdOutput {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD from fast/slow EMAs with an EMA signal line.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdOutput {
    let n = values.len();
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema(&line, signal_period);
    let histogram: Vec<f64> = line.iter().zip(signal.iter()).map(|(l, s)| l - s).collect();
    debug_assert_eq!(line.len(), n);
    MacdOutput {
        line,
        signal,
        histogram,
    }
}

/// Rate of change: percent move versus `period` bars ago.
pub fn roc(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 {
        return out;
    }
    for i in period..n {
        let base = values[i - period];
        if base != 0.0 && base.is_finite() {
            out[i] = 100.0 * (values[i] - base) / base;
        }
    }
    out
}

/// Commodity Channel Index over the typical price.
pub fn cci(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }
    let tp = typical_price(high, low, close);
    let tp_sma = sma(&tp, period);
    for i in (period - 1)..n {
        let mean = tp_sma[i];
        let mean_dev: f64 = tp[i + 1 - period..=i]
            .iter()
            .map(|v| (v - mean).abs())
            .sum::<f64>()
            / period as f64;
        if mean_dev > 0.0 {
            out[i] = (tp[i] - mean) / (0.015 * mean_dev);
        } else {
            out[i] = 0.0;
        }
    }
    out
}

/// Williams %R in `[-100, 0]`.
pub fn williams_r(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }
    for i in (period - 1)..n {
        let window = i + 1 - period..=i;
        let hh = high[window.clone()].iter().copied().fold(f64::MIN, f64::max);
        let ll = low[window].iter().copied().fold(f64::MAX, f64::min);
        let range = hh - ll;
        out[i] = if range > 0.0 {
            -100.0 * (hh - close[i]) / range
        } else {
            -50.0
        };
    }
    out
}

/// Money Flow Index over the typical price.
pub fn mfi(high: &[f64], low: &[f64], close: &[f64], volume: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    if period == 0 || n < period {
        return vec![f64::NAN; n];
    }
    let tp = typical_price(high, low, close);
    let (_, tp_tail) = valid_tail(&tp);
    let values =
        rust_ti::momentum_indicators::bulk::money_flow_index(tp_tail, &volume[n - tp_tail.len()..], period);
    pad_series(&values, n)
}
