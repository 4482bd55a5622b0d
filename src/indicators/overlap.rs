// Overlap studies: moving-average family, VWAP, volume SMA.

use rust_ti::standard_indicators::bulk as sti;

use super::helpers::{pad_series, valid_tail};

pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let (_, tail) = valid_tail(values);
    if period == 0 || tail.len() < period {
        return vec![f64::NAN; n];
    }
    pad_series(&sti::simple_moving_average(tail, period), n)
}

pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let (_, tail) = valid_tail(values);
    if period == 0 || tail.len() < period {
        return vec![f64::NAN; n];
    }
    pad_series(&sti::exponential_moving_average(tail, period), n)
}

/// Linearly weighted MA, most recent bar heaviest.
pub fn wma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    let (offset, tail) = valid_tail(values);
    if period == 0 || tail.len() < period {
        return out;
    }
    let weight_sum = (period * (period + 1)) as f64 / 2.0;
    for i in (period - 1)..tail.len() {
        let window = &tail[i + 1 - period..=i];
        let acc: f64 = window
            .iter()
            .enumerate()
            .map(|(j, v)| v * (j + 1) as f64)
            .sum();
        out[offset + i] = acc / weight_sum;
    }
    out
}

pub fn dema(values: &[f64], period: usize) -> Vec<f64> {
    let e1 = ema(values, period);
    let e2 = ema(&e1, period);
    e1.iter().zip(e2.iter()).map(|(a, b)| 2.0 * a - b).collect()
}

pub fn tema(values: &[f64], period: usize) -> Vec<f64> {
    let e1 = ema(values, period);
    let e2 = ema(&e1, period);
    let e3 = ema(&e2, period);
    e1.iter()
        .zip(e2.iter())
        .zip(e3.iter())
        .map(|((a, b), c)| 3.0 * a - 3.0 * b + c)
        .collect()
}

/// Hull MA: `WMA(2*WMA(n/2) - WMA(n), sqrt(n))`.
pub fn hma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if period < 2 {
        return vec![f64::NAN; n];
    }
    let half = (period / 2).max(1);
    let sqrt_p = ((period as f64).sqrt().round() as usize).max(1);
    let wma_half = wma(values, half);
    let wma_full = wma(values, period);
    let diff: Vec<f64> = wma_half
        .iter()
        .zip(wma_full.iter())
        .map(|(a, b)| 2.0 * a - b)
        .collect();
    wma(&diff, sqrt_p)
}

/// Running VWAP: cumulative typical-price volume over cumulative volume.
pub fn vwap(high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    let mut cum_pv = 0.0;
    let mut cum_v = 0.0;
    for i in 0..n {
        let tp = (high[i] + low[i] + close[i]) / 3.0;
        cum_pv += tp * volume[i];
        cum_v += volume[i];
        if cum_v > 0.0 {
            out[i] = cum_pv / cum_v;
        }
    }
    out
}

pub fn volume_sma(volume: &[f64], period: usize) -> Vec<f64> {
    sma(volume, period)
}
