// Volatility studies: Bollinger bands, ATR, NATR.

use super::helpers::pad_series;

pub struct BandsOutput {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Bollinger bands: SMA center, `std_mult` standard deviations either side.
pub fn bollinger(values: &[f64], period: usize, std_mult: f64) -> BandsOutput {
    let n = values.len();
    if period == 0 || n < period {
        return BandsOutput {
            upper: vec![f64::NAN; n],
            middle: vec![f64::NAN; n],
            lower: vec![f64::NAN; n],
        };
    }
    let bands = rust_ti::candle_indicators::bulk::moving_constant_bands(
        values,
        rust_ti::ConstantModelType::SimpleMovingAverage,
        rust_ti::DeviationModel::StandardDeviation,
        std_mult,
        period,
    );
    let lower: Vec<f64> = bands.iter().map(|t| t.0).collect();
    let middle: Vec<f64> = bands.iter().map(|t| t.1).collect();
    let upper: Vec<f64> = bands.iter().map(|t| t.2).collect();
    BandsOutput {
        upper: pad_series(&upper, n),
        middle: pad_series(&middle, n),
        lower: pad_series(&lower, n),
    }
}

/// Average true range over a rolling window.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    if period == 0 || n < period {
        return vec![f64::NAN; n];
    }
    let values: Vec<f64> = (0..=n - period)
        .map(|i| {
            let end = i + period;
            rust_ti::other_indicators::single::average_true_range(
                &close[i..end],
                &high[i..end],
                &low[i..end],
                rust_ti::ConstantModelType::SimpleMovingAverage,
            )
        })
        .collect();
    pad_series(&values, n)
}

/// Normalized ATR: `100 * ATR / close`.
pub fn natr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    atr(high, low, close, period)
        .iter()
        .zip(close.iter())
        .map(|(a, c)| if *c > 0.0 { 100.0 * a / c } else { f64::NAN })
        .collect()
}
