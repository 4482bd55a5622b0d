// Volume studies: OBV, CMF.

use super::helpers::{pad_series, rolling_sum};

/// On-balance volume.
pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = close.len();
    if n < 2 {
        return vec![f64::NAN; n];
    }
    let values = rust_ti::momentum_indicators::bulk::on_balance_volume(close, volume, 0.0);
    pad_series(&values, n)
}

/// Chaikin money flow: rolling money-flow volume over rolling volume.
pub fn cmf(high: &[f64], low: &[f64], close: &[f64], volume: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    if period == 0 || n < period {
        return vec![f64::NAN; n];
    }
    let mfv: Vec<f64> = (0..n)
        .map(|i| {
            let range = high[i] - low[i];
            if range > 0.0 {
                ((close[i] - low[i]) - (high[i] - close[i])) / range * volume[i]
            } else {
                0.0
            }
        })
        .collect();
    let mfv_sum = rolling_sum(&mfv, period);
    let vol_sum = rolling_sum(volume, period);
    mfv_sum
        .iter()
        .zip(vol_sum.iter())
        .map(|(m, v)| if *v > 0.0 { m / v } else { f64::NAN })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obv_length_matches_input() {
        let close = vec![10.0, 11.0, 10.5, 11.5];
        let volume = vec![100.0, 200.0, 150.0, 250.0];
        let out = obv(&close, &volume);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn cmf_positive_when_closing_high() {
        // Closes pinned at the bar high -> full accumulation
        let n = 25;
        let high = vec![102.0; n];
        let low = vec![98.0; n];
        let close = vec![102.0; n];
        let volume = vec![1000.0; n];
        let out = cmf(&high, &low, &close, &volume, 20);
        assert!(out[10].is_nan());
        assert!((out[n - 1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn cmf_negative_when_closing_low() {
        let n = 25;
        let high = vec![102.0; n];
        let low = vec![98.0; n];
        let close = vec![98.0; n];
        let volume = vec![1000.0; n];
        let out = cmf(&high, &low, &close, &volume, 20);
        assert!((out[n - 1] + 1.0).abs() < 1e-10);
    }
}
