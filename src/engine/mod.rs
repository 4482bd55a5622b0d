pub mod backtester;
pub mod criteria;
pub mod deep;
pub mod metrics;
pub mod regime;
pub mod strategy;
pub mod types;

use crate::indicators::{trend, volatility};
use types::CandleSeries;

/// Average ATR(14) and ADX(14) over the series; part of the heavy metrics
/// computed for top-ranked results only.
pub fn volatility_context(series: &CandleSeries) -> (f64, f64) {
    let atr = volatility::atr(&series.high, &series.low, &series.close, 14);
    let adx = trend::adx(&series.high, &series.low, &series.close, 14);
    (mean_finite(&atr), mean_finite(&adx))
}

fn mean_finite(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return 0.0;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::make_series;

    #[test]
    fn volatility_context_positive_on_real_bars() {
        let bars: Vec<(i64, f64, f64, f64, f64)> = (0..80)
            .map(|i| {
                let p = 100.0 + (i as f64 * 0.3).sin() * 5.0;
                (i64::from(i) * 86_400_000, p, p + 2.0, p - 2.0, p + 0.5)
            })
            .collect();
        let series = make_series(&bars);
        let (avg_atr, avg_adx) = volatility_context(&series);
        assert!(avg_atr > 0.0);
        assert!(avg_adx >= 0.0);
    }
}
