// Trend studies: ADX (Wilder).

/// Average Directional Index. Warm-up is `2 * period - 1` bars.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < 2 * period {
        return out;
    }

    // True range and directional movement per bar (from bar 1).
    let mut tr = vec![0.0; n];
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        tr[i] = hl.max(hc).max(lc);

        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    // Wilder smoothing: seed with the first `period` sums.
    let mut tr_s: f64 = tr[1..=period].iter().sum();
    let mut plus_s: f64 = plus_dm[1..=period].iter().sum();
    let mut minus_s: f64 = minus_dm[1..=period].iter().sum();

    let mut dx = vec![f64::NAN; n];
    dx[period] = dx_value(plus_s, minus_s, tr_s);
    for i in (period + 1)..n {
        tr_s = tr_s - tr_s / period as f64 + tr[i];
        plus_s = plus_s - plus_s / period as f64 + plus_dm[i];
        minus_s = minus_s - minus_s / period as f64 + minus_dm[i];
        dx[i] = dx_value(plus_s, minus_s, tr_s);
    }

    // ADX: Wilder-smoothed DX, seeded with the mean of the first `period` DX.
    let seed_end = 2 * period - 1;
    let seed: f64 = dx[period..=seed_end].iter().sum::<f64>() / period as f64;
    out[seed_end] = seed;
    for i in (seed_end + 1)..n {
        out[i] = (out[i - 1] * (period as f64 - 1.0) + dx[i]) / period as f64;
    }
    out
}

fn dx_value(plus_s: f64, minus_s: f64, tr_s: f64) -> f64 {
    if tr_s <= 0.0 {
        return 0.0;
    }
    let plus_di = 100.0 * plus_s / tr_s;
    let minus_di = 100.0 * minus_s / tr_s;
    let sum = plus_di + minus_di;
    if sum <= 0.0 {
        return 0.0;
    }
    100.0 * (plus_di - minus_di).abs() / sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adx_high_in_strong_trend() {
        let n = 60;
        let high: Vec<f64> = (0..n).map(|i| 101.0 + i as f64 * 2.0).collect();
        let low: Vec<f64> = (0..n).map(|i| 99.0 + i as f64 * 2.0).collect();
        let close: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 2.0).collect();
        let out = adx(&high, &low, &close, 14);
        assert!(out[26].is_nan());
        assert!(out[27].is_finite());
        assert!(out[n - 1] > 60.0, "steady trend should read high, got {}", out[n - 1]);
    }

    #[test]
    fn adx_low_in_choppy_range() {
        let n = 80;
        let high: Vec<f64> = (0..n).map(|i| 101.0 + ((i % 2) as f64)).collect();
        let low: Vec<f64> = (0..n).map(|i| 99.0 - ((i % 2) as f64)).collect();
        let close: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 100.5 } else { 99.5 }).collect();
        let out = adx(&high, &low, &close, 14);
        assert!(out[n - 1] < 25.0, "range should read low, got {}", out[n - 1]);
    }

    #[test]
    fn adx_short_series_all_nan() {
        let data = vec![100.0; 10];
        let out = adx(&data, &data, &data, 14);
        assert!(out.iter().all(|v| v.is_nan()));
    }
}
