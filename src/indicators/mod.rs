//! Indicator library and the column-binding contract with the signal
//! engine: every configured indicator materializes one or more named
//! series, and conventional names (`RSI_14`) referencing a differently
//! parameterized instance are transparently redirected when unambiguous.

pub mod helpers;
pub mod momentum;
pub mod overlap;
pub mod trend;
pub mod volatility;
pub mod volume;

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::engine::types::CandleSeries;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Ema,
    Sma,
    Wma,
    Dema,
    Tema,
    Hma,
    Rsi,
    Stoch,
    Macd,
    Bbands,
    Atr,
    Natr,
    Adx,
    Roc,
    Cci,
    Willr,
    Mfi,
    Obv,
    Cmf,
    Vwap,
    VolumeSma,
}

impl IndicatorKind {
    /// Conventional column prefix for unaliased instances.
    pub fn prefix(self) -> &'static str {
        match self {
            IndicatorKind::Ema => "EMA",
            IndicatorKind::Sma => "SMA",
            IndicatorKind::Wma => "WMA",
            IndicatorKind::Dema => "DEMA",
            IndicatorKind::Tema => "TEMA",
            IndicatorKind::Hma => "HMA",
            IndicatorKind::Rsi => "RSI",
            IndicatorKind::Stoch => "STOCH",
            IndicatorKind::Macd => "MACD",
            IndicatorKind::Bbands => "BB",
            IndicatorKind::Atr => "ATR",
            IndicatorKind::Natr => "NATR",
            IndicatorKind::Adx => "ADX",
            IndicatorKind::Roc => "ROC",
            IndicatorKind::Cci => "CCI",
            IndicatorKind::Willr => "WILLR",
            IndicatorKind::Mfi => "MFI",
            IndicatorKind::Obv => "OBV",
            IndicatorKind::Cmf => "CMF",
            IndicatorKind::Vwap => "VWAP",
            IndicatorKind::VolumeSma => "VOL_SMA",
        }
    }

    fn default_length(self) -> usize {
        match self {
            IndicatorKind::Ema => 9,
            IndicatorKind::Rsi
            | IndicatorKind::Atr
            | IndicatorKind::Natr
            | IndicatorKind::Adx
            | IndicatorKind::Willr
            | IndicatorKind::Mfi => 14,
            _ => 20,
        }
    }

    /// The parameter a bare-alias override targets.
    pub fn primary_length_key(self) -> &'static str {
        match self {
            IndicatorKind::Macd => "fast",
            IndicatorKind::Stoch => "k",
            _ => "length",
        }
    }
}

/// One configured indicator instance. `params` keys depend on the kind:
/// `length` for most, `fast`/`slow`/`signal` for MACD, `k`/`d` for
/// stochastic, `length`/`std` for Bollinger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSpec {
    pub kind: IndicatorKind,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

impl IndicatorSpec {
    pub fn new(kind: IndicatorKind, alias: Option<&str>) -> Self {
        Self {
            kind,
            alias: alias.map(str::to_string),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: f64) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    fn param_usize(&self, key: &str, default: usize) -> usize {
        self.params
            .get(key)
            .map_or(default, |v| v.round().max(0.0) as usize)
    }

    fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }

    pub fn length(&self) -> usize {
        self.param_usize("length", self.kind.default_length())
    }

    /// Longest lookback this instance needs; used for degenerate-parameter
    /// detection against the candle count.
    fn max_lookback(&self) -> usize {
        match self.kind {
            IndicatorKind::Macd => {
                self.param_usize("slow", 26) + self.param_usize("signal", 9)
            }
            IndicatorKind::Stoch => self.param_usize("k", 14) + self.param_usize("d", 3),
            IndicatorKind::Adx => 2 * self.length(),
            IndicatorKind::Obv | IndicatorKind::Vwap => 2,
            _ => self.length(),
        }
    }

    /// Column this instance's primary output binds to.
    pub fn primary_column(&self) -> String {
        if let Some(alias) = &self.alias {
            if matches!(
                self.kind,
                IndicatorKind::Macd | IndicatorKind::Bbands | IndicatorKind::Stoch
            ) {
                return match self.kind {
                    IndicatorKind::Macd => format!("{alias}_macd"),
                    IndicatorKind::Bbands => format!("{alias}_middle"),
                    _ => format!("{alias}_k"),
                };
            }
            return alias.clone();
        }
        match self.kind {
            IndicatorKind::Macd => format!(
                "MACD_{}_{}_{}",
                self.param_usize("fast", 12),
                self.param_usize("slow", 26),
                self.param_usize("signal", 9)
            ),
            IndicatorKind::Bbands => format!(
                "BBM_{}_{}",
                self.length(),
                fmt_num(self.param_f64("std", 2.0))
            ),
            IndicatorKind::Stoch => format!(
                "STOCHk_{}_{}",
                self.param_usize("k", 14),
                self.param_usize("d", 3)
            ),
            IndicatorKind::Obv | IndicatorKind::Vwap => self.kind.prefix().to_string(),
            _ => format!("{}_{}", self.kind.prefix(), self.length()),
        }
    }

    /// All column names this instance materializes (conventional names
    /// first, alias names appended when an alias is configured).
    pub fn output_columns(&self) -> Vec<String> {
        let mut cols = self.conventional_columns();
        if let Some(alias) = &self.alias {
            match self.kind {
                IndicatorKind::Macd => {
                    cols.push(format!("{alias}_macd"));
                    cols.push(format!("{alias}_signal"));
                    cols.push(format!("{alias}_histogram"));
                }
                IndicatorKind::Bbands => {
                    cols.push(format!("{alias}_upper"));
                    cols.push(format!("{alias}_middle"));
                    cols.push(format!("{alias}_lower"));
                }
                IndicatorKind::Stoch => {
                    cols.push(format!("{alias}_k"));
                    cols.push(format!("{alias}_d"));
                }
                _ => cols.push(alias.clone()),
            }
        }
        cols
    }

    fn conventional_columns(&self) -> Vec<String> {
        match self.kind {
            IndicatorKind::Macd => {
                let (f, s, sig) = (
                    self.param_usize("fast", 12),
                    self.param_usize("slow", 26),
                    self.param_usize("signal", 9),
                );
                vec![
                    format!("MACD_{f}_{s}_{sig}"),
                    format!("MACDs_{f}_{s}_{sig}"),
                    format!("MACDh_{f}_{s}_{sig}"),
                ]
            }
            IndicatorKind::Bbands => {
                let (len, std) = (self.length(), fmt_num(self.param_f64("std", 2.0)));
                vec![
                    format!("BBL_{len}_{std}"),
                    format!("BBM_{len}_{std}"),
                    format!("BBU_{len}_{std}"),
                ]
            }
            IndicatorKind::Stoch => {
                let (k, d) = (self.param_usize("k", 14), self.param_usize("d", 3));
                vec![format!("STOCHk_{k}_{d}"), format!("STOCHd_{k}_{d}")]
            }
            IndicatorKind::Obv | IndicatorKind::Vwap => vec![self.kind.prefix().to_string()],
            _ => vec![format!("{}_{}", self.kind.prefix(), self.length())],
        }
    }
}

fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Named series shared between the indicator layer, the signal engine and
/// the optimizer's response payload.
#[derive(Debug, Clone, Default)]
pub struct ColumnSet {
    map: FxHashMap<String, Arc<Vec<f64>>>,
    len: usize,
}

impl ColumnSet {
    pub fn new(len: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Arc<Vec<f64>>) {
        debug_assert_eq!(values.len(), self.len);
        self.map.insert(name.into(), values);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Vec<f64>>> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.map.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Indicator columns only (everything except raw OHLCV).
    pub fn indicator_columns(&self) -> Vec<(&str, &Arc<Vec<f64>>)> {
        let mut out: Vec<(&str, &Arc<Vec<f64>>)> = self
            .map
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "open" | "high" | "low" | "close" | "volume"))
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        out.sort_unstable_by_key(|(k, _)| *k);
        out
    }
}

/// Compute every configured indicator over the candle series and return the
/// enriched column set (OHLCV plus indicator outputs).
pub fn build_columns(
    series: &CandleSeries,
    indicators: &[IndicatorSpec],
) -> Result<ColumnSet, EngineError> {
    let n = series.len();

    // Aliases must be unique across the template.
    let mut seen = std::collections::HashSet::new();
    for spec in indicators {
        if let Some(alias) = &spec.alias {
            if !seen.insert(alias.clone()) {
                return Err(EngineError::ParameterInvalid(format!(
                    "duplicate indicator alias: {alias}"
                )));
            }
        }
    }

    let mut columns = ColumnSet::new(n);
    columns.insert("open", Arc::new(series.open.clone()));
    columns.insert("high", Arc::new(series.high.clone()));
    columns.insert("low", Arc::new(series.low.clone()));
    columns.insert("close", Arc::new(series.close.clone()));
    columns.insert("volume", Arc::new(series.volume.clone()));

    for spec in indicators {
        let lookback = spec.max_lookback();
        if lookback == 0 || lookback >= n {
            return Err(EngineError::ParameterInvalid(format!(
                "{} lookback {lookback} is degenerate for {n} candles",
                spec.kind.prefix()
            )));
        }
        let outputs = compute_outputs(series, spec);
        let names = spec.output_columns();
        // Conventional names first, then alias names; both views share the
        // same buffers, so the alias block indexes modulo the output count.
        let shared: Vec<Arc<Vec<f64>>> = outputs.into_iter().map(Arc::new).collect();
        for (i, name) in names.iter().enumerate() {
            columns.insert(name.clone(), Arc::clone(&shared[i % shared.len()]));
        }
    }
    Ok(columns)
}

fn compute_outputs(series: &CandleSeries, spec: &IndicatorSpec) -> Vec<Vec<f64>> {
    let close = &series.close;
    let high = &series.high;
    let low = &series.low;
    let volume = &series.volume;
    match spec.kind {
        IndicatorKind::Ema => vec![overlap::ema(close, spec.length())],
        IndicatorKind::Sma => vec![overlap::sma(close, spec.length())],
        IndicatorKind::Wma => vec![overlap::wma(close, spec.length())],
        IndicatorKind::Dema => vec![overlap::dema(close, spec.length())],
        IndicatorKind::Tema => vec![overlap::tema(close, spec.length())],
        IndicatorKind::Hma => vec![overlap::hma(close, spec.length())],
        IndicatorKind::Rsi => vec![momentum::rsi(close, spec.length())],
        IndicatorKind::Stoch => {
            let k = momentum::stochastic_k(high, low, close, spec.param_usize("k", 14));
            let d = momentum::stochastic_d(&k, spec.param_usize("d", 3));
            vec![k, d]
        }
        IndicatorKind::Macd => {
            let out = momentum::macd(
                close,
                spec.param_usize("fast", 12),
                spec.param_usize("slow", 26),
                spec.param_usize("signal", 9),
            );
            vec![out.line, out.signal, out.histogram]
        }
        IndicatorKind::Bbands => {
            let out =
                volatility::bollinger(close, spec.length(), spec.param_f64("std", 2.0));
            vec![out.lower, out.middle, out.upper]
        }
        IndicatorKind::Atr => vec![volatility::atr(high, low, close, spec.length())],
        IndicatorKind::Natr => vec![volatility::natr(high, low, close, spec.length())],
        IndicatorKind::Adx => vec![trend::adx(high, low, close, spec.length())],
        IndicatorKind::Roc => vec![momentum::roc(close, spec.length())],
        IndicatorKind::Cci => vec![momentum::cci(high, low, close, spec.length())],
        IndicatorKind::Willr => vec![momentum::williams_r(high, low, close, spec.length())],
        IndicatorKind::Mfi => vec![momentum::mfi(high, low, close, volume, spec.length())],
        IndicatorKind::Obv => vec![volume::obv(close, volume)],
        IndicatorKind::Cmf => vec![volume::cmf(high, low, close, volume, spec.length())],
        IndicatorKind::Vwap => vec![overlap::vwap(high, low, close, volume)],
        IndicatorKind::VolumeSma => vec![overlap::volume_sma(volume, spec.length())],
    }
}

/// Resolve an expression identifier to a materialized column.
///
/// Exact hits bind directly. A conventional name whose parameters differ
/// from the configured instance (e.g. `RSI_14` while the template runs
/// `length=21`) redirects to the computed column when exactly one
/// indicator of that kind exists; with several instances only an exact
/// parameter match binds.
pub fn resolve_column(
    requested: &str,
    columns: &ColumnSet,
    indicators: &[IndicatorSpec],
) -> Option<String> {
    if columns.contains(requested) {
        return Some(requested.to_string());
    }

    // MACD family: MACD_<f>_<s>_<sig>, MACDs_..., MACDh_...
    if let Some(rest) = requested
        .strip_prefix("MACDs_")
        .map(|r| ("signal", r))
        .or_else(|| requested.strip_prefix("MACDh_").map(|r| ("histogram", r)))
        .or_else(|| requested.strip_prefix("MACD_").map(|r| ("macd", r)))
    {
        let (part, params) = rest;
        if is_numeric_parts(params, 3) {
            return redirect_multi(indicators, IndicatorKind::Macd, part, 0);
        }
    }

    // Bollinger family: BBL/BBM/BBU_<len>_<std>
    for (prefix, part, idx) in [("BBL_", "lower", 0usize), ("BBM_", "middle", 1), ("BBU_", "upper", 2)]
    {
        if let Some(params) = requested.strip_prefix(prefix) {
            if is_numeric_parts(params, 2) {
                return redirect_multi(indicators, IndicatorKind::Bbands, part, idx);
            }
        }
    }

    // Stochastic family: STOCHk/STOCHd_<k>_<d>
    for (prefix, part, idx) in [("STOCHk_", "k", 0usize), ("STOCHd_", "d", 1)] {
        if let Some(params) = requested.strip_prefix(prefix) {
            if is_numeric_parts(params, 2) {
                return redirect_multi(indicators, IndicatorKind::Stoch, part, idx);
            }
        }
    }

    // Single-output families: <PREFIX>_<len>
    let (prefix, suffix) = requested.rsplit_once('_')?;
    if suffix.parse::<u64>().is_err() {
        return None;
    }
    let kind = kind_from_prefix(prefix)?;
    let matching: Vec<&IndicatorSpec> = indicators.iter().filter(|s| s.kind == kind).collect();
    if matching.len() == 1 {
        return Some(matching[0].primary_column());
    }
    None
}

fn redirect_multi(
    indicators: &[IndicatorSpec],
    kind: IndicatorKind,
    alias_part: &str,
    conventional_idx: usize,
) -> Option<String> {
    let matching: Vec<&IndicatorSpec> = indicators.iter().filter(|s| s.kind == kind).collect();
    if matching.len() != 1 {
        return None;
    }
    let spec = matching[0];
    if let Some(alias) = &spec.alias {
        return Some(format!("{alias}_{alias_part}"));
    }
    spec.conventional_columns().get(conventional_idx).cloned()
}

fn is_numeric_parts(s: &str, expected: usize) -> bool {
    let parts: Vec<&str> = s.split('_').collect();
    parts.len() == expected && parts.iter().all(|p| p.parse::<f64>().is_ok())
}

fn kind_from_prefix(prefix: &str) -> Option<IndicatorKind> {
    Some(match prefix {
        "EMA" => IndicatorKind::Ema,
        "SMA" => IndicatorKind::Sma,
        "WMA" => IndicatorKind::Wma,
        "DEMA" => IndicatorKind::Dema,
        "TEMA" => IndicatorKind::Tema,
        "HMA" => IndicatorKind::Hma,
        "RSI" => IndicatorKind::Rsi,
        "ATR" => IndicatorKind::Atr,
        "NATR" => IndicatorKind::Natr,
        "ADX" => IndicatorKind::Adx,
        "ROC" => IndicatorKind::Roc,
        "CCI" => IndicatorKind::Cci,
        "WILLR" => IndicatorKind::Willr,
        "MFI" => IndicatorKind::Mfi,
        "CMF" => IndicatorKind::Cmf,
        "VOL_SMA" => IndicatorKind::VolumeSma,
        _ => return None,
    })
}
