//! Declarative strategy templates and their compiled form.
//!
//! A template is data (indicator list + entry/exit logic + stops); compiling
//! parses both expressions once. Optimization parameter overrides are
//! applied by name against indicator aliases before compilation.

use std::collections::BTreeMap;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::engine::types::CandleSeries;
use crate::error::EngineError;
use crate::indicators::{build_columns, ColumnSet, IndicatorSpec};
use crate::signals::{self, ast::Expr};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StrategyTemplate {
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(skip)]
    pub indicators: Vec<IndicatorSpec>,
    #[garde(length(min = 1))]
    pub entry_logic: String,
    #[garde(length(min = 1))]
    pub exit_logic: String,
    /// Maximum adverse excursion from entry, in (0, 1).
    #[garde(range(min = 0.000_1, max = 0.999_9))]
    pub stop_loss: f64,
    #[serde(default)]
    #[garde(inner(range(min = 0.000_1, max = 0.999_9)))]
    pub stop_gain: Option<f64>,
}

impl StrategyTemplate {
    /// Apply optimizer parameter overrides, producing a concrete template.
    ///
    /// Matching rules, in order, for a parameter `key`:
    /// 1. `stop_loss` / `stop_gain` override the template stops.
    /// 2. `<alias>_<field>` sets `field` on the indicator with that alias.
    /// 3. `<kind>_<alias>` sets the primary length of that indicator.
    /// 4. A bare `<alias>` sets the primary length.
    ///
    /// Unmatched keys are a hard error: a silently ignored parameter would
    /// make every grid point in that dimension identical.
    pub fn with_params(
        &self,
        params: &BTreeMap<String, f64>,
    ) -> Result<StrategyTemplate, EngineError> {
        let mut out = self.clone();
        'params: for (key, value) in params {
            match key.as_str() {
                "stop_loss" => {
                    out.stop_loss = *value;
                    continue;
                }
                "stop_gain" => {
                    out.stop_gain = Some(*value);
                    continue;
                }
                _ => {}
            }

            for ind in &mut out.indicators {
                let Some(alias) = ind.alias.clone() else {
                    continue;
                };
                if let Some(field) = key.strip_prefix(&format!("{alias}_")) {
                    ind.params.insert(field.to_string(), *value);
                    continue 'params;
                }
                let kind_token = kind_token(ind);
                if *key == format!("{kind_token}_{alias}") || *key == alias {
                    let length_key = ind.kind.primary_length_key().to_string();
                    ind.params.insert(length_key, *value);
                    continue 'params;
                }
            }

            return Err(EngineError::ParameterInvalid(format!(
                "parameter '{key}' does not match any indicator alias in template '{}'",
                self.name
            )));
        }
        Ok(out)
    }

    /// Full effective parameter map (for result rows and logging).
    pub fn effective_params(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for ind in &self.indicators {
            let prefix = ind
                .alias
                .clone()
                .unwrap_or_else(|| kind_token(ind).to_string());
            for (k, v) in &ind.params {
                out.insert(format!("{prefix}_{k}"), *v);
            }
        }
        out.insert("stop_loss".to_string(), self.stop_loss);
        if let Some(sg) = self.stop_gain {
            out.insert("stop_gain".to_string(), sg);
        }
        out
    }
}

fn kind_token(ind: &IndicatorSpec) -> &'static str {
    match ind.kind {
        crate::indicators::IndicatorKind::Ema => "ema",
        crate::indicators::IndicatorKind::Sma => "sma",
        crate::indicators::IndicatorKind::Wma => "wma",
        crate::indicators::IndicatorKind::Dema => "dema",
        crate::indicators::IndicatorKind::Tema => "tema",
        crate::indicators::IndicatorKind::Hma => "hma",
        crate::indicators::IndicatorKind::Rsi => "rsi",
        crate::indicators::IndicatorKind::Stoch => "stoch",
        crate::indicators::IndicatorKind::Macd => "macd",
        crate::indicators::IndicatorKind::Bbands => "bbands",
        crate::indicators::IndicatorKind::Atr => "atr",
        crate::indicators::IndicatorKind::Natr => "natr",
        crate::indicators::IndicatorKind::Adx => "adx",
        crate::indicators::IndicatorKind::Roc => "roc",
        crate::indicators::IndicatorKind::Cci => "cci",
        crate::indicators::IndicatorKind::Willr => "willr",
        crate::indicators::IndicatorKind::Mfi => "mfi",
        crate::indicators::IndicatorKind::Obv => "obv",
        crate::indicators::IndicatorKind::Cmf => "cmf",
        crate::indicators::IndicatorKind::Vwap => "vwap",
        crate::indicators::IndicatorKind::VolumeSma => "volume_sma",
    }
}

/// Indicator columns plus the evaluated entry/exit masks for one series.
pub struct SignalFrame {
    pub columns: ColumnSet,
    pub entry: Vec<bool>,
    pub exit: Vec<bool>,
}

/// A template with its expressions parsed. Compilation happens once per
/// strategy instance; evaluation is per candle series.
pub struct Strategy {
    pub template: StrategyTemplate,
    entry: Expr,
    exit: Expr,
}

impl Strategy {
    pub fn compile(template: StrategyTemplate) -> Result<Self, EngineError> {
        let entry = signals::parse(&template.entry_logic)?;
        let exit = signals::parse(&template.exit_logic)?;
        Ok(Self {
            template,
            entry,
            exit,
        })
    }

    /// Enrich the series with indicator columns and evaluate both masks.
    pub fn evaluate(&self, series: &CandleSeries) -> Result<SignalFrame, EngineError> {
        let columns = build_columns(series, &self.template.indicators)?;
        let (entry, exit) = signals::entry_exit_masks(
            &self.entry,
            &self.exit,
            &columns,
            &self.template.indicators,
        )?;
        Ok(SignalFrame {
            columns,
            entry,
            exit,
        })
    }
}
