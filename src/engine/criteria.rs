//! Go/no-go evaluation: hard thresholds a strategy must clear before it is
//! worth trading, plus soft warnings for borderline readings.

use serde::{Deserialize, Serialize};

use super::metrics::{BenchmarkMetrics, PerformanceMetrics};

/// Default thresholds for crypto swing trading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaConfig {
    /// NO-GO outright above this drawdown.
    pub critical_drawdown: f64,
    /// Acceptable drawdown ceiling.
    pub max_drawdown: f64,
    /// Warn when drawdown is inside this band below the ceiling.
    pub warning_drawdown: f64,
    pub min_sharpe: f64,
    pub min_calmar: f64,
    pub min_profit_factor: f64,
    pub min_expectancy: f64,
    pub min_trades: usize,
    pub max_trade_concentration: f64,
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            critical_drawdown: 0.45,
            max_drawdown: 0.35,
            warning_drawdown: 0.30,
            min_sharpe: 0.8,
            min_calmar: 1.0,
            min_profit_factor: 1.3,
            min_expectancy: 0.0,
            min_trades: 100,
            max_trade_concentration: 0.70,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoNoGo {
    Go,
    NoGo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaResult {
    pub status: GoNoGo,
    /// Failures when NO-GO; highlights when GO.
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn evaluate_go_nogo(
    metrics: &PerformanceMetrics,
    benchmark: &BenchmarkMetrics,
    criteria: &CriteriaConfig,
) -> CriteriaResult {
    let mut reasons: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let dd = metrics.max_drawdown;
    if dd > criteria.critical_drawdown {
        reasons.push(format!(
            "critical max drawdown: {:.1}% > {:.1}%",
            dd * 100.0,
            criteria.critical_drawdown * 100.0
        ));
    } else if dd > criteria.max_drawdown {
        reasons.push(format!(
            "excessive max drawdown: {:.1}% > {:.1}%",
            dd * 100.0,
            criteria.max_drawdown * 100.0
        ));
    }

    if metrics.sharpe < criteria.min_sharpe {
        reasons.push(format!(
            "sharpe too low: {:.2} < {:.2}",
            metrics.sharpe, criteria.min_sharpe
        ));
    }

    if metrics.trade_concentration > criteria.max_trade_concentration {
        reasons.push(format!(
            "profit concentrated in few trades: {:.0}% in top 10",
            metrics.trade_concentration * 100.0
        ));
    }

    if metrics.cagr <= benchmark.cagr {
        reasons.push(format!(
            "cagr does not beat buy & hold: {:.1}% <= {:.1}%",
            metrics.cagr * 100.0,
            benchmark.cagr * 100.0
        ));
    }

    if metrics.calmar < criteria.min_calmar {
        reasons.push(format!(
            "calmar too low: {:.2} < {:.2}",
            metrics.calmar, criteria.min_calmar
        ));
    }

    if metrics.profit_factor < criteria.min_profit_factor {
        reasons.push(format!(
            "profit factor too low: {:.2} < {:.2}",
            metrics.profit_factor, criteria.min_profit_factor
        ));
    }

    if metrics.expectancy <= criteria.min_expectancy {
        reasons.push(format!("expectancy not positive: {:.2}", metrics.expectancy));
    }

    if metrics.total_trades < criteria.min_trades {
        reasons.push(format!(
            "too few trades for statistical validity: {} < {}",
            metrics.total_trades, criteria.min_trades
        ));
    }

    // Warnings never flip the decision.
    if dd > criteria.warning_drawdown && dd <= criteria.max_drawdown {
        warnings.push(format!(
            "max drawdown close to the limit: {:.1}% (limit {:.1}%)",
            dd * 100.0,
            criteria.max_drawdown * 100.0
        ));
    }
    if metrics.calmar >= criteria.min_calmar && metrics.calmar < 1.5 {
        warnings.push(format!(
            "calmar acceptable but not excellent: {:.2} (excellent >= 1.5)",
            metrics.calmar
        ));
    }

    if reasons.is_empty() {
        let mut highlights = Vec::new();
        if metrics.cagr > benchmark.cagr {
            highlights.push(format!(
                "beats buy & hold by {:.1}%",
                (metrics.cagr - benchmark.cagr) * 100.0
            ));
        }
        highlights.push(format!(
            "drawdown within limits ({:.1}% <= {:.1}%)",
            dd * 100.0,
            criteria.max_drawdown * 100.0
        ));
        if metrics.calmar >= 1.5 {
            highlights.push(format!("excellent calmar ({:.2})", metrics.calmar));
        }
        if metrics.profit_factor >= 2.0 {
            highlights.push(format!(
                "excellent profit factor ({:.2})",
                metrics.profit_factor
            ));
        }
        return CriteriaResult {
            status: GoNoGo::Go,
            reasons: highlights,
            warnings,
        };
    }

    CriteriaResult {
        status: GoNoGo::NoGo,
        reasons,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing_metrics() -> PerformanceMetrics {
        PerformanceMetrics {
            total_return: 2.5,
            cagr: 0.60,
            sharpe: 1.4,
            sortino: 2.0,
            calmar: 2.0,
            max_drawdown: 0.20,
            total_trades: 150,
            win_rate: 0.55,
            profit_factor: 1.8,
            expectancy: 40.0,
            trade_concentration: 0.4,
            ..PerformanceMetrics::default()
        }
    }

    fn benchmark() -> BenchmarkMetrics {
        BenchmarkMetrics {
            return_pct: 1.0,
            cagr: 0.30,
            final_value: 20_000.0,
        }
    }

    #[test]
    fn healthy_strategy_is_go() {
        let r = evaluate_go_nogo(&passing_metrics(), &benchmark(), &CriteriaConfig::default());
        assert_eq!(r.status, GoNoGo::Go);
        assert!(!r.reasons.is_empty()); // highlights
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn critical_drawdown_is_nogo() {
        let mut m = passing_metrics();
        m.max_drawdown = 0.50;
        let r = evaluate_go_nogo(&m, &benchmark(), &CriteriaConfig::default());
        assert_eq!(r.status, GoNoGo::NoGo);
        assert!(r.reasons.iter().any(|s| s.contains("critical")));
    }

    #[test]
    fn losing_to_buy_and_hold_is_nogo() {
        let mut m = passing_metrics();
        m.cagr = 0.10;
        m.calmar = 0.10 / 0.20;
        let r = evaluate_go_nogo(&m, &benchmark(), &CriteriaConfig::default());
        assert_eq!(r.status, GoNoGo::NoGo);
        assert!(r.reasons.iter().any(|s| s.contains("buy & hold")));
    }

    #[test]
    fn too_few_trades_is_nogo() {
        let mut m = passing_metrics();
        m.total_trades = 12;
        let r = evaluate_go_nogo(&m, &benchmark(), &CriteriaConfig::default());
        assert_eq!(r.status, GoNoGo::NoGo);
    }

    #[test]
    fn warning_band_drawdown_still_go() {
        let mut m = passing_metrics();
        m.max_drawdown = 0.32;
        m.calmar = m.cagr / m.max_drawdown; // still > 1.5
        let r = evaluate_go_nogo(&m, &benchmark(), &CriteriaConfig::default());
        assert_eq!(r.status, GoNoGo::Go);
        assert!(r.warnings.iter().any(|s| s.contains("close to the limit")));
    }
}
