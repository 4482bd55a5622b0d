//! Signal engine: parse entry/exit logic into a tagged AST, bind column
//! references against the enriched column set (with conventional-name
//! redirection), and evaluate vectorized boolean masks.

pub mod ast;
pub mod eval;
pub mod parser;

use crate::error::EngineError;
use crate::indicators::{resolve_column, ColumnSet, IndicatorSpec};

use ast::Expr;

pub use eval::evaluate_mask;
pub use parser::parse;

/// Rewrite every column reference to a materialized column. Any identifier
/// that resolves to nothing is a bind error listing what IS available —
/// silent coercion to false is forbidden.
pub fn bind(
    expr: &Expr,
    columns: &ColumnSet,
    indicators: &[IndicatorSpec],
) -> Result<Expr, EngineError> {
    expr.map_columns(&|name: &str| {
        resolve_column(name, columns, indicators).ok_or_else(|| {
            let available = columns.names().join(", ");
            EngineError::ExpressionBind(format!(
                "logic references unknown column '{name}'; available columns: {available}"
            ))
        })
    })
}

/// Parse, bind, and evaluate both expressions in one pass.
pub fn entry_exit_masks(
    entry: &Expr,
    exit: &Expr,
    columns: &ColumnSet,
    indicators: &[IndicatorSpec],
) -> Result<(Vec<bool>, Vec<bool>), EngineError> {
    let entry_bound = bind(entry, columns, indicators)?;
    let exit_bound = bind(exit, columns, indicators)?;
    let entry_mask = evaluate_mask(&entry_bound, columns)?;
    let exit_mask = evaluate_mask(&exit_bound, columns)?;
    Ok((entry_mask, exit_mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::make_series;
    use crate::indicators::{build_columns, IndicatorKind};

    #[test]
    fn bind_redirects_conventional_rsi() {
        let bars: Vec<(i64, f64, f64, f64, f64)> = (0..60)
            .map(|i| {
                let p = 100.0 + (i as f64 * 0.4).sin() * 10.0;
                (i64::from(i) * 86_400_000, p, p + 1.0, p - 1.0, p)
            })
            .collect();
        let series = make_series(&bars);
        let specs =
            vec![IndicatorSpec::new(IndicatorKind::Rsi, None).with_param("length", 21.0)];
        let cols = build_columns(&series, &specs).unwrap();

        let expr = parse("RSI_14 < 30").unwrap();
        let bound = bind(&expr, &cols, &specs).unwrap();
        let mut ids = Vec::new();
        bound.identifiers(&mut ids);
        assert_eq!(ids, vec!["RSI_21".to_string()]);
    }

    #[test]
    fn bind_fails_fast_on_unknown_identifier() {
        let bars: Vec<(i64, f64, f64, f64, f64)> = (0..30)
            .map(|i| (i64::from(i) * 86_400_000, 100.0, 101.0, 99.0, 100.0))
            .collect();
        let series = make_series(&bars);
        let cols = build_columns(&series, &[]).unwrap();

        let expr = parse("bogus_column > 1").unwrap();
        let err = bind(&expr, &cols, &[]).unwrap_err();
        assert_eq!(err.code(), "expression_bind");
        assert!(err.to_string().contains("bogus_column"));
        assert!(err.to_string().contains("close"));
    }

    #[test]
    fn masks_align_to_series_length() {
        let bars: Vec<(i64, f64, f64, f64, f64)> = (0..50)
            .map(|i| {
                let p = 100.0 + i as f64;
                (i64::from(i) * 86_400_000, p, p + 1.0, p - 1.0, p + 0.5)
            })
            .collect();
        let series = make_series(&bars);
        let specs = vec![IndicatorSpec::new(IndicatorKind::Sma, Some("trend"))
            .with_param("length", 10.0)];
        let cols = build_columns(&series, &specs).unwrap();

        let entry = parse("close > trend").unwrap();
        let exit = parse("close < trend").unwrap();
        let (entry_mask, exit_mask) = entry_exit_masks(&entry, &exit, &cols, &specs).unwrap();
        assert_eq!(entry_mask.len(), 50);
        assert_eq!(exit_mask.len(), 50);
        // Rising series: entries fire once the SMA warms up, exits never
        assert!(entry_mask.iter().any(|&b| b));
        assert!(exit_mask.iter().all(|&b| !b));
    }
}
