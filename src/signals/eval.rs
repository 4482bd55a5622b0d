//! Vectorized expression evaluation over a bound column set.
//!
//! Boolean connectives are element-wise over full-length masks. NaN in any
//! numeric operand makes the affected comparison false for that bar.

use std::sync::Arc;

use crate::error::EngineError;
use crate::indicators::ColumnSet;

use super::ast::{CmpOp, Expr};

enum Value {
    Series(Arc<Vec<f64>>),
    Scalar(f64),
    Mask(Vec<bool>),
}

/// Evaluate a bound expression to a boolean mask of the column length.
pub fn evaluate_mask(expr: &Expr, columns: &ColumnSet) -> Result<Vec<bool>, EngineError> {
    match eval(expr, columns)? {
        Value::Mask(mask) => Ok(mask),
        Value::Scalar(_) | Value::Series(_) => Err(EngineError::ExpressionBind(
            "expression is numeric, not boolean; add a comparison".into(),
        )),
    }
}

fn eval(expr: &Expr, columns: &ColumnSet) -> Result<Value, EngineError> {
    let n = columns.len();
    match expr {
        Expr::Number(v) => Ok(Value::Scalar(*v)),
        Expr::Column(name) => match columns.get(name) {
            Some(series) => Ok(Value::Series(Arc::clone(series))),
            None => Err(EngineError::ExpressionBind(format!(
                "unbound column: {name}"
            ))),
        },
        Expr::Cmp { op, lhs, rhs } => {
            let lhs = eval_numeric(lhs, columns)?;
            let rhs = eval_numeric(rhs, columns)?;
            let mut mask = vec![false; n];
            for (i, m) in mask.iter_mut().enumerate() {
                let a = numeric_at(&lhs, i);
                let b = numeric_at(&rhs, i);
                if a.is_nan() || b.is_nan() {
                    continue;
                }
                *m = match op {
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Eq => (a - b).abs() < f64::EPSILON,
                    CmpOp::Ne => (a - b).abs() >= f64::EPSILON,
                };
            }
            Ok(Value::Mask(mask))
        }
        Expr::And(lhs, rhs) => {
            let a = eval_mask_operand(lhs, columns)?;
            let b = eval_mask_operand(rhs, columns)?;
            Ok(Value::Mask(
                a.iter().zip(b.iter()).map(|(x, y)| *x && *y).collect(),
            ))
        }
        Expr::Or(lhs, rhs) => {
            let a = eval_mask_operand(lhs, columns)?;
            let b = eval_mask_operand(rhs, columns)?;
            Ok(Value::Mask(
                a.iter().zip(b.iter()).map(|(x, y)| *x || *y).collect(),
            ))
        }
        Expr::Not(inner) => {
            let mask = eval_mask_operand(inner, columns)?;
            Ok(Value::Mask(mask.iter().map(|v| !v).collect()))
        }
        Expr::Crossover(a, b) => {
            let a = eval_numeric(a, columns)?;
            let b = eval_numeric(b, columns)?;
            let mut mask = vec![false; n];
            for i in 1..n {
                let (a0, a1) = (numeric_at(&a, i - 1), numeric_at(&a, i));
                let (b0, b1) = (numeric_at(&b, i - 1), numeric_at(&b, i));
                if a0.is_nan() || a1.is_nan() || b0.is_nan() || b1.is_nan() {
                    continue;
                }
                mask[i] = a0 <= b0 && a1 > b1;
            }
            Ok(Value::Mask(mask))
        }
        Expr::Crossunder(a, b) => {
            let a = eval_numeric(a, columns)?;
            let b = eval_numeric(b, columns)?;
            let mut mask = vec![false; n];
            for i in 1..n {
                let (a0, a1) = (numeric_at(&a, i - 1), numeric_at(&a, i));
                let (b0, b1) = (numeric_at(&b, i - 1), numeric_at(&b, i));
                if a0.is_nan() || a1.is_nan() || b0.is_nan() || b1.is_nan() {
                    continue;
                }
                mask[i] = a0 >= b0 && a1 < b1;
            }
            Ok(Value::Mask(mask))
        }
        Expr::Above { a, b, periods } => rolling_all(columns, a, b, *periods, true),
        Expr::Below { a, b, periods } => rolling_all(columns, a, b, *periods, false),
    }
}

fn rolling_all(
    columns: &ColumnSet,
    a: &Expr,
    b: &Expr,
    periods: usize,
    above: bool,
) -> Result<Value, EngineError> {
    let n = columns.len();
    let a = eval_numeric(a, columns)?;
    let b = eval_numeric(b, columns)?;
    let periods = periods.max(1);

    let per_bar: Vec<bool> = (0..n)
        .map(|i| {
            let x = numeric_at(&a, i);
            let y = numeric_at(&b, i);
            if x.is_nan() || y.is_nan() {
                false
            } else if above {
                x > y
            } else {
                x < y
            }
        })
        .collect();

    let mut mask = vec![false; n];
    let mut run = 0usize;
    for i in 0..n {
        if per_bar[i] {
            run += 1;
        } else {
            run = 0;
        }
        mask[i] = run >= periods;
    }
    Ok(Value::Mask(mask))
}

fn eval_numeric(expr: &Expr, columns: &ColumnSet) -> Result<Value, EngineError> {
    match eval(expr, columns)? {
        Value::Mask(_) => Err(EngineError::ExpressionBind(
            "expected a numeric operand, found a boolean subexpression".into(),
        )),
        v => Ok(v),
    }
}

fn eval_mask_operand(expr: &Expr, columns: &ColumnSet) -> Result<Vec<bool>, EngineError> {
    match eval(expr, columns)? {
        Value::Mask(mask) => Ok(mask),
        Value::Series(_) | Value::Scalar(_) => Err(EngineError::ExpressionBind(
            "boolean connective applied to a numeric operand; add a comparison".into(),
        )),
    }
}

fn numeric_at(v: &Value, i: usize) -> f64 {
    match v {
        Value::Series(s) => s[i],
        Value::Scalar(x) => *x,
        Value::Mask(_) => f64::NAN,
    }
}
