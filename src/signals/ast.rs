use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Tagged expression tree for entry/exit logic. Compiled once per strategy
/// instance and evaluated element-wise over aligned series; there is no
/// scalar short-circuit path by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Number(f64),
    Cmp {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// True at t iff `a[t-1] <= b[t-1] && a[t] > b[t]`.
    Crossover(Box<Expr>, Box<Expr>),
    /// True at t iff `a[t-1] >= b[t-1] && a[t] < b[t]`.
    Crossunder(Box<Expr>, Box<Expr>),
    /// True iff `a > b` held for each of the last `periods` bars.
    Above {
        a: Box<Expr>,
        b: Box<Expr>,
        periods: usize,
    },
    /// True iff `a < b` held for each of the last `periods` bars.
    Below {
        a: Box<Expr>,
        b: Box<Expr>,
        periods: usize,
    },
}

impl Expr {
    /// Collect every column identifier referenced by the expression.
    pub fn identifiers(&self, out: &mut Vec<String>) {
        match self {
            Expr::Column(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Number(_) => {}
            Expr::Cmp { lhs, rhs, .. }
            | Expr::And(lhs, rhs)
            | Expr::Or(lhs, rhs)
            | Expr::Crossover(lhs, rhs)
            | Expr::Crossunder(lhs, rhs) => {
                lhs.identifiers(out);
                rhs.identifiers(out);
            }
            Expr::Above { a, b, .. } | Expr::Below { a, b, .. } => {
                a.identifiers(out);
                b.identifiers(out);
            }
            Expr::Not(inner) => inner.identifiers(out),
        }
    }

    /// Rewrite column references through `f` (used for conventional-name
    /// redirection at bind time).
    pub fn map_columns<F>(&self, f: &F) -> Result<Expr, EngineError>
    where
        F: Fn(&str) -> Result<String, EngineError>,
    {
        Ok(match self {
            Expr::Column(name) => Expr::Column(f(name)?),
            Expr::Number(v) => Expr::Number(*v),
            Expr::Cmp { op, lhs, rhs } => Expr::Cmp {
                op: *op,
                lhs: Box::new(lhs.map_columns(f)?),
                rhs: Box::new(rhs.map_columns(f)?),
            },
            Expr::And(lhs, rhs) => Expr::And(
                Box::new(lhs.map_columns(f)?),
                Box::new(rhs.map_columns(f)?),
            ),
            Expr::Or(lhs, rhs) => Expr::Or(
                Box::new(lhs.map_columns(f)?),
                Box::new(rhs.map_columns(f)?),
            ),
            Expr::Not(inner) => Expr::Not(Box::new(inner.map_columns(f)?)),
            Expr::Crossover(lhs, rhs) => Expr::Crossover(
                Box::new(lhs.map_columns(f)?),
                Box::new(rhs.map_columns(f)?),
            ),
            Expr::Crossunder(lhs, rhs) => Expr::Crossunder(
                Box::new(lhs.map_columns(f)?),
                Box::new(rhs.map_columns(f)?),
            ),
            Expr::Above { a, b, periods } => Expr::Above {
                a: Box::new(a.map_columns(f)?),
                b: Box::new(b.map_columns(f)?),
                periods: *periods,
            },
            Expr::Below { a, b, periods } => Expr::Below {
                a: Box::new(a.map_columns(f)?),
                b: Box::new(b.map_columns(f)?),
                periods: *periods,
            },
        })
    }
}
