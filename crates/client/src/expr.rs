use arrow::array::ArrayRef;
use kflow_planner::{BinaryOp, Expr, FunctionOptionsRef, LiteralValue};

/// Builds a column-reference expression.
pub fn col(name: &str) -> Expr {
    Expr::Column(name.to_string())
}

/// Builds an `Int64` literal expression.
pub fn lit_i64(v: i64) -> Expr {
    Expr::Literal(LiteralValue::Int64(v))
}

/// Builds a `Float64` literal expression.
pub fn lit_f64(v: f64) -> Expr {
    Expr::Literal(LiteralValue::Float64(v))
}

/// Builds a boolean literal expression.
pub fn lit_bool(v: bool) -> Expr {
    Expr::Literal(LiteralValue::Boolean(v))
}

/// Builds a UTF-8 string literal expression.
pub fn lit_str(v: &str) -> Expr {
    Expr::Literal(LiteralValue::Utf8(v.to_string()))
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// Builds an equality expression (`left = right`).
pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::Eq, right)
}

/// Builds `left >= right`.
pub fn gt_eq(left: Expr, right: Expr) -> Expr {
    binary(left, BinaryOp::GtEq, right)
}

/// Builds a boolean AND expression.
pub fn and(left: Expr, right: Expr) -> Expr {
    Expr::And(Box::new(left), Box::new(right))
}

/// Builds a boolean OR expression.
pub fn or(left: Expr, right: Expr) -> Expr {
    Expr::Or(Box::new(left), Box::new(right))
}

pub fn not(expr: Expr) -> Expr {
    Expr::Not(Box::new(expr))
}

/// Membership of `expr` in `values`.
pub fn is_in(expr: Expr, values: ArrayRef) -> Expr {
    Expr::InList {
        expr: Box::new(expr),
        values,
        negated: false,
    }
}

/// Registry function call with optional options.
pub fn call(name: &str, args: Vec<Expr>, options: Option<FunctionOptionsRef>) -> Expr {
    Expr::ScalarFunction {
        name: name.to_string(),
        args,
        options,
    }
}
