//! Static helpers mirroring the N1QL-specific query functions.
//!
//! These build call expressions for methods that have no natural receiver, such as
//! the document key accessor or `MISSING` tests.

use crate::{
    expression::{Expr, IntoExpr},
    method::{self, MethodInfo},
};

/// `META(doc).id`
pub fn key(document: impl IntoExpr) -> Expr {
    Expr::call(method::key(), None, [document.into_expr()])
}

/// `META(doc)`
pub fn meta(document: impl IntoExpr) -> Expr {
    Expr::call(method::meta(), None, [document.into_expr()])
}

/// `expr IS MISSING`
pub fn is_missing(expr: impl IntoExpr) -> Expr {
    Expr::call(method::is_missing(), None, [expr.into_expr()])
}

/// `expr IS NOT MISSING`
pub fn is_not_missing(expr: impl IntoExpr) -> Expr {
    Expr::call(method::is_not_missing(), None, [expr.into_expr()])
}

/// `expr IS VALUED`
pub fn is_valued(expr: impl IntoExpr) -> Expr {
    Expr::call(method::is_valued(), None, [expr.into_expr()])
}

/// `expr IS NOT VALUED`
pub fn is_not_valued(expr: impl IntoExpr) -> Expr {
    Expr::call(method::is_not_valued(), None, [expr.into_expr()])
}

/// `Math.<name>(value)`, e.g. `math("Abs", x)`.
pub fn math(name: &str, value: impl IntoExpr) -> Expr {
    Expr::call(method::math(name), None, [value.into_expr()])
}

/// `POWER(base, exponent)`
pub fn pow(base: impl IntoExpr, exponent: impl IntoExpr) -> Expr {
    Expr::call(method::math_pow(), None, [base.into_expr(), exponent.into_expr()])
}

/// `ROUND(value, digits)`
pub fn round_to(value: impl IntoExpr, digits: impl IntoExpr) -> Expr {
    Expr::call(method::math_round_digits(), None, [value.into_expr(), digits.into_expr()])
}

/// Calls an application-defined method, typically one mapped to a N1QL function.
pub fn call(method: MethodInfo, args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::call(method, None, args)
}
