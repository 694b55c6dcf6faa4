//! Canonicalization of expressions before rendering.
//!
//! The normalizer applies a fixed set of rewrite rules bottom-up. Each rule is a no-op
//! when the node does not have its shape, no rule fails, and the rules never enable one
//! another in a way that needs a second pass, so normalizing twice gives the same tree.
//!
//! - Date comparisons: both operands of a comparison involving a date are converted to
//!   Unix milliseconds, unless one side is a literal null.
//! - Enum comparisons: `Convert(e) == 2` becomes `e == Enum(2)` when `2` is a defined value.
//! - String comparisons: `String.Compare(a, b) <op> k` folds into a single comparison of
//!   `a` and `b`, or into a constant.
//! - Projected members: `new { X = e }.X` becomes `e`.
//! - Group keys: `g.Key` becomes the grouping key expression.
//! - Date orderings: sorting by a date member sorts by its millisecond value.

use tracing::trace;

use crate::{
    convert::{SerializationConverter, UnixMillisecondsConverter},
    expression::{BinaryOp, ComparisonOp, Expr, UnaryOp},
    method,
    query::{BodyClause, GroupByClause, QueryModel},
};

const TARGET: &str = "n1ql_linq::normalize";

/// Normalizes every expression of a query model.
pub fn normalize_query_model(model: QueryModel) -> QueryModel {
    let group_keys: Vec<GroupByClause> = model
        .body_clauses
        .iter()
        .filter_map(|clause| match clause {
            BodyClause::GroupBy(clause) => Some(clause.clone()),
            _ => None,
        })
        .collect();

    let mut model = model.transform_expressions(&mut |expr| {
        let expr = flatten_group_key(expr, &group_keys);
        rewrite(expr)
    });

    for clause in &mut model.body_clauses {
        if let BodyClause::OrderBy(orderings) = clause {
            for ordering in orderings.iter_mut() {
                let expr = std::mem::replace(&mut ordering.expr, Expr::constant(false));
                ordering.expr = normalize_ordering(expr);
            }
        }
    }

    model
}

/// Normalizes a standalone expression.
pub fn normalize_expression(expr: Expr) -> Expr {
    expr.transform(&mut rewrite)
}

fn rewrite(expr: Expr) -> Expr {
    let expr = project_member(expr);
    let expr = fold_string_compare(expr);
    let expr = align_enum_comparison(expr);
    convert_date_comparison(expr)
}

/// Sorting by a date member (or a value converted back from storage) sorts by millis.
fn normalize_ordering(expr: Expr) -> Expr {
    let is_candidate = matches!(expr, Expr::Member { .. } | Expr::Conversion { .. })
        && expr.ty().is_date_like();

    if is_candidate {
        trace!(target: TARGET, rule = "date_ordering", "converting ordering to unix milliseconds");
        UnixMillisecondsConverter.wrap_to(expr)
    } else {
        expr
    }
}

fn flatten_group_key(expr: Expr, groups: &[GroupByClause]) -> Expr {
    match expr {
        Expr::Member { target, member } if member.name == "Key" => {
            let group = match target.as_ref() {
                Expr::QuerySource(source) => groups.iter().find(|group| group.source.id == source.id),
                _ => None,
            };
            match group {
                Some(group) => {
                    trace!(target: TARGET, rule = "group_key", group = %group.source.name, "flattening group key");
                    group.key.clone()
                }
                None => Expr::Member { target, member },
            }
        }
        other => other,
    }
}

fn project_member(expr: Expr) -> Expr {
    match expr {
        Expr::Member { target, member } => match *target {
            Expr::New { mut members } => match members.iter().position(|(name, _)| *name == member.name) {
                Some(index) => {
                    trace!(target: TARGET, rule = "projected_member", member = %member.name, "resolving projected member");
                    members.swap_remove(index).1
                }
                None => Expr::Member { target: Box::new(Expr::New { members }), member },
            },
            target => Expr::Member { target: Box::new(target), member },
        },
        other => other,
    }
}

fn convert_date_comparison(expr: Expr) -> Expr {
    match expr {
        Expr::Binary { op, left, right }
            if op.is_comparison()
                && (left.ty().is_date_like() || right.ty().is_date_like())
                && !left.is_null_constant()
                && !right.is_null_constant() =>
        {
            trace!(target: TARGET, rule = "date_comparison", "converting date comparison to unix milliseconds");
            let converter = UnixMillisecondsConverter;
            Expr::Binary {
                op,
                left: Box::new(converter.wrap_to(*left)),
                right: Box::new(converter.wrap_to(*right)),
            }
        }
        other => other,
    }
}

/// For `Convert(e) <op> k` with `k` a defined value of `e`'s enum, returns `e` and the
/// enum constant for `k`.
fn enum_operand(converted: &Expr, constant: &Expr) -> Option<(Expr, Expr)> {
    let Expr::Unary { op: UnaryOp::Convert, operand, ty } = converted else {
        return None;
    };
    let enum_type = operand.ty().enum_type().cloned()?;
    let value = constant.as_constant()?.value.as_i64()?;

    if !ty.is_numeric() || enum_type.name_of(value).is_none() {
        return None;
    }

    Some((operand.as_ref().clone(), Expr::enum_constant(&enum_type, value)))
}

fn align_enum_comparison(expr: Expr) -> Expr {
    let Expr::Binary { op: op @ (BinaryOp::Equal | BinaryOp::NotEqual), left, right } = expr else {
        return expr;
    };

    if let Some((operand, constant)) = enum_operand(&left, &right) {
        trace!(target: TARGET, rule = "enum_comparison", "aligning enum comparison");
        return Expr::binary(op, operand, constant);
    }
    if let Some((operand, constant)) = enum_operand(&right, &left) {
        trace!(target: TARGET, rule = "enum_comparison", "aligning enum comparison");
        return Expr::binary(op, constant, operand);
    }

    Expr::Binary { op, left, right }
}

enum Folded {
    Constant(bool),
    Compare(ComparisonOp),
}

/// `Compare(a, b) <op> k`, knowing that `Compare` returns -1, 0 or 1.
fn fold(op: ComparisonOp, k: i64) -> Folded {
    use ComparisonOp::*;

    match op {
        LessThan => match k {
            k if k <= -1 => Folded::Constant(false),
            0 => Folded::Compare(LessThan),
            1 => Folded::Compare(LessThanOrEqual),
            _ => Folded::Constant(true),
        },
        LessThanOrEqual => match k {
            k if k < -1 => Folded::Constant(false),
            -1 => Folded::Compare(LessThan),
            0 => Folded::Compare(LessThanOrEqual),
            _ => Folded::Constant(true),
        },
        GreaterThan => match k {
            k if k >= 1 => Folded::Constant(false),
            0 => Folded::Compare(GreaterThan),
            -1 => Folded::Compare(GreaterThanOrEqual),
            _ => Folded::Constant(true),
        },
        GreaterThanOrEqual => match k {
            k if k > 1 => Folded::Constant(false),
            1 => Folded::Compare(GreaterThan),
            0 => Folded::Compare(GreaterThanOrEqual),
            _ => Folded::Constant(true),
        },
        Equal => match k {
            -1 => Folded::Compare(LessThan),
            0 => Folded::Compare(Equal),
            1 => Folded::Compare(GreaterThan),
            _ => Folded::Constant(false),
        },
        NotEqual => match k {
            -1 => Folded::Compare(GreaterThanOrEqual),
            0 => Folded::Compare(NotEqual),
            1 => Folded::Compare(LessThanOrEqual),
            _ => Folded::Constant(true),
        },
    }
}

/// Returns the operands of a `String.Compare(a, b)` or `a.CompareTo(b)` call.
fn compare_operands(expr: &Expr) -> Option<(&Expr, &Expr)> {
    let Expr::Call { target, method: called, args } = expr else {
        return None;
    };

    if called.signature == method::string_compare().signature {
        match args.as_slice() {
            [left, right] => Some((left, right)),
            _ => None,
        }
    } else if called.signature == method::string_compare_to().signature {
        match (target.as_deref(), args.as_slice()) {
            (Some(left), [right]) => Some((left, right)),
            _ => None,
        }
    } else {
        None
    }
}

fn constant_int(expr: &Expr) -> Option<i64> {
    expr.as_constant().and_then(|constant| constant.value.as_i64())
}

fn fold_string_compare(expr: Expr) -> Expr {
    let operands = match &expr {
        Expr::Binary { op, left, right } => op.comparison().and_then(|comparison| {
            if let (Some((a, b)), Some(k)) = (compare_operands(left), constant_int(right)) {
                Some((a.clone(), b.clone(), k, comparison))
            } else if let (Some((a, b)), Some(k)) = (compare_operands(right), constant_int(left)) {
                Some((a.clone(), b.clone(), k, comparison.flipped()))
            } else {
                None
            }
        }),
        _ => None,
    };
    let Some((left, right, k, comparison)) = operands else {
        return expr;
    };

    trace!(target: TARGET, rule = "string_compare", k, "folding string comparison");
    match fold(comparison, k) {
        Folded::Constant(value) => Expr::constant(value),
        Folded::Compare(op) => Expr::StringComparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}
