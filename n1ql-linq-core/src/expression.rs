//! The expression tree consumed by the normalizer and the renderer.
//!
//! [`Expr`] is a closed sum type covering the node kinds a LINQ-style query produces:
//! constants, query-source references, member access, unary and binary operators,
//! conditionals, method calls, anonymous-object construction and subqueries. Two node
//! kinds never come from user code directly: [`Expr::StringComparison`] is produced by
//! the normalizer when it folds `String.Compare` patterns, and [`Expr::Conversion`] marks
//! a value that must pass through a serialization converter when rendered.
//!
//! # Building expressions
//!
//! ```ignore
//! use n1ql_linq_core::expression::Expr;
//!
//! let beer = Expr::parameter("b", Beer::type_ref());
//! let predicate = beer.field("abv").gt(5.5).and(beer.field("name").starts_with("Old"));
//! ```

use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;

use crate::{
    method::{self, MethodInfo},
    query::{FromSource, MainFromClause, QueryModel, QuerySource, ResultOperator},
    types::{ConverterKind, EnumType, MemberInfo, ObjectType, TypeRef},
};

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    /// An enum value; rendered numerically unless a converter says otherwise.
    Enum {
        ty: Arc<EnumType>,
        value: i64,
    },
    Array(Vec<Value>),
}

impl Value {
    /// The natural static type of this value.
    pub fn natural_type(&self) -> TypeRef {
        match self {
            Value::Null => TypeRef::Dynamic,
            Value::Bool(_) => TypeRef::Bool,
            Value::Int(_) => TypeRef::Int32,
            Value::Double(_) => TypeRef::Double,
            Value::String(_) => TypeRef::String,
            Value::DateTime(_) => TypeRef::DateTime,
            Value::Enum { ty, .. } => TypeRef::Enum(ty.clone()),
            Value::Array(items) => TypeRef::collection_of(
                items
                    .first()
                    .map(Value::natural_type)
                    .unwrap_or(TypeRef::Dynamic),
            ),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Enum { value, .. } => Some(*value),
            Value::Double(value) if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

macro_rules! impl_value_from {
    ($variant:ident($target:ty) => $($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

impl_value_from!(Bool(bool) => bool);
impl_value_from!(Int(i64) => i8, i16, i32, i64, u8, u16, u32);
impl_value_from!(Double(f64) => f32, f64);
impl_value_from!(String(String) => String, &str, char);

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::DateTime(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value.fixed_offset())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

/// A literal together with its static type.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub value: Value,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    /// A type conversion; the target type is the node's type.
    Convert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    /// `a ?? b`
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        self.comparison().is_some()
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::AndAlso | BinaryOp::OrElse)
    }

    pub fn comparison(self) -> Option<ComparisonOp> {
        match self {
            BinaryOp::Equal => Some(ComparisonOp::Equal),
            BinaryOp::NotEqual => Some(ComparisonOp::NotEqual),
            BinaryOp::LessThan => Some(ComparisonOp::LessThan),
            BinaryOp::LessThanOrEqual => Some(ComparisonOp::LessThanOrEqual),
            BinaryOp::GreaterThan => Some(ComparisonOp::GreaterThan),
            BinaryOp::GreaterThanOrEqual => Some(ComparisonOp::GreaterThanOrEqual),
            _ => None,
        }
    }
}

/// The operation of a string ordering comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl ComparisonOp {
    /// The operator obtained by swapping the operands (`a < b` ⇔ `b > a`).
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::LessThan => ComparisonOp::GreaterThan,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::GreaterThan => ComparisonOp::LessThan,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThanOrEqual,
            other => other,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
        }
    }
}

impl From<ComparisonOp> for BinaryOp {
    fn from(op: ComparisonOp) -> Self {
        match op {
            ComparisonOp::Equal => BinaryOp::Equal,
            ComparisonOp::NotEqual => BinaryOp::NotEqual,
            ComparisonOp::LessThan => BinaryOp::LessThan,
            ComparisonOp::LessThanOrEqual => BinaryOp::LessThanOrEqual,
            ComparisonOp::GreaterThan => BinaryOp::GreaterThan,
            ComparisonOp::GreaterThanOrEqual => BinaryOp::GreaterThanOrEqual,
        }
    }
}

/// Direction of a serialization conversion placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionDirection {
    /// Application value → stored representation.
    To,
    /// Stored representation → application value.
    From,
}

/// A node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Constant),
    /// A free variable, rendered as an escaped identifier.
    Parameter {
        name: String,
        ty: TypeRef,
    },
    /// A reference to a range variable of the query model.
    QuerySource(QuerySource),
    Member {
        target: Box<Expr>,
        member: MemberInfo,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: TypeRef,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Call {
        target: Option<Box<Expr>>,
        method: MethodInfo,
        args: Vec<Expr>,
    },
    /// Anonymous object construction; member order is significant.
    New {
        members: Vec<(String, Expr)>,
    },
    /// Collection construction.
    Array {
        element: TypeRef,
        items: Vec<Expr>,
    },
    SubQuery(Box<QueryModel>),
    StringComparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conversion {
        direction: ConversionDirection,
        kind: ConverterKind,
        operand: Box<Expr>,
        ty: TypeRef,
    },
}

impl Expr {
    /// A constant whose type is inferred from the value.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.natural_type();
        Expr::Constant(Constant { value, ty })
    }

    pub fn typed_constant(value: impl Into<Value>, ty: TypeRef) -> Self {
        Expr::Constant(Constant { value: value.into(), ty })
    }

    pub fn null(ty: TypeRef) -> Self {
        Expr::Constant(Constant { value: Value::Null, ty: ty.nullable() })
    }

    pub fn enum_constant(ty: &Arc<EnumType>, value: i64) -> Self {
        Expr::Constant(Constant {
            value: Value::Enum { ty: ty.clone(), value },
            ty: TypeRef::Enum(ty.clone()),
        })
    }

    pub fn parameter(name: impl Into<String>, ty: TypeRef) -> Self {
        Expr::Parameter { name: name.into(), ty }
    }

    pub fn source(source: &QuerySource) -> Self {
        Expr::QuerySource(source.clone())
    }

    /// Builds an anonymous object. Member order is preserved in projections.
    pub fn new_object<N: Into<String>>(members: impl IntoIterator<Item = (N, Expr)>) -> Self {
        Expr::New {
            members: members
                .into_iter()
                .map(|(name, expr)| (name.into(), expr))
                .collect(),
        }
    }

    pub fn array(element: TypeRef, items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Array { element, items: items.into_iter().collect() }
    }

    pub fn call(method: MethodInfo, target: Option<Expr>, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Call {
            target: target.map(Box::new),
            method,
            args: args.into_iter().collect(),
        }
    }

    pub fn conditional(test: Expr, if_true: impl IntoExpr, if_false: impl IntoExpr) -> Self {
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true.into_expr()),
            if_false: Box::new(if_false.into_expr()),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    /// The static type of this expression.
    pub fn ty(&self) -> TypeRef {
        match self {
            Expr::Constant(constant) => constant.ty.clone(),
            Expr::Parameter { ty, .. } => ty.clone(),
            Expr::QuerySource(source) => source.item_type.clone(),
            Expr::Member { member, .. } => member.ty.clone(),
            Expr::Unary { ty, .. } => ty.clone(),
            Expr::Binary { op, left, right } => match op {
                op if op.is_comparison() || op.is_logical() => TypeRef::Bool,
                BinaryOp::Coalesce => right.ty(),
                _ => {
                    let left_ty = left.ty();
                    if left_ty.is_nullable() || !right.ty().is_nullable() {
                        left_ty
                    } else {
                        left_ty.nullable()
                    }
                }
            },
            Expr::Conditional { if_true, .. } => if_true.ty(),
            Expr::Call { method, .. } => method.return_type.clone(),
            Expr::New { members } => {
                let object = members
                    .iter()
                    .fold(ObjectType::builder("<>AnonymousType"), |builder, (name, expr)| {
                        builder.member(name.clone(), expr.ty())
                    });
                object.build_type()
            }
            Expr::Array { element, .. } => TypeRef::collection_of(element.clone()),
            Expr::SubQuery(model) => model.result_type(),
            Expr::StringComparison { .. } => TypeRef::Bool,
            Expr::Conversion { ty, .. } => ty.clone(),
        }
    }

    /// Returns the constant if this node is one.
    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expr::Constant(constant) => Some(constant),
            _ => None,
        }
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expr::Constant(Constant { value: Value::Null, .. }))
    }

    /// Returns the member info if this node is a member access.
    pub fn as_member(&self) -> Option<&MemberInfo> {
        match self {
            Expr::Member { member, .. } => Some(member),
            _ => None,
        }
    }

    /// Accesses a member by name.
    ///
    /// On an anonymous object this resolves to the expression bound to that name, so
    /// predicates written against a projection refer to the original expressions.
    /// Unknown members are accepted with a dynamic type; the name resolver decides how
    /// they are spelled.
    pub fn field(&self, name: &str) -> Expr {
        if let Expr::New { members } = self {
            if let Some((_, expr)) = members.iter().find(|(member, _)| member == name) {
                return expr.clone();
            }
        }

        let ty = self.ty();
        let member = ty
            .member(name)
            .cloned()
            .unwrap_or_else(|| MemberInfo::new(ty.name(), name, TypeRef::Dynamic));

        Expr::Member { target: Box::new(self.clone()), member }
    }

    /// Accesses a member with explicit member metadata.
    pub fn member(&self, member: MemberInfo) -> Expr {
        Expr::Member { target: Box::new(self.clone()), member }
    }

    /// `group.Key` on a grouping range variable.
    pub fn group_key(&self) -> Expr {
        let key_type = match self.ty() {
            TypeRef::Grouping { key, .. } => *key,
            _ => TypeRef::Dynamic,
        };

        self.member(MemberInfo::new(self.ty().name(), "Key", key_type))
    }

    pub fn eq(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::Equal, self.clone(), other.into_expr())
    }

    pub fn ne(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::NotEqual, self.clone(), other.into_expr())
    }

    pub fn lt(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::LessThan, self.clone(), other.into_expr())
    }

    pub fn le(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::LessThanOrEqual, self.clone(), other.into_expr())
    }

    pub fn gt(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::GreaterThan, self.clone(), other.into_expr())
    }

    pub fn ge(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::GreaterThanOrEqual, self.clone(), other.into_expr())
    }

    pub fn and(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::AndAlso, self.clone(), other.into_expr())
    }

    pub fn or(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::OrElse, self.clone(), other.into_expr())
    }

    pub fn add(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::Add, self.clone(), other.into_expr())
    }

    pub fn sub(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::Subtract, self.clone(), other.into_expr())
    }

    pub fn mul(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::Multiply, self.clone(), other.into_expr())
    }

    pub fn div(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::Divide, self.clone(), other.into_expr())
    }

    pub fn rem(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::Modulo, self.clone(), other.into_expr())
    }

    pub fn coalesce(&self, other: impl IntoExpr) -> Expr {
        Expr::binary(BinaryOp::Coalesce, self.clone(), other.into_expr())
    }

    pub fn not(&self) -> Expr {
        Expr::Unary { op: UnaryOp::Not, operand: Box::new(self.clone()), ty: TypeRef::Bool }
    }

    pub fn negate(&self) -> Expr {
        Expr::Unary { op: UnaryOp::Negate, operand: Box::new(self.clone()), ty: self.ty() }
    }

    pub fn convert(&self, ty: TypeRef) -> Expr {
        Expr::Unary { op: UnaryOp::Convert, operand: Box::new(self.clone()), ty }
    }

    /// String `Contains` on strings, `Enumerable.Contains` on collections.
    pub fn contains(&self, value: impl IntoExpr) -> Expr {
        if self.ty().is_collection() {
            Expr::call(method::enumerable_contains(), Some(self.clone()), [value.into_expr()])
        } else {
            Expr::call(method::string_contains(), Some(self.clone()), [value.into_expr()])
        }
    }

    pub fn starts_with(&self, value: impl IntoExpr) -> Expr {
        Expr::call(method::string_starts_with(), Some(self.clone()), [value.into_expr()])
    }

    pub fn ends_with(&self, value: impl IntoExpr) -> Expr {
        Expr::call(method::string_ends_with(), Some(self.clone()), [value.into_expr()])
    }

    pub fn to_upper(&self) -> Expr {
        Expr::call(method::string_to_upper(), Some(self.clone()), [])
    }

    pub fn to_lower(&self) -> Expr {
        Expr::call(method::string_to_lower(), Some(self.clone()), [])
    }

    pub fn trim(&self) -> Expr {
        Expr::call(method::string_trim(), Some(self.clone()), [])
    }

    /// `String.Length` on strings, `Count` on collections.
    pub fn length(&self) -> Expr {
        if self.ty().is_collection() {
            Expr::call(method::collection_count(), Some(self.clone()), [])
        } else {
            Expr::call(method::string_length(), Some(self.clone()), [])
        }
    }

    pub fn substring(&self, start: impl IntoExpr, length: Option<Expr>) -> Expr {
        match length {
            Some(length) => Expr::call(
                method::string_substring_with_length(),
                Some(self.clone()),
                [start.into_expr(), length],
            ),
            None => Expr::call(method::string_substring(), Some(self.clone()), [start.into_expr()]),
        }
    }

    pub fn index_of(&self, value: impl IntoExpr) -> Expr {
        Expr::call(method::string_index_of(), Some(self.clone()), [value.into_expr()])
    }

    pub fn replace(&self, from: impl IntoExpr, to: impl IntoExpr) -> Expr {
        Expr::call(
            method::string_replace(),
            Some(self.clone()),
            [from.into_expr(), to.into_expr()],
        )
    }

    pub fn split(&self, separator: impl IntoExpr) -> Expr {
        Expr::call(method::string_split(), Some(self.clone()), [separator.into_expr()])
    }

    /// `a.CompareTo(b)`
    pub fn compare_to(&self, other: impl IntoExpr) -> Expr {
        Expr::call(method::string_compare_to(), Some(self.clone()), [other.into_expr()])
    }

    /// `String.Compare(a, b)`
    pub fn string_compare(left: impl IntoExpr, right: impl IntoExpr) -> Expr {
        Expr::call(method::string_compare(), None, [left.into_expr(), right.into_expr()])
    }

    /// The `.Date` component of a date value.
    pub fn date(&self) -> Expr {
        Expr::call(method::datetime_date(), Some(self.clone()), [])
    }

    /// `Nullable<T>.HasValue`
    pub fn has_value(&self) -> Expr {
        Expr::call(method::nullable_has_value(), Some(self.clone()), [])
    }

    /// `collection.Any(x => predicate)`
    pub fn any(&self, predicate: impl FnOnce(&Expr) -> Expr) -> Expr {
        self.quantifier(Some(predicate), ResultOperator::Any)
    }

    /// `collection.Any()`
    pub fn any_item(&self) -> Expr {
        self.quantifier(None::<fn(&Expr) -> Expr>, ResultOperator::Any)
    }

    /// `collection.All(x => predicate)`
    pub fn all(&self, predicate: impl FnOnce(&Expr) -> Expr) -> Expr {
        let item = self.item_source();
        let condition = predicate(&Expr::source(&item));
        let model = QueryModel::new(
            MainFromClause { source: item.clone(), from: FromSource::Expr(self.clone()) },
            Expr::source(&item),
        )
        .with_result_operator(ResultOperator::All(condition));

        Expr::SubQuery(Box::new(model))
    }

    /// `group.Count()` or `collection.Count()`
    pub fn count(&self) -> Expr {
        self.aggregate(ResultOperator::Count, |item| item.clone())
    }

    /// `group.Sum(x => selector)`
    pub fn sum(&self, selector: impl FnOnce(&Expr) -> Expr) -> Expr {
        self.aggregate(ResultOperator::Sum, selector)
    }

    /// `group.Average(x => selector)`
    pub fn average(&self, selector: impl FnOnce(&Expr) -> Expr) -> Expr {
        self.aggregate(ResultOperator::Average, selector)
    }

    /// `group.Min(x => selector)`
    pub fn min(&self, selector: impl FnOnce(&Expr) -> Expr) -> Expr {
        self.aggregate(ResultOperator::Min, selector)
    }

    /// `group.Max(x => selector)`
    pub fn max(&self, selector: impl FnOnce(&Expr) -> Expr) -> Expr {
        self.aggregate(ResultOperator::Max, selector)
    }

    fn item_source(&self) -> QuerySource {
        let element = self.ty().element_type().cloned().unwrap_or(TypeRef::Dynamic);
        QuerySource::new("x", element)
    }

    fn quantifier(
        &self,
        predicate: Option<impl FnOnce(&Expr) -> Expr>,
        operator: ResultOperator,
    ) -> Expr {
        let item = self.item_source();
        let mut model = QueryModel::new(
            MainFromClause { source: item.clone(), from: FromSource::Expr(self.clone()) },
            Expr::source(&item),
        );

        if let Some(predicate) = predicate {
            model = model.with_where(predicate(&Expr::source(&item)));
        }

        Expr::SubQuery(Box::new(model.with_result_operator(operator)))
    }

    fn aggregate(&self, operator: ResultOperator, selector: impl FnOnce(&Expr) -> Expr) -> Expr {
        let item = self.item_source();
        let selected = selector(&Expr::source(&item));
        let model = QueryModel::new(
            MainFromClause { source: item, from: FromSource::Expr(self.clone()) },
            selected,
        )
        .with_result_operator(operator);

        Expr::SubQuery(Box::new(model))
    }

    /// Rebuilds the tree bottom-up, applying `f` to every node after its children.
    ///
    /// Subquery models are traversed as well, so rewrites reach nested predicates.
    pub fn transform(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let rebuilt = match self {
            Expr::Member { target, member } => Expr::Member {
                target: Box::new(target.transform(f)),
                member,
            },
            Expr::Unary { op, operand, ty } => Expr::Unary {
                op,
                operand: Box::new(operand.transform(f)),
                ty,
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(left.transform(f)),
                right: Box::new(right.transform(f)),
            },
            Expr::Conditional { test, if_true, if_false } => Expr::Conditional {
                test: Box::new(test.transform(f)),
                if_true: Box::new(if_true.transform(f)),
                if_false: Box::new(if_false.transform(f)),
            },
            Expr::Call { target, method, args } => Expr::Call {
                target: target.map(|target| Box::new(target.transform(f))),
                method,
                args: args.into_iter().map(|arg| arg.transform(f)).collect(),
            },
            Expr::New { members } => Expr::New {
                members: members
                    .into_iter()
                    .map(|(name, expr)| (name, expr.transform(f)))
                    .collect(),
            },
            Expr::Array { element, items } => Expr::Array {
                element,
                items: items.into_iter().map(|item| item.transform(f)).collect(),
            },
            Expr::SubQuery(model) => Expr::SubQuery(Box::new(model.transform_expressions(f))),
            Expr::StringComparison { op, left, right } => Expr::StringComparison {
                op,
                left: Box::new(left.transform(f)),
                right: Box::new(right.transform(f)),
            },
            Expr::Conversion { direction, kind, operand, ty } => Expr::Conversion {
                direction,
                kind,
                operand: Box::new(operand.transform(f)),
                ty,
            },
            leaf @ (Expr::Constant(_) | Expr::Parameter { .. } | Expr::QuerySource(_)) => leaf,
        };

        f(rebuilt)
    }

    /// Returns true if any node of the tree satisfies `predicate`.
    pub fn any_node(&self, predicate: &dyn Fn(&Expr) -> bool) -> bool {
        if predicate(self) {
            return true;
        }

        match self {
            Expr::Member { target, .. } => target.any_node(predicate),
            Expr::Unary { operand, .. } | Expr::Conversion { operand, .. } => operand.any_node(predicate),
            Expr::Binary { left, right, .. } | Expr::StringComparison { left, right, .. } => {
                left.any_node(predicate) || right.any_node(predicate)
            }
            Expr::Conditional { test, if_true, if_false } => {
                test.any_node(predicate) || if_true.any_node(predicate) || if_false.any_node(predicate)
            }
            Expr::Call { target, args, .. } => {
                target.as_ref().is_some_and(|target| target.any_node(predicate))
                    || args.iter().any(|arg| arg.any_node(predicate))
            }
            Expr::New { members } => members.iter().any(|(_, expr)| expr.any_node(predicate)),
            Expr::Array { items, .. } => items.iter().any(|item| item.any_node(predicate)),
            Expr::SubQuery(model) => model.any_expression(predicate),
            Expr::Constant(_) | Expr::Parameter { .. } | Expr::QuerySource(_) => false,
        }
    }

    /// Returns true if the expression references the given query source.
    pub fn references_source(&self, source_id: u32) -> bool {
        self.any_node(&|node| matches!(node, Expr::QuerySource(source) if source.id == source_id))
    }
}

/// Conversion into an expression, used by the fluent builder methods.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for &Expr {
    fn into_expr(self) -> Expr {
        self.clone()
    }
}

impl IntoExpr for Value {
    fn into_expr(self) -> Expr {
        Expr::constant(self)
    }
}

macro_rules! impl_into_expr {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl IntoExpr for $ty {
                fn into_expr(self) -> Expr {
                    Expr::constant(self)
                }
            }
        )+
    };
}

impl_into_expr!(bool, i8, i16, i32, i64, u8, u16, u32, f32, f64, String, &str, char);
impl_into_expr!(DateTime<Utc>, DateTime<FixedOffset>);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn beer() -> Expr {
        Expr::parameter(
            "b",
            ObjectType::builder("Beer")
                .member("name", TypeRef::String)
                .member("abv", TypeRef::Double)
                .member("tags", TypeRef::collection_of(TypeRef::String))
                .build_type(),
        )
    }

    #[rstest]
    fn test_field_resolves_member_metadata() {
        let abv = beer().field("abv");

        assert_eq!(abv.ty(), TypeRef::Double);
        assert_eq!(abv.as_member().map(|m| m.declaring_type.as_str()), Some("Beer"));
    }

    #[rstest]
    fn test_field_on_unknown_member_is_dynamic() {
        assert_eq!(beer().field("brewery_id").ty(), TypeRef::Dynamic);
    }

    #[rstest]
    fn test_field_on_anonymous_object_returns_bound_expression() {
        let projection = Expr::new_object([("title", beer().field("name"))]);

        assert_eq!(projection.field("title"), beer().field("name"));
    }

    #[rstest]
    #[case(beer().field("abv").gt(5.0), TypeRef::Bool)]
    #[case(beer().field("abv").add(1.0), TypeRef::Double)]
    #[case(beer().field("tags").contains("ipa"), TypeRef::Bool)]
    #[case(beer().field("tags").count(), TypeRef::Int32)]
    #[case(beer().field("name").length(), TypeRef::Int32)]
    fn test_expression_types(#[case] expr: Expr, #[case] expected: TypeRef) {
        assert_eq!(expr.ty(), expected);
    }

    #[rstest]
    fn test_transform_visits_children_before_parents() {
        let mut visited = Vec::new();
        let _ = beer().field("abv").gt(5.0).transform(&mut |expr| {
            visited.push(std::mem::discriminant(&expr));
            expr
        });

        assert_eq!(visited.len(), 4);
        assert_eq!(visited.last(), Some(&std::mem::discriminant(&Expr::binary(
            BinaryOp::Equal,
            Expr::constant(1),
            Expr::constant(1),
        ))));
    }

    #[rstest]
    fn test_references_source() {
        let source = QuerySource::new("b", TypeRef::Dynamic);
        let expr = Expr::source(&source).field("name").eq("x");

        assert!(expr.references_source(source.id));
        assert!(!expr.references_source(source.id + 1000));
    }
}
