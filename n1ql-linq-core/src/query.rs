//! The clause-based query model.
//!
//! A [`QueryModel`] is the relational shape of a LINQ-style query: one main from
//! clause, an ordered list of body clauses (where, order by, join, nest, unnest,
//! group by), a select expression and an ordered list of result operators. Models are
//! produced by the [`Queryable`](crate::queryable::Queryable) builder and consumed by
//! implementations of [`QueryModelVisitor`], the N1QL generator being the main one.
//!
//! # Example
//!
//! ```ignore
//! let model = Queryable::of::<Beer>("beer-sample")
//!     .filter(|b| b.field("abv").gt(5))
//!     .order_by(|b| b.field("name"))
//!     .take(10)
//!     .build();
//! ```

use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use crate::{
    error::N1qlError,
    expression::Expr,
    types::{MemberAttributes, ObjectType, TypeRef},
};

static NEXT_SOURCE_ID: AtomicU32 = AtomicU32::new(1);

/// A bound range variable: the identity that correlates expressions with their extent.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySource {
    pub id: u32,
    /// Display name, used in diagnostics only.
    pub name: String,
    pub item_type: TypeRef,
}

impl QuerySource {
    /// Creates a source with a process-unique id.
    pub fn new(name: impl Into<String>, item_type: TypeRef) -> Self {
        Self {
            id: NEXT_SOURCE_ID.fetch_add(1, AtomicOrdering::Relaxed),
            name: name.into(),
            item_type,
        }
    }
}

/// What a from clause ranges over.
#[derive(Debug, Clone, PartialEq)]
pub enum FromSource {
    /// A keyspace, by bucket name.
    Bucket(String),
    /// A collection-valued expression: an array member, a grouping or a literal.
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MainFromClause {
    pub source: QuerySource,
    pub from: FromSource,
}

/// Sort direction for orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub expr: Expr,
    pub direction: SortDirection,
}

/// Inner or `DefaultIfEmpty`-qualified (left outer) correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

/// Hash join side hint for ANSI joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashHint {
    Build,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Gsi,
    View,
}

/// A second keyspace correlated with the outer extents by key equality.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub source: QuerySource,
    pub bucket: String,
    pub outer_key: Expr,
    pub inner_key: Expr,
    pub kind: JoinKind,
    pub hash_hint: Option<HashHint>,
}

/// A keyspace whose matching documents are nested as an array.
///
/// The source's item type is the collection of nested documents. `inner_key` is only
/// present for predicate (ANSI) nests; otherwise `outer_keys` lists the keys to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct NestClause {
    pub source: QuerySource,
    pub bucket: String,
    pub outer_keys: Expr,
    pub inner_key: Option<Expr>,
    pub kind: JoinKind,
}

/// A `from x in outer.Collection` clause, rendered as UNNEST.
#[derive(Debug, Clone, PartialEq)]
pub struct AdditionalFromClause {
    pub source: QuerySource,
    pub collection: Expr,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupByClause {
    /// The grouping range variable; its item type is a `Grouping`.
    pub source: QuerySource,
    pub key: Expr,
    pub element: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyClause {
    Where(Expr),
    OrderBy(Vec<Ordering>),
    AdditionalFrom(AdditionalFromClause),
    Join(JoinClause),
    Nest(NestClause),
    GroupBy(GroupByClause),
}

/// A query-shaping operation applied after from/where/select.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultOperator {
    Take(usize),
    Skip(usize),
    Distinct,
    Any,
    /// `All(predicate)`; the predicate refers to the current row.
    All(Expr),
    Contains(Expr),
    Count,
    LongCount,
    Sum,
    Average,
    Min,
    Max,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    UseKeys(Expr),
    UseIndex { name: String, kind: IndexKind },
    Explain,
}

impl ResultOperator {
    /// Returns true for operators that force a non-collection result.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ResultOperator::Any
                | ResultOperator::All(_)
                | ResultOperator::Contains(_)
                | ResultOperator::Count
                | ResultOperator::LongCount
                | ResultOperator::Sum
                | ResultOperator::Average
                | ResultOperator::Min
                | ResultOperator::Max
                | ResultOperator::First
                | ResultOperator::FirstOrDefault
                | ResultOperator::Single
                | ResultOperator::SingleOrDefault
        )
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            ResultOperator::Count
                | ResultOperator::LongCount
                | ResultOperator::Sum
                | ResultOperator::Average
                | ResultOperator::Min
                | ResultOperator::Max
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResultOperator::Take(_) => "Take",
            ResultOperator::Skip(_) => "Skip",
            ResultOperator::Distinct => "Distinct",
            ResultOperator::Any => "Any",
            ResultOperator::All(_) => "All",
            ResultOperator::Contains(_) => "Contains",
            ResultOperator::Count => "Count",
            ResultOperator::LongCount => "LongCount",
            ResultOperator::Sum => "Sum",
            ResultOperator::Average => "Average",
            ResultOperator::Min => "Min",
            ResultOperator::Max => "Max",
            ResultOperator::First => "First",
            ResultOperator::FirstOrDefault => "FirstOrDefault",
            ResultOperator::Single => "Single",
            ResultOperator::SingleOrDefault => "SingleOrDefault",
            ResultOperator::UseKeys(_) => "UseKeys",
            ResultOperator::UseIndex { .. } => "UseIndex",
            ResultOperator::Explain => "Explain",
        }
    }
}

/// A complete query: from, body clauses, select and result operators.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryModel {
    pub main_from: MainFromClause,
    pub body_clauses: Vec<BodyClause>,
    pub select: Expr,
    pub result_operators: Vec<ResultOperator>,
}

impl QueryModel {
    pub fn new(main_from: MainFromClause, select: Expr) -> Self {
        Self { main_from, body_clauses: Vec::new(), select, result_operators: Vec::new() }
    }

    pub fn with_where(mut self, predicate: Expr) -> Self {
        self.body_clauses.push(BodyClause::Where(predicate));
        self
    }

    pub fn with_body_clause(mut self, clause: BodyClause) -> Self {
        self.body_clauses.push(clause);
        self
    }

    pub fn with_result_operator(mut self, operator: ResultOperator) -> Self {
        self.result_operators.push(operator);
        self
    }

    /// Returns true if a `Take` or `Skip` has been applied.
    pub fn is_windowed(&self) -> bool {
        self.result_operators
            .iter()
            .any(|operator| matches!(operator, ResultOperator::Take(_) | ResultOperator::Skip(_)))
    }

    /// Wraps this query as the extent of an outer query that selects its rows unchanged.
    ///
    /// Clauses added to the outer query apply to the rows this query produces, after its
    /// `LIMIT`/`OFFSET`. Projected columns keep their names on the outer row, along with
    /// the converters of the members they were projected from. `Explain` moves outward.
    pub fn into_derived(mut self) -> QueryModel {
        let explain = self.result_operators.contains(&ResultOperator::Explain);
        self.result_operators.retain(|operator| *operator != ResultOperator::Explain);

        let item_type = match &self.select {
            Expr::New { members } => members
                .iter()
                .fold(ObjectType::builder("<>DerivedRow"), |builder, (name, expr)| {
                    let attributes = match expr {
                        Expr::Member { member, .. } => MemberAttributes {
                            converter: member.attributes.converter.clone(),
                            ..MemberAttributes::default()
                        },
                        _ => MemberAttributes::default(),
                    };
                    builder.member_with(name.clone(), expr.ty(), attributes.renamed(name.clone()))
                })
                .build_type(),
            select => select.ty(),
        };

        let source = QuerySource::new("derived", item_type);
        let mut outer = QueryModel::new(
            MainFromClause {
                source: source.clone(),
                from: FromSource::Expr(Expr::SubQuery(Box::new(self))),
            },
            Expr::source(&source),
        );
        if explain {
            outer.result_operators.push(ResultOperator::Explain);
        }
        outer
    }

    /// The last result operator that changes the result shape, if any.
    pub fn scalar_operator(&self) -> Option<&ResultOperator> {
        self.result_operators.iter().rev().find(|operator| operator.is_scalar())
    }

    /// The static type of the value this query produces.
    pub fn result_type(&self) -> TypeRef {
        let selected = self.select.ty();

        match self.scalar_operator() {
            Some(ResultOperator::Any | ResultOperator::All(_) | ResultOperator::Contains(_)) => {
                TypeRef::Bool
            }
            Some(ResultOperator::Count) => TypeRef::Int32,
            Some(ResultOperator::LongCount) => TypeRef::Int64,
            Some(ResultOperator::Average) if selected.is_nullable() => TypeRef::Double.nullable(),
            Some(ResultOperator::Average) => TypeRef::Double,
            Some(_) => selected,
            None => TypeRef::collection_of(selected),
        }
    }

    /// Rebuilds every expression of the model with [`Expr::transform`].
    pub fn transform_expressions(self, f: &mut dyn FnMut(Expr) -> Expr) -> Self {
        let main_from = MainFromClause {
            source: self.main_from.source,
            from: match self.main_from.from {
                FromSource::Expr(expr) => FromSource::Expr(expr.transform(f)),
                bucket => bucket,
            },
        };

        let body_clauses = self
            .body_clauses
            .into_iter()
            .map(|clause| match clause {
                BodyClause::Where(predicate) => BodyClause::Where(predicate.transform(f)),
                BodyClause::OrderBy(orderings) => BodyClause::OrderBy(
                    orderings
                        .into_iter()
                        .map(|ordering| Ordering {
                            expr: ordering.expr.transform(f),
                            direction: ordering.direction,
                        })
                        .collect(),
                ),
                BodyClause::AdditionalFrom(clause) => BodyClause::AdditionalFrom(AdditionalFromClause {
                    collection: clause.collection.transform(f),
                    ..clause
                }),
                BodyClause::Join(clause) => BodyClause::Join(JoinClause {
                    outer_key: clause.outer_key.transform(f),
                    inner_key: clause.inner_key.transform(f),
                    ..clause
                }),
                BodyClause::Nest(clause) => BodyClause::Nest(NestClause {
                    outer_keys: clause.outer_keys.transform(f),
                    inner_key: clause.inner_key.map(|key| key.transform(f)),
                    ..clause
                }),
                BodyClause::GroupBy(clause) => BodyClause::GroupBy(GroupByClause {
                    key: clause.key.transform(f),
                    element: clause.element.transform(f),
                    ..clause
                }),
            })
            .collect();

        let result_operators = self
            .result_operators
            .into_iter()
            .map(|operator| match operator {
                ResultOperator::All(predicate) => ResultOperator::All(predicate.transform(f)),
                ResultOperator::Contains(value) => ResultOperator::Contains(value.transform(f)),
                ResultOperator::UseKeys(keys) => ResultOperator::UseKeys(keys.transform(f)),
                other => other,
            })
            .collect();

        Self {
            main_from,
            body_clauses,
            select: self.select.transform(f),
            result_operators,
        }
    }

    /// Returns true if any expression of the model satisfies `predicate`.
    pub fn any_expression(&self, predicate: &dyn Fn(&Expr) -> bool) -> bool {
        let from = match &self.main_from.from {
            FromSource::Expr(expr) => expr.any_node(predicate),
            FromSource::Bucket(_) => false,
        };

        from || self.select.any_node(predicate)
            || self.body_clauses.iter().any(|clause| match clause {
                BodyClause::Where(expr) => expr.any_node(predicate),
                BodyClause::OrderBy(orderings) => {
                    orderings.iter().any(|ordering| ordering.expr.any_node(predicate))
                }
                BodyClause::AdditionalFrom(clause) => clause.collection.any_node(predicate),
                BodyClause::Join(clause) => {
                    clause.outer_key.any_node(predicate) || clause.inner_key.any_node(predicate)
                }
                BodyClause::Nest(clause) => {
                    clause.outer_keys.any_node(predicate)
                        || clause.inner_key.as_ref().is_some_and(|key| key.any_node(predicate))
                }
                BodyClause::GroupBy(clause) => {
                    clause.key.any_node(predicate) || clause.element.any_node(predicate)
                }
            })
            || self.result_operators.iter().any(|operator| match operator {
                ResultOperator::All(expr) | ResultOperator::Contains(expr) | ResultOperator::UseKeys(expr) => {
                    expr.any_node(predicate)
                }
                _ => false,
            })
    }
}

/// Visits the clauses of a [`QueryModel`] in declaration order.
///
/// Implementors accumulate state across calls; [`visit_query_model`](Self::visit_query_model)
/// drives the traversal: main from, body clauses, select, then result operators.
pub trait QueryModelVisitor {
    type Error: Into<N1qlError>;

    fn visit_main_from(&mut self, clause: &MainFromClause) -> Result<(), Self::Error>;
    fn visit_where(&mut self, predicate: &Expr) -> Result<(), Self::Error>;
    fn visit_order_by(&mut self, orderings: &[Ordering]) -> Result<(), Self::Error>;
    fn visit_additional_from(&mut self, clause: &AdditionalFromClause) -> Result<(), Self::Error>;
    fn visit_join(&mut self, clause: &JoinClause) -> Result<(), Self::Error>;
    fn visit_nest(&mut self, clause: &NestClause) -> Result<(), Self::Error>;
    fn visit_group_by(&mut self, clause: &GroupByClause) -> Result<(), Self::Error>;
    fn visit_select(&mut self, select: &Expr) -> Result<(), Self::Error>;
    fn visit_result_operator(&mut self, operator: &ResultOperator) -> Result<(), Self::Error>;

    fn visit_body_clause(&mut self, clause: &BodyClause) -> Result<(), Self::Error> {
        match clause {
            BodyClause::Where(predicate) => self.visit_where(predicate),
            BodyClause::OrderBy(orderings) => self.visit_order_by(orderings),
            BodyClause::AdditionalFrom(clause) => self.visit_additional_from(clause),
            BodyClause::Join(clause) => self.visit_join(clause),
            BodyClause::Nest(clause) => self.visit_nest(clause),
            BodyClause::GroupBy(clause) => self.visit_group_by(clause),
        }
    }

    fn visit_query_model(&mut self, model: &QueryModel) -> Result<(), Self::Error> {
        self.visit_main_from(&model.main_from)?;
        for clause in &model.body_clauses {
            self.visit_body_clause(clause)?;
        }
        self.visit_select(&model.select)?;
        for operator in &model.result_operators {
            self.visit_result_operator(operator)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn model(operators: Vec<ResultOperator>) -> QueryModel {
        let source = QuerySource::new("b", TypeRef::Dynamic);
        let mut model = QueryModel::new(
            MainFromClause { source: source.clone(), from: FromSource::Bucket("beer".into()) },
            Expr::source(&source).field("abv"),
        );
        model.result_operators = operators;
        model
    }

    #[rstest]
    fn test_source_ids_are_unique() {
        let first = QuerySource::new("a", TypeRef::Dynamic);
        let second = QuerySource::new("a", TypeRef::Dynamic);

        assert_ne!(first.id, second.id);
    }

    #[rstest]
    #[case(vec![], TypeRef::collection_of(TypeRef::Dynamic))]
    #[case(vec![ResultOperator::Take(5), ResultOperator::Count], TypeRef::Int32)]
    #[case(vec![ResultOperator::LongCount], TypeRef::Int64)]
    #[case(vec![ResultOperator::Any], TypeRef::Bool)]
    #[case(vec![ResultOperator::Average], TypeRef::Double)]
    #[case(vec![ResultOperator::FirstOrDefault], TypeRef::Dynamic)]
    fn test_result_type(#[case] operators: Vec<ResultOperator>, #[case] expected: TypeRef) {
        assert_eq!(model(operators).result_type(), expected);
    }

    #[rstest]
    fn test_into_derived_selects_inner_rows() {
        let inner = model(vec![ResultOperator::Take(10), ResultOperator::Explain]);
        let outer = inner.clone().into_derived();

        let FromSource::Expr(Expr::SubQuery(wrapped)) = &outer.main_from.from else {
            panic!("expected a derived extent");
        };
        assert_eq!(wrapped.result_operators, vec![ResultOperator::Take(10)]);
        assert!(wrapped.is_windowed());
        assert_eq!(outer.result_operators, vec![ResultOperator::Explain]);
        assert_eq!(outer.select, Expr::source(&outer.main_from.source));
        assert!(!outer.is_windowed());
    }

    #[rstest]
    fn test_into_derived_keeps_projected_names() {
        let mut inner = model(vec![ResultOperator::Skip(5)]);
        let source = inner.main_from.source.clone();
        inner.select = Expr::new_object([("strength", Expr::source(&source).field("abv"))]);

        let outer = inner.into_derived();
        let member = outer.main_from.source.item_type.member("strength").cloned().unwrap();

        assert_eq!(member.attributes.rename.as_deref(), Some("strength"));
    }

    #[derive(Default)]
    struct ClauseCounter {
        visited: Vec<&'static str>,
    }

    impl QueryModelVisitor for ClauseCounter {
        type Error = N1qlError;

        fn visit_main_from(&mut self, _: &MainFromClause) -> Result<(), N1qlError> {
            self.visited.push("from");
            Ok(())
        }
        fn visit_where(&mut self, _: &Expr) -> Result<(), N1qlError> {
            self.visited.push("where");
            Ok(())
        }
        fn visit_order_by(&mut self, _: &[Ordering]) -> Result<(), N1qlError> {
            self.visited.push("order");
            Ok(())
        }
        fn visit_additional_from(&mut self, _: &AdditionalFromClause) -> Result<(), N1qlError> {
            self.visited.push("unnest");
            Ok(())
        }
        fn visit_join(&mut self, _: &JoinClause) -> Result<(), N1qlError> {
            self.visited.push("join");
            Ok(())
        }
        fn visit_nest(&mut self, _: &NestClause) -> Result<(), N1qlError> {
            self.visited.push("nest");
            Ok(())
        }
        fn visit_group_by(&mut self, _: &GroupByClause) -> Result<(), N1qlError> {
            self.visited.push("group");
            Ok(())
        }
        fn visit_select(&mut self, _: &Expr) -> Result<(), N1qlError> {
            self.visited.push("select");
            Ok(())
        }
        fn visit_result_operator(&mut self, operator: &ResultOperator) -> Result<(), N1qlError> {
            self.visited.push(operator.name());
            Ok(())
        }
    }

    #[rstest]
    fn test_visitor_order() {
        let mut model = model(vec![ResultOperator::Skip(1), ResultOperator::Take(2)]);
        model.body_clauses.push(BodyClause::OrderBy(Vec::new()));
        model.body_clauses.push(BodyClause::Where(Expr::constant(true)));

        let mut counter = ClauseCounter::default();
        counter.visit_query_model(&model).unwrap();

        assert_eq!(counter.visited, vec!["from", "order", "where", "select", "Skip", "Take"]);
    }
}
