//! N1QL statement generation from query models.
//!
//! [`QueryGenerator`] walks a normalized [`QueryModel`] clause by clause, binding every
//! range variable to an `ExtentN` alias and rendering clause expressions into a
//! [`QueryParts`]. Result operators are applied in declared order: `Take` and `Skip`
//! compose into a single `LIMIT`/`OFFSET` window, and scalar operators decide the
//! projection and the [`ResultShape`] the executor uses to materialize rows.
//!
//! # Example
//!
//! ```ignore
//! let model = Queryable::of::<Beer>("beer-sample")
//!     .filter(|b| b.field("abv").gt(5))
//!     .take(10)
//!     .build();
//!
//! let plan = generate_query(&model, &QueryGenerationContext::default())?;
//! assert_eq!(
//!     plan.statement,
//!     "SELECT `Extent1`.* FROM `beer-sample` as `Extent1` WHERE (`Extent1`.`abv` > 5) LIMIT 10"
//! );
//! ```

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{
    context::{FeatureVersions, QueryGenerationContext, ScanConsistency},
    error::{N1qlError, N1qlResult},
    expression::Expr,
    method,
    normalize::normalize_query_model,
    parts::{ExtentPart, JoinPart, JoinStrategy, JoinType, QueryParts},
    query::{
        AdditionalFromClause, FromSource, GroupByClause, HashHint, JoinClause, JoinKind,
        MainFromClause, NestClause, Ordering, QueryModel, QueryModelVisitor, QuerySource,
        ResultOperator, SortDirection,
    },
    render::{ExpressionRenderer, RenderScope, SourceBinding, escape_identifier},
    types::TypeRef,
};

const TARGET: &str = "n1ql_linq::query";

/// Alias of the derived table when an aggregate is applied over a windowed query.
const RESULT_ALIAS: &str = "result";

/// How the rows returned for a statement become the query's result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultShape {
    /// Every row is an element of the result.
    Collection,
    /// The first row is the result; an empty or null result yields `default`.
    Scalar { default: JsonValue },
    /// One element of the result sequence.
    Element {
        /// Yield a default value instead of failing when there are no rows.
        or_default: bool,
        /// Fail when there is more than one row.
        single: bool,
    },
}

/// A generated statement together with how to interpret its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub statement: String,
    pub shape: ResultShape,
    pub scan_consistency: ScanConsistency,
}

/// Normalizes `model` and generates its N1QL statement.
///
/// # Errors
///
/// Returns [`N1qlError::UnsupportedTranslation`] for constructs with no N1QL
/// equivalent on the target cluster, and [`N1qlError::InvalidShape`] for malformed
/// models.
pub fn generate_query(model: &QueryModel, context: &QueryGenerationContext) -> N1qlResult<QueryPlan> {
    let model = normalize_query_model(quantify_over_window(model.clone()));
    let plan = QueryGenerator::new(context).generate(&model)?;

    debug!(target: TARGET, statement = %plan.statement, shape = ?plan.shape, "generated N1QL statement");
    Ok(plan)
}

/// The `LIMIT`/`OFFSET` window built from `Take` and `Skip` in declared order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Window {
    limit: Option<usize>,
    offset: usize,
}

impl Window {
    fn take(&mut self, count: usize) {
        self.limit = Some(self.limit.map_or(count, |limit| limit.min(count)));
    }

    fn skip(&mut self, count: usize) {
        self.offset += count;
        self.limit = self.limit.map(|limit| limit.saturating_sub(count));
    }

    fn is_set(&self) -> bool {
        self.limit.is_some() || self.offset > 0
    }
}

/// `All` and `Contains` become filters of the statement, which would move them inside a
/// preceding `Take`/`Skip` window. Such queries quantify over the windowed rows as a
/// derived extent instead.
fn quantify_over_window(mut model: QueryModel) -> QueryModel {
    let Some(index) = model
        .result_operators
        .iter()
        .position(|operator| matches!(operator, ResultOperator::All(_) | ResultOperator::Contains(_)))
    else {
        return model;
    };

    let trailing = model.result_operators.split_off(index);
    if !model.is_windowed() {
        model.result_operators.extend(trailing);
        return model;
    }

    let selected = model.select.clone();
    let mut outer = model.into_derived();
    let row = outer.select.clone();

    for operator in trailing {
        let operator = match operator {
            ResultOperator::All(predicate) => ResultOperator::All(rebase(predicate, &selected, &row)),
            other => other,
        };
        outer.result_operators.push(operator);
    }
    outer
}

/// Rewrites `expr`, written against the rows of `selected`, to read from `row` instead.
fn rebase(expr: Expr, selected: &Expr, row: &Expr) -> Expr {
    expr.transform(&mut |node| {
        if node == *selected {
            return row.clone();
        }
        if let Expr::New { members } = selected {
            if let Some((name, _)) = members.iter().find(|(_, value)| *value == node) {
                return row.field(name);
            }
        }
        node
    })
}

fn is_document(ty: &TypeRef) -> bool {
    matches!(ty.underlying(), TypeRef::Object(_) | TypeRef::Dynamic)
}

/// The document whose key `expr` reads, if `expr` is `Key(source)`.
fn key_source(expr: &Expr) -> Option<&QuerySource> {
    match expr {
        Expr::Call { method: called, target: None, args }
            if called.signature == method::key().signature =>
        {
            match args.first() {
                Some(Expr::QuerySource(source)) => Some(source),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Visitor that renders a [`QueryModel`] into a N1QL statement.
pub struct QueryGenerator<'c> {
    context: &'c QueryGenerationContext,
    scope: RenderScope,
    parts: QueryParts,
    grouped: bool,
    select: Option<Expr>,
    window: Window,
    scalar: Option<ResultOperator>,
    wrap_aggregate: bool,
    /// Range variables bound to derived extents.
    derived: Vec<u32>,
}

impl<'c> QueryGenerator<'c> {
    pub fn new(context: &'c QueryGenerationContext) -> Self {
        Self {
            context,
            scope: RenderScope::new(),
            parts: QueryParts::default(),
            grouped: false,
            select: None,
            window: Window::default(),
            scalar: None,
            wrap_aggregate: false,
            derived: Vec::new(),
        }
    }

    /// Generates the statement for an already normalized model.
    pub fn generate(mut self, model: &QueryModel) -> N1qlResult<QueryPlan> {
        self.visit_query_model(model)?;
        self.finish()
    }

    fn render(&mut self, expr: &Expr) -> N1qlResult<String> {
        ExpressionRenderer::new(self.context, &mut self.scope).render(expr)
    }

    /// Generates the statement of a query used as a FROM extent. Its aliases continue the
    /// outer numbering.
    fn derived_statement(&mut self, model: &QueryModel) -> N1qlResult<String> {
        let mut nested = QueryGenerator::new(self.context);
        nested.scope.continue_numbering(self.scope.extent_count());
        nested.visit_query_model(&normalize_query_model(model.clone()))?;
        self.scope.continue_numbering(nested.scope.extent_count());

        let plan = nested.finish()?;
        match plan.shape {
            ResultShape::Collection => Ok(plan.statement),
            _ => Err(N1qlError::UnsupportedTranslation(
                "a scalar query cannot be used as an extent".to_string(),
            )),
        }
    }

    fn add_filter(&mut self, condition: String) {
        if self.grouped {
            self.parts.having_parts.push(condition);
        } else {
            self.parts.where_parts.push(condition);
        }
    }

    fn extent_mut(&mut self) -> N1qlResult<&mut ExtentPart> {
        self.parts
            .extent
            .as_mut()
            .ok_or_else(|| N1qlError::InvalidShape("query has no FROM extent".to_string()))
    }

    /// Chooses how a secondary keyspace is correlated with the outer extents.
    fn join_strategy(
        &mut self,
        inner: &QuerySource,
        outer_key: &Expr,
        inner_key: &Expr,
        hash_hint: Option<HashHint>,
        allow_index_join: bool,
    ) -> N1qlResult<JoinStrategy> {
        let index_alias = if allow_index_join && self.context.supports(FeatureVersions::INDEX_JOIN) {
            key_source(outer_key)
                .and_then(|outer| self.scope.alias_of(outer))
                .map(str::to_string)
        } else {
            None
        };

        let strategy = if key_source(inner_key).is_some_and(|source| source.id == inner.id) {
            JoinStrategy::OnKeys { keys: self.render(outer_key)? }
        } else if let Some(for_alias) = index_alias {
            JoinStrategy::IndexJoin { key: self.render(inner_key)?, for_alias }
        } else if self.context.supports(FeatureVersions::ANSI_JOIN) {
            let condition = self.render(&outer_key.eq(inner_key))?;
            JoinStrategy::Ansi { condition, hash_hint }
        } else {
            return Err(N1qlError::UnsupportedTranslation(format!(
                "join on a non-key expression requires cluster version {} (target is {})",
                FeatureVersions::ANSI_JOIN,
                self.context.cluster_version
            )));
        };

        if hash_hint.is_some() && !matches!(strategy, JoinStrategy::Ansi { .. }) {
            warn!(target: TARGET, "hash join hint ignored for a key-based join");
        }
        debug!(target: TARGET, source = %inner.name, strategy = ?strategy, "selected join strategy");
        Ok(strategy)
    }

    /// Renders the projection of `select`.
    fn projection(&mut self, select: &Expr) -> N1qlResult<String> {
        match select {
            Expr::QuerySource(source) if is_document(&source.item_type) => {
                let derived = self.derived.contains(&source.id);
                match self.scope.alias_of(source).map(escape_identifier) {
                    // Derived rows already carry the metadata column of their extent.
                    Some(alias) if self.context.include_metadata && !derived => {
                        Ok(format!("{alias}.*, META({alias}) as `__metadata`"))
                    }
                    Some(alias) => Ok(format!("{alias}.*")),
                    None => Ok(format!("RAW {}", self.render(select)?)),
                }
            }
            Expr::New { members } if !members.is_empty() => {
                let mut columns = Vec::with_capacity(members.len());
                for (name, value) in members {
                    columns.push(format!("{} as {}", self.render(value)?, escape_identifier(name)));
                }
                Ok(columns.join(", "))
            }
            other => Ok(format!("RAW {}", self.render(other)?)),
        }
    }

    fn aggregate(&mut self, operator: &ResultOperator, select: &Expr) -> N1qlResult<String> {
        let function = match operator {
            ResultOperator::Count | ResultOperator::LongCount => return Ok("COUNT(*)".to_string()),
            ResultOperator::Sum => "SUM",
            ResultOperator::Average => "AVG",
            ResultOperator::Min => "MIN",
            ResultOperator::Max => "MAX",
            other => {
                return Err(N1qlError::InvalidShape(format!("{} is not an aggregate", other.name())));
            }
        };
        Ok(format!("{function}({})", self.render(select)?))
    }

    fn finish(mut self) -> N1qlResult<QueryPlan> {
        let select = self
            .select
            .take()
            .ok_or_else(|| N1qlError::InvalidShape("query has no select clause".to_string()))?;

        let mut outer_aggregate = None;
        let shape = match self.scalar.take() {
            None => {
                self.parts.select = self.projection(&select)?;
                ResultShape::Collection
            }
            Some(operator @ (ResultOperator::First | ResultOperator::FirstOrDefault)) => {
                self.parts.select = self.projection(&select)?;
                self.window.take(1);
                ResultShape::Element {
                    or_default: operator == ResultOperator::FirstOrDefault,
                    single: false,
                }
            }
            Some(operator @ (ResultOperator::Single | ResultOperator::SingleOrDefault)) => {
                self.parts.select = self.projection(&select)?;
                self.window.take(2);
                ResultShape::Element {
                    or_default: operator == ResultOperator::SingleOrDefault,
                    single: true,
                }
            }
            Some(ResultOperator::Any) => {
                self.parts.select = "RAW true".to_string();
                self.window.take(1);
                ResultShape::Scalar { default: JsonValue::Bool(false) }
            }
            Some(ResultOperator::Contains(value)) => {
                let condition = self.render(&select.eq(&value))?;
                self.add_filter(condition);
                self.parts.select = "RAW true".to_string();
                self.window.take(1);
                ResultShape::Scalar { default: JsonValue::Bool(false) }
            }
            Some(ResultOperator::All(predicate)) => {
                let condition = self.render(&predicate.not())?;
                self.add_filter(condition);
                self.parts.select = "RAW false".to_string();
                self.window.take(1);
                ResultShape::Scalar { default: JsonValue::Bool(true) }
            }
            Some(operator) => {
                if self.wrap_aggregate {
                    self.parts.select = self.projection(&select)?;
                    let result = Expr::parameter(RESULT_ALIAS, select.ty());
                    outer_aggregate = Some(self.aggregate(&operator, &result)?);
                } else {
                    self.parts.select = format!("RAW {}", self.aggregate(&operator, &select)?);
                }
                let default = match operator {
                    ResultOperator::Count | ResultOperator::LongCount | ResultOperator::Sum => {
                        JsonValue::from(0)
                    }
                    _ => JsonValue::Null,
                };
                ResultShape::Scalar { default }
            }
        };

        self.parts.limit = self.window.limit;
        self.parts.offset = (self.window.offset > 0).then_some(self.window.offset);

        let statement = match outer_aggregate {
            Some(aggregate) => {
                let explain = std::mem::take(&mut self.parts.explain);
                format!(
                    "{}SELECT RAW {aggregate} FROM ({}) as {}",
                    if explain { "EXPLAIN " } else { "" },
                    self.parts.to_n1ql()?,
                    escape_identifier(RESULT_ALIAS)
                )
            }
            None => self.parts.to_n1ql()?,
        };

        Ok(QueryPlan { statement, shape, scan_consistency: self.context.scan_consistency })
    }
}

impl QueryModelVisitor for QueryGenerator<'_> {
    type Error = N1qlError;

    fn visit_main_from(&mut self, clause: &MainFromClause) -> N1qlResult<()> {
        let source = match &clause.from {
            FromSource::Bucket(bucket) => escape_identifier(bucket),
            FromSource::Expr(Expr::SubQuery(inner))
                if matches!(inner.main_from.from, FromSource::Bucket(_)) =>
            {
                self.derived.push(clause.source.id);
                format!("({})", self.derived_statement(inner)?)
            }
            FromSource::Expr(expr) => self.render(expr)?,
        };
        let alias = self.scope.bind_extent(&clause.source);

        self.parts.extent = Some(ExtentPart { source, alias, use_keys: None, use_index: None });
        Ok(())
    }

    fn visit_where(&mut self, predicate: &Expr) -> N1qlResult<()> {
        let condition = self.render(predicate)?;
        self.add_filter(condition);
        Ok(())
    }

    fn visit_order_by(&mut self, orderings: &[Ordering]) -> N1qlResult<()> {
        let mut rendered = Vec::with_capacity(orderings.len());
        for ordering in orderings {
            let direction = match ordering.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            rendered.push(format!("{} {direction}", self.render(&ordering.expr)?));
        }

        // A later ordering replaces an earlier one.
        self.parts.order_by = rendered;
        Ok(())
    }

    fn visit_additional_from(&mut self, clause: &AdditionalFromClause) -> N1qlResult<()> {
        let collection = self.render(&clause.collection)?;
        let alias = self.scope.bind_extent(&clause.source);
        let join_type = match clause.kind {
            JoinKind::Inner => JoinType::InnerUnnest,
            JoinKind::LeftOuter => JoinType::LeftOuterUnnest,
        };

        self.parts.joins.push(JoinPart { join_type, source: collection, alias, strategy: None });
        Ok(())
    }

    fn visit_join(&mut self, clause: &JoinClause) -> N1qlResult<()> {
        let alias = self.scope.bind_extent(&clause.source);
        let strategy = self.join_strategy(
            &clause.source,
            &clause.outer_key,
            &clause.inner_key,
            clause.hash_hint,
            true,
        )?;
        let join_type = match clause.kind {
            JoinKind::Inner => JoinType::InnerJoin,
            JoinKind::LeftOuter => JoinType::LeftJoin,
        };

        self.parts.joins.push(JoinPart {
            join_type,
            source: escape_identifier(&clause.bucket),
            alias,
            strategy: Some(strategy),
        });
        Ok(())
    }

    fn visit_nest(&mut self, clause: &NestClause) -> N1qlResult<()> {
        let alias = self.scope.bind_extent(&clause.source);
        let strategy = match &clause.inner_key {
            Some(inner_key) => {
                self.join_strategy(&clause.source, &clause.outer_keys, inner_key, None, false)?
            }
            None => JoinStrategy::OnKeys { keys: self.render(&clause.outer_keys)? },
        };
        let join_type = match clause.kind {
            JoinKind::Inner => JoinType::InnerNest,
            JoinKind::LeftOuter => JoinType::LeftOuterNest,
        };

        self.parts.joins.push(JoinPart {
            join_type,
            source: escape_identifier(&clause.bucket),
            alias,
            strategy: Some(strategy),
        });
        Ok(())
    }

    fn visit_group_by(&mut self, clause: &GroupByClause) -> N1qlResult<()> {
        if self.grouped {
            return Err(N1qlError::UnsupportedTranslation(
                "grouping an already grouped query".to_string(),
            ));
        }

        let group_by = match &clause.key {
            Expr::New { members } => {
                let mut keys = Vec::with_capacity(members.len());
                for (_, key) in members {
                    keys.push(self.render(key)?);
                }
                keys.join(", ")
            }
            key => self.render(key)?,
        };

        self.parts.group_by = Some(group_by);
        self.scope.bind(
            clause.source.id,
            SourceBinding::Group { key: clause.key.clone(), element: clause.element.clone() },
        );
        self.grouped = true;
        Ok(())
    }

    fn visit_select(&mut self, select: &Expr) -> N1qlResult<()> {
        self.select = Some(select.clone());
        Ok(())
    }

    fn visit_result_operator(&mut self, operator: &ResultOperator) -> N1qlResult<()> {
        match operator {
            ResultOperator::Take(count) => self.window.take(*count),
            ResultOperator::Skip(count) => self.window.skip(*count),
            ResultOperator::Distinct => self.parts.distinct = true,
            ResultOperator::Explain => self.parts.explain = true,
            ResultOperator::UseKeys(keys) => {
                let keys = self.render(keys)?;
                self.extent_mut()?.use_keys = Some(keys);
            }
            ResultOperator::UseIndex { name, kind } => {
                self.extent_mut()?.use_index = Some((name.clone(), *kind));
            }
            scalar => {
                if let Some(previous) = &self.scalar {
                    return Err(N1qlError::UnsupportedTranslation(format!(
                        "{} after {}",
                        scalar.name(),
                        previous.name()
                    )));
                }
                if scalar.is_aggregate()
                    && (self.window.is_set() || self.parts.distinct || self.grouped)
                {
                    self.wrap_aggregate = true;
                }
                self.scalar = Some(scalar.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::ClusterVersion,
        functions,
        query::IndexKind,
        queryable::Queryable,
        types::ObjectType,
    };
    use chrono::{TimeZone, Utc};
    use rstest::{fixture, rstest};

    fn beer_type() -> TypeRef {
        ObjectType::builder("Beer")
            .member("name", TypeRef::String)
            .member("abv", TypeRef::Double)
            .member("style", TypeRef::String)
            .member("brewery_id", TypeRef::String)
            .member("tags", TypeRef::collection_of(TypeRef::String))
            .member("brewed", TypeRef::DateTime)
            .build_type()
    }

    fn brewery_type() -> TypeRef {
        ObjectType::builder("Brewery")
            .member("name", TypeRef::String)
            .member("code", TypeRef::String)
            .member("beer_ids", TypeRef::collection_of(TypeRef::String))
            .build_type()
    }

    fn review_type() -> TypeRef {
        ObjectType::builder("Review")
            .member("beer_id", TypeRef::String)
            .member("rating", TypeRef::Int32)
            .build_type()
    }

    #[fixture]
    fn beers() -> Queryable {
        Queryable::from_bucket("beer-sample", beer_type())
    }

    fn context(version: ClusterVersion) -> QueryGenerationContext {
        QueryGenerationContext::builder().cluster_version(version).build()
    }

    fn statement(model: &QueryModel) -> String {
        generate_query(model, &QueryGenerationContext::default()).unwrap().statement
    }

    #[rstest]
    fn test_filter_order_and_take(beers: Queryable) {
        let model = beers
            .filter(|b| b.field("abv").gt(5))
            .order_by(|b| b.field("name"))
            .take(10)
            .build();

        let plan = generate_query(&model, &QueryGenerationContext::default()).unwrap();

        assert_eq!(
            plan.statement,
            "SELECT `Extent1`.* FROM `beer-sample` as `Extent1` WHERE (`Extent1`.`abv` > 5) \
             ORDER BY `Extent1`.`name` ASC LIMIT 10"
        );
        assert_eq!(plan.shape, ResultShape::Collection);
    }

    #[rstest]
    fn test_projection_lists_aliased_columns(beers: Queryable) {
        let model = beers
            .select(|b| Expr::new_object([("name", b.field("name")), ("strength", b.field("abv"))]))
            .build();

        assert_eq!(
            statement(&model),
            "SELECT `Extent1`.`name` as `name`, `Extent1`.`abv` as `strength` FROM `beer-sample` as `Extent1`"
        );
    }

    #[rstest]
    fn test_scalar_projection_is_raw(beers: Queryable) {
        let model = beers.select(|b| b.field("name")).order_by_descending(|name| name.clone()).build();

        assert_eq!(
            statement(&model),
            "SELECT RAW `Extent1`.`name` FROM `beer-sample` as `Extent1` ORDER BY `Extent1`.`name` DESC"
        );
    }

    #[rstest]
    fn test_include_metadata(beers: Queryable) {
        let context = QueryGenerationContext::builder().include_metadata(true).build();
        let plan = generate_query(&beers.build(), &context).unwrap();

        assert_eq!(
            plan.statement,
            "SELECT `Extent1`.*, META(`Extent1`) as `__metadata` FROM `beer-sample` as `Extent1`"
        );
    }

    #[rstest]
    fn test_later_ordering_replaces_earlier(beers: Queryable) {
        let model = beers.order_by(|b| b.field("name")).order_by(|b| b.field("abv")).build();

        assert_eq!(
            statement(&model),
            "SELECT `Extent1`.* FROM `beer-sample` as `Extent1` ORDER BY `Extent1`.`abv` ASC"
        );
    }

    #[rstest]
    fn test_then_by_appends(beers: Queryable) {
        let model = beers.order_by(|b| b.field("style")).then_by_descending(|b| b.field("abv")).build();

        assert_eq!(
            statement(&model),
            "SELECT `Extent1`.* FROM `beer-sample` as `Extent1` ORDER BY `Extent1`.`style` ASC, `Extent1`.`abv` DESC"
        );
    }

    #[rstest]
    #[case(vec![ResultOperator::Take(10), ResultOperator::Skip(5)], " LIMIT 5 OFFSET 5")]
    #[case(vec![ResultOperator::Skip(5), ResultOperator::Take(10)], " LIMIT 10 OFFSET 5")]
    #[case(vec![ResultOperator::Take(10), ResultOperator::Take(3)], " LIMIT 3")]
    #[case(vec![ResultOperator::Skip(2), ResultOperator::Skip(3)], " OFFSET 5")]
    #[case(vec![ResultOperator::Take(3), ResultOperator::Skip(5)], " LIMIT 0 OFFSET 5")]
    fn test_take_and_skip_compose_in_order(
        beers: Queryable,
        #[case] operators: Vec<ResultOperator>,
        #[case] suffix: &str,
    ) {
        let mut model = beers.build();
        model.result_operators = operators;

        assert_eq!(
            statement(&model),
            format!("SELECT `Extent1`.* FROM `beer-sample` as `Extent1`{suffix}")
        );
    }

    #[rstest]
    fn test_count(beers: Queryable) {
        let plan = generate_query(
            &beers.filter(|b| b.field("style").eq("IPA")).count(),
            &QueryGenerationContext::default(),
        )
        .unwrap();

        assert_eq!(
            plan.statement,
            "SELECT RAW COUNT(*) FROM `beer-sample` as `Extent1` WHERE (`Extent1`.`style` = 'IPA')"
        );
        assert_eq!(plan.shape, ResultShape::Scalar { default: JsonValue::from(0) });
    }

    #[rstest]
    fn test_sum_and_average(beers: Queryable) {
        let sum = generate_query(&beers.clone().sum(|b| b.field("abv")), &QueryGenerationContext::default())
            .unwrap();
        let average = generate_query(&beers.average(|b| b.field("abv")), &QueryGenerationContext::default())
            .unwrap();

        assert_eq!(sum.statement, "SELECT RAW SUM(`Extent1`.`abv`) FROM `beer-sample` as `Extent1`");
        assert_eq!(average.statement, "SELECT RAW AVG(`Extent1`.`abv`) FROM `beer-sample` as `Extent1`");
        assert_eq!(average.shape, ResultShape::Scalar { default: JsonValue::Null });
    }

    #[rstest]
    fn test_aggregate_over_window_is_wrapped(beers: Queryable) {
        assert_eq!(
            statement(&beers.clone().take(10).count()),
            "SELECT RAW COUNT(*) FROM (SELECT `Extent1`.* FROM `beer-sample` as `Extent1` LIMIT 10) as `result`"
        );
        assert_eq!(
            statement(&beers.select(|b| b.field("style")).distinct().count()),
            "SELECT RAW COUNT(*) FROM (SELECT DISTINCT RAW `Extent1`.`style` FROM `beer-sample` as `Extent1`) as `result`"
        );
    }

    #[rstest]
    fn test_any_and_all(beers: Queryable) {
        let any = generate_query(
            &beers.clone().any_where(|b| b.field("abv").gt(10)),
            &QueryGenerationContext::default(),
        )
        .unwrap();
        let all = generate_query(&beers.all(|b| b.field("abv").gt(1)), &QueryGenerationContext::default())
            .unwrap();

        assert_eq!(
            any.statement,
            "SELECT RAW true FROM `beer-sample` as `Extent1` WHERE (`Extent1`.`abv` > 10) LIMIT 1"
        );
        assert_eq!(any.shape, ResultShape::Scalar { default: JsonValue::Bool(false) });
        assert_eq!(
            all.statement,
            "SELECT RAW false FROM `beer-sample` as `Extent1` WHERE NOT (`Extent1`.`abv` > 1) LIMIT 1"
        );
        assert_eq!(all.shape, ResultShape::Scalar { default: JsonValue::Bool(true) });
    }

    #[rstest]
    fn test_contains(beers: Queryable) {
        let plan = generate_query(
            &beers.select(|b| b.field("name")).contains("Pliny"),
            &QueryGenerationContext::default(),
        )
        .unwrap();

        assert_eq!(
            plan.statement,
            "SELECT RAW true FROM `beer-sample` as `Extent1` WHERE (`Extent1`.`name` = 'Pliny') LIMIT 1"
        );
    }

    #[rstest]
    #[case(ResultOperator::First, " LIMIT 1", false, false)]
    #[case(ResultOperator::FirstOrDefault, " LIMIT 1", true, false)]
    #[case(ResultOperator::Single, " LIMIT 2", false, true)]
    #[case(ResultOperator::SingleOrDefault, " LIMIT 2", true, true)]
    fn test_element_operators(
        beers: Queryable,
        #[case] operator: ResultOperator,
        #[case] suffix: &str,
        #[case] or_default: bool,
        #[case] single: bool,
    ) {
        let model = beers.build().with_result_operator(operator);
        let plan = generate_query(&model, &QueryGenerationContext::default()).unwrap();

        assert_eq!(plan.statement, format!("SELECT `Extent1`.* FROM `beer-sample` as `Extent1`{suffix}"));
        assert_eq!(plan.shape, ResultShape::Element { or_default, single });
    }

    #[rstest]
    fn test_first_inside_skip_window(beers: Queryable) {
        assert_eq!(
            statement(&beers.skip(20).first()),
            "SELECT `Extent1`.* FROM `beer-sample` as `Extent1` LIMIT 1 OFFSET 20"
        );
    }

    #[rstest]
    #[case(
        |beers: Queryable| beers.take(10).filter(|b| b.field("abv").gt(5)),
        "SELECT `Extent2`.* FROM (SELECT `Extent1`.* FROM `beer-sample` as `Extent1` LIMIT 10) as `Extent2` \
         WHERE (`Extent2`.`abv` > 5)"
    )]
    #[case(
        |beers: Queryable| beers.take(10).order_by(|b| b.field("name")),
        "SELECT `Extent2`.* FROM (SELECT `Extent1`.* FROM `beer-sample` as `Extent1` LIMIT 10) as `Extent2` \
         ORDER BY `Extent2`.`name` ASC"
    )]
    #[case(
        |beers: Queryable| beers.skip(5).filter(|b| b.field("abv").gt(5)),
        "SELECT `Extent2`.* FROM (SELECT `Extent1`.* FROM `beer-sample` as `Extent1` OFFSET 5) as `Extent2` \
         WHERE (`Extent2`.`abv` > 5)"
    )]
    #[case(
        |beers: Queryable| beers.filter(|b| b.field("style").eq("IPA")).take(10).filter(|b| b.field("abv").gt(5)).take(3),
        "SELECT `Extent2`.* FROM (SELECT `Extent1`.* FROM `beer-sample` as `Extent1` \
         WHERE (`Extent1`.`style` = 'IPA') LIMIT 10) as `Extent2` WHERE (`Extent2`.`abv` > 5) LIMIT 3"
    )]
    fn test_clauses_after_window_see_windowed_rows(
        beers: Queryable,
        #[case] build: fn(Queryable) -> Queryable,
        #[case] expected: &str,
    ) {
        assert_eq!(statement(&build(beers).build()), expected);
    }

    #[rstest]
    fn test_projected_columns_survive_window(beers: Queryable) {
        let model = beers
            .select(|b| Expr::new_object([("title", b.field("name"))]))
            .take(5)
            .filter(|row| row.field("title").eq("IPA"))
            .build();

        assert_eq!(
            statement(&model),
            "SELECT `Extent2`.* FROM (SELECT `Extent1`.`name` as `title` FROM `beer-sample` as `Extent1` LIMIT 5) \
             as `Extent2` WHERE (`Extent2`.`title` = 'IPA')"
        );
    }

    #[rstest]
    fn test_count_over_filtered_window(beers: Queryable) {
        assert_eq!(
            statement(&beers.take(10).filter(|b| b.field("abv").gt(5)).count()),
            "SELECT RAW COUNT(*) FROM (SELECT `Extent1`.* FROM `beer-sample` as `Extent1` LIMIT 10) as `Extent2` \
             WHERE (`Extent2`.`abv` > 5)"
        );
    }

    #[rstest]
    fn test_metadata_comes_from_windowed_extent(beers: Queryable) {
        let context = QueryGenerationContext::builder().include_metadata(true).build();
        let model = beers.take(5).filter(|b| b.field("abv").gt(5)).build();

        assert_eq!(
            generate_query(&model, &context).unwrap().statement,
            "SELECT `Extent2`.* FROM (SELECT `Extent1`.*, META(`Extent1`) as `__metadata` \
             FROM `beer-sample` as `Extent1` LIMIT 5) as `Extent2` WHERE (`Extent2`.`abv` > 5)"
        );
    }

    #[rstest]
    fn test_all_over_window(beers: Queryable) {
        let plan = generate_query(
            &beers.take(10).all(|b| b.field("abv").gt(5)),
            &QueryGenerationContext::default(),
        )
        .unwrap();

        assert_eq!(
            plan.statement,
            "SELECT RAW false FROM (SELECT `Extent1`.* FROM `beer-sample` as `Extent1` LIMIT 10) as `Extent2` \
             WHERE NOT (`Extent2`.`abv` > 5) LIMIT 1"
        );
        assert_eq!(plan.shape, ResultShape::Scalar { default: JsonValue::Bool(true) });
    }

    #[rstest]
    fn test_contains_over_window(beers: Queryable) {
        let model = beers.select(|b| b.field("name")).take(10).contains("x");

        assert_eq!(
            statement(&model),
            "SELECT RAW true FROM (SELECT RAW `Extent1`.`name` FROM `beer-sample` as `Extent1` LIMIT 10) \
             as `Extent2` WHERE (`Extent2` = 'x') LIMIT 1"
        );
    }

    #[rstest]
    fn test_all_over_projected_window(beers: Queryable) {
        let model = beers
            .select(|b| Expr::new_object([("strength", b.field("abv"))]))
            .skip(2)
            .all(|row| row.field("strength").gt(4));

        assert_eq!(
            statement(&model),
            "SELECT RAW false FROM (SELECT `Extent1`.`abv` as `strength` FROM `beer-sample` as `Extent1` OFFSET 2) \
             as `Extent2` WHERE NOT (`Extent2`.`strength` > 4) LIMIT 1"
        );
    }

    #[rstest]
    fn test_on_keys_join(beers: Queryable) {
        let model = beers
            .join(
                "beer-sample",
                brewery_type(),
                |beer| beer.field("brewery_id"),
                |brewery| functions::key(brewery),
                |beer, brewery| {
                    Expr::new_object([("name", beer.field("name")), ("brewery", brewery.field("name"))])
                },
            )
            .build();

        assert_eq!(
            generate_query(&model, &context(ClusterVersion::new(4, 0, 0))).unwrap().statement,
            "SELECT `Extent1`.`name` as `name`, `Extent2`.`name` as `brewery` FROM `beer-sample` as `Extent1` \
             INNER JOIN `beer-sample` as `Extent2` ON KEYS `Extent1`.`brewery_id`"
        );
    }

    fn review_join(beers: Queryable) -> QueryModel {
        beers
            .left_join(
                "reviews",
                review_type(),
                |beer| functions::key(beer),
                |review| review.field("beer_id"),
                |beer, review| Expr::new_object([("beer", beer.clone()), ("rating", review.field("rating"))]),
            )
            .build()
    }

    #[rstest]
    fn test_index_join_at_threshold(beers: Queryable) {
        let plan = generate_query(&review_join(beers), &context(FeatureVersions::INDEX_JOIN)).unwrap();

        assert_eq!(
            plan.statement,
            "SELECT `Extent1` as `beer`, `Extent2`.`rating` as `rating` FROM `beer-sample` as `Extent1` \
             LEFT JOIN `reviews` as `Extent2` ON KEY `Extent2`.`beer_id` FOR `Extent1`"
        );
    }

    #[rstest]
    fn test_index_join_below_threshold_is_unsupported(beers: Queryable) {
        let result = generate_query(&review_join(beers), &context(ClusterVersion::new(4, 4, 9)));

        assert!(matches!(result, Err(N1qlError::UnsupportedTranslation(_))));
    }

    fn ansi_join(beers: Queryable) -> QueryModel {
        beers
            .join(
                "breweries",
                brewery_type(),
                |beer| beer.field("brewery_id"),
                |brewery| brewery.field("code"),
                |_, brewery| brewery.clone(),
            )
            .use_hash(HashHint::Probe)
            .build()
    }

    #[rstest]
    fn test_ansi_join_at_threshold(beers: Queryable) {
        let plan = generate_query(&ansi_join(beers), &context(FeatureVersions::ANSI_JOIN)).unwrap();

        assert_eq!(
            plan.statement,
            "SELECT `Extent2`.* FROM `beer-sample` as `Extent1` INNER JOIN `breweries` as `Extent2` \
             USE HASH(PROBE) ON (`Extent1`.`brewery_id` = `Extent2`.`code`)"
        );
    }

    #[rstest]
    #[case(ClusterVersion::new(5, 4, 9))]
    #[case(ClusterVersion::new(4, 5, 0))]
    fn test_ansi_join_below_threshold_is_unsupported(beers: Queryable, #[case] version: ClusterVersion) {
        let result = generate_query(&ansi_join(beers), &context(version));

        assert!(matches!(result, Err(N1qlError::UnsupportedTranslation(_))));
    }

    #[rstest]
    fn test_nest_on_keys() {
        let model = Queryable::from_bucket("beer-sample", brewery_type())
            .nest(
                "beer-sample",
                beer_type(),
                |brewery| brewery.field("beer_ids"),
                |brewery, beers| Expr::new_object([("name", brewery.field("name")), ("beers", beers.clone())]),
            )
            .build();

        assert_eq!(
            statement(&model),
            "SELECT `Extent1`.`name` as `name`, `Extent2` as `beers` FROM `beer-sample` as `Extent1` \
             INNER NEST `beer-sample` as `Extent2` ON KEYS `Extent1`.`beer_ids`"
        );
    }

    #[rstest]
    fn test_ansi_nest_requires_ansi_support() {
        let model = Queryable::from_bucket("beer-sample", brewery_type())
            .nest_on(
                "beer-sample",
                beer_type(),
                |brewery| brewery.field("code"),
                |beer| beer.field("brewery_id"),
                |brewery, beers| Expr::new_object([("name", brewery.field("name")), ("beers", beers.clone())]),
            )
            .build();

        assert_eq!(
            generate_query(&model, &context(FeatureVersions::ANSI_JOIN)).unwrap().statement,
            "SELECT `Extent1`.`name` as `name`, `Extent2` as `beers` FROM `beer-sample` as `Extent1` \
             INNER NEST `beer-sample` as `Extent2` ON (`Extent1`.`code` = `Extent2`.`brewery_id`)"
        );
        assert!(matches!(
            generate_query(&model, &context(ClusterVersion::new(5, 0, 0))),
            Err(N1qlError::UnsupportedTranslation(_))
        ));
    }

    #[rstest]
    fn test_unnest(beers: Queryable) {
        let model = beers
            .left_unnest(|b| b.field("tags"), |_, tag| tag.clone())
            .filter(|tag| tag.ne(""))
            .distinct()
            .build();

        assert_eq!(
            statement(&model),
            "SELECT DISTINCT RAW `Extent2` FROM `beer-sample` as `Extent1` \
             LEFT OUTER UNNEST `Extent1`.`tags` as `Extent2` WHERE (`Extent2` != '')"
        );
    }

    #[rstest]
    fn test_group_by_with_having(beers: Queryable) {
        let model = beers
            .filter(|b| b.field("abv").gt(5))
            .group_by(|b| b.field("style"))
            .filter(|g| g.count().gt(10))
            .select(|g| {
                Expr::new_object([
                    ("style", g.group_key()),
                    ("beers", g.count()),
                    ("strongest", g.max(|b| b.field("abv"))),
                ])
            })
            .order_by(|row| row.field("beers"))
            .build();

        assert_eq!(
            statement(&model),
            "SELECT `Extent1`.`style` as `style`, COUNT(*) as `beers`, MAX(`Extent1`.`abv`) as `strongest` \
             FROM `beer-sample` as `Extent1` WHERE (`Extent1`.`abv` > 5) GROUP BY `Extent1`.`style` \
             HAVING (COUNT(*) > 10) ORDER BY COUNT(*) ASC"
        );
    }

    #[rstest]
    fn test_selecting_a_grouping_is_unsupported(beers: Queryable) {
        let model = beers.group_by(|b| b.field("style")).build();

        assert!(matches!(
            generate_query(&model, &QueryGenerationContext::default()),
            Err(N1qlError::UnsupportedTranslation(_))
        ));
    }

    #[rstest]
    fn test_use_keys_index_and_explain(beers: Queryable) {
        let model = beers
            .use_keys(Expr::array(TypeRef::String, [Expr::constant("beer-1")]))
            .use_index("beer_by_name", IndexKind::Gsi)
            .explain()
            .build();

        assert_eq!(
            statement(&model),
            "EXPLAIN SELECT `Extent1`.* FROM `beer-sample` as `Extent1` USE KEYS ['beer-1'] \
             USE INDEX (`beer_by_name` USING GSI)"
        );
    }

    #[rstest]
    fn test_date_comparison_uses_milliseconds(beers: Queryable) {
        let cutoff = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let model = beers.filter(|b| b.field("brewed").ge(cutoff)).build();

        assert_eq!(
            statement(&model),
            "SELECT `Extent1`.* FROM `beer-sample` as `Extent1` \
             WHERE (STR_TO_MILLIS(`Extent1`.`brewed`) >= 1577836800000)"
        );
    }

    #[rstest]
    fn test_scan_consistency_is_carried(beers: Queryable) {
        let context = QueryGenerationContext::builder()
            .scan_consistency(ScanConsistency::RequestPlus)
            .build();

        let plan = generate_query(&beers.build(), &context).unwrap();

        assert_eq!(plan.scan_consistency, ScanConsistency::RequestPlus);
    }
}
