//! Fluent construction of [`QueryModel`]s.
//!
//! [`Queryable`] plays the role of the LINQ query provider front end: every method
//! appends a clause or result operator, and closures receive the current row
//! expression so predicates and projections are written against typed members.
//!
//! ```ignore
//! let model = Queryable::of::<Beer>("beer-sample")
//!     .join(
//!         "beer-sample",
//!         Brewery::type_ref(),
//!         |beer| beer.field("brewery_id"),
//!         |brewery| functions::key(brewery),
//!         |beer, brewery| Expr::new_object([("name", beer.field("name")), ("brewery", brewery.field("name"))]),
//!     )
//!     .filter(|row| row.field("name").starts_with("A"))
//!     .build();
//! ```

use crate::{
    expression::{Expr, IntoExpr},
    query::{
        AdditionalFromClause, BodyClause, FromSource, GroupByClause, HashHint, IndexKind,
        JoinClause, JoinKind, MainFromClause, NestClause, Ordering, QueryModel, QuerySource,
        ResultOperator, SortDirection,
    },
    types::{Model, TypeRef},
};

/// Builder for [`QueryModel`]s.
#[derive(Debug, Clone)]
pub struct Queryable {
    main_from: MainFromClause,
    body_clauses: Vec<BodyClause>,
    current: Expr,
    result_operators: Vec<ResultOperator>,
}

fn display_name(ty: &TypeRef) -> String {
    ty.name()
        .chars()
        .next()
        .map(|c| c.to_ascii_lowercase().to_string())
        .unwrap_or_else(|| "x".to_string())
}

impl Queryable {
    /// Starts a query over a bucket whose documents have the given type.
    ///
    /// # Arguments
    ///
    /// * `bucket` - The bucket (keyspace) name
    /// * `item_type` - The document type
    pub fn from_bucket(bucket: impl Into<String>, item_type: TypeRef) -> Self {
        let source = QuerySource::new(display_name(&item_type), item_type);

        Self {
            current: Expr::source(&source),
            main_from: MainFromClause { source, from: FromSource::Bucket(bucket.into()) },
            body_clauses: Vec::new(),
            result_operators: Vec::new(),
        }
    }

    /// Starts a query over a bucket of `T` documents.
    pub fn of<T: Model>(bucket: impl Into<String>) -> Self {
        Self::from_bucket(bucket, T::type_ref())
    }

    /// The expression representing the current row.
    pub fn current(&self) -> &Expr {
        &self.current
    }

    /// The range variable of the main from clause.
    pub fn main_source(&self) -> &QuerySource {
        &self.main_from.source
    }

    /// Adds a `where` clause.
    pub fn filter(self, predicate: impl FnOnce(&Expr) -> Expr) -> Self {
        let mut this = self.close_window();
        let predicate = predicate(&this.current);
        this.body_clauses.push(BodyClause::Where(predicate));
        this
    }

    /// Clauses written after `take`/`skip` see only the windowed rows, so the query
    /// built so far becomes a derived extent of a new outer query.
    fn close_window(self) -> Self {
        let windowed = self.result_operators.iter().any(|operator| {
            matches!(operator, ResultOperator::Take(_) | ResultOperator::Skip(_))
        });
        if !windowed {
            return self;
        }

        let outer = self.build().into_derived();
        Self {
            current: outer.select,
            main_from: outer.main_from,
            body_clauses: outer.body_clauses,
            result_operators: outer.result_operators,
        }
    }

    /// Replaces the current row with a projection of it.
    pub fn select(mut self, selector: impl FnOnce(&Expr) -> Expr) -> Self {
        self.current = selector(&self.current);
        self
    }

    pub fn order_by(self, key: impl FnOnce(&Expr) -> Expr) -> Self {
        self.push_ordering(key, SortDirection::Asc, false)
    }

    pub fn order_by_descending(self, key: impl FnOnce(&Expr) -> Expr) -> Self {
        self.push_ordering(key, SortDirection::Desc, false)
    }

    pub fn then_by(self, key: impl FnOnce(&Expr) -> Expr) -> Self {
        self.push_ordering(key, SortDirection::Asc, true)
    }

    pub fn then_by_descending(self, key: impl FnOnce(&Expr) -> Expr) -> Self {
        self.push_ordering(key, SortDirection::Desc, true)
    }

    fn push_ordering(
        self,
        key: impl FnOnce(&Expr) -> Expr,
        direction: SortDirection,
        append: bool,
    ) -> Self {
        let mut this = self.close_window();
        let ordering = Ordering { expr: key(&this.current), direction };

        match this.body_clauses.last_mut() {
            Some(BodyClause::OrderBy(orderings)) if append => orderings.push(ordering),
            _ => this.body_clauses.push(BodyClause::OrderBy(vec![ordering])),
        }
        this
    }


    /// Adds an inner join against another bucket.
    ///
    /// # Arguments
    ///
    /// * `bucket` - The joined bucket
    /// * `item_type` - The document type of the joined bucket
    /// * `outer_key` - Key selector over the current row
    /// * `inner_key` - Key selector over the joined document
    /// * `result` - Projection combining the current row and the joined document
    pub fn join(
        self,
        bucket: impl Into<String>,
        item_type: TypeRef,
        outer_key: impl FnOnce(&Expr) -> Expr,
        inner_key: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
    ) -> Self {
        self.push_join(bucket, item_type, outer_key, inner_key, result, JoinKind::Inner)
    }

    /// Adds a `DefaultIfEmpty`-qualified join, rendered as a left outer join.
    pub fn left_join(
        self,
        bucket: impl Into<String>,
        item_type: TypeRef,
        outer_key: impl FnOnce(&Expr) -> Expr,
        inner_key: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
    ) -> Self {
        self.push_join(bucket, item_type, outer_key, inner_key, result, JoinKind::LeftOuter)
    }

    fn push_join(
        self,
        bucket: impl Into<String>,
        item_type: TypeRef,
        outer_key: impl FnOnce(&Expr) -> Expr,
        inner_key: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
        kind: JoinKind,
    ) -> Self {
        let mut this = self.close_window();
        let source = QuerySource::new(display_name(&item_type), item_type);
        let inner = Expr::source(&source);
        let clause = JoinClause {
            outer_key: outer_key(&this.current),
            inner_key: inner_key(&inner),
            bucket: bucket.into(),
            source,
            kind,
            hash_hint: None,
        };

        this.current = result(&this.current, &inner);
        this.body_clauses.push(BodyClause::Join(clause));
        this
    }

    /// Adds a hash join hint to the most recent join.
    pub fn use_hash(mut self, hint: HashHint) -> Self {
        if let Some(BodyClause::Join(join)) = self
            .body_clauses
            .iter_mut()
            .rev()
            .find(|clause| matches!(clause, BodyClause::Join(_)))
        {
            join.hash_hint = Some(hint);
        }
        self
    }

    /// Nests the documents whose keys are listed by `outer_keys`.
    ///
    /// The `result` closure receives the collection of nested documents.
    pub fn nest(
        self,
        bucket: impl Into<String>,
        item_type: TypeRef,
        outer_keys: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
    ) -> Self {
        self.push_nest(bucket, item_type, outer_keys, None::<fn(&Expr) -> Expr>, result, JoinKind::Inner)
    }

    /// Left outer variant of [`nest`](Self::nest).
    pub fn left_nest(
        self,
        bucket: impl Into<String>,
        item_type: TypeRef,
        outer_keys: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
    ) -> Self {
        self.push_nest(
            bucket,
            item_type,
            outer_keys,
            None::<fn(&Expr) -> Expr>,
            result,
            JoinKind::LeftOuter,
        )
    }

    /// Nests the documents whose `inner_key` equals `outer_key`, as an ANSI nest.
    ///
    /// The `inner_key` closure receives a single nested document.
    pub fn nest_on(
        self,
        bucket: impl Into<String>,
        item_type: TypeRef,
        outer_key: impl FnOnce(&Expr) -> Expr,
        inner_key: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
    ) -> Self {
        self.push_nest(bucket, item_type, outer_key, Some(inner_key), result, JoinKind::Inner)
    }

    fn push_nest(
        self,
        bucket: impl Into<String>,
        item_type: TypeRef,
        outer_keys: impl FnOnce(&Expr) -> Expr,
        inner_key: Option<impl FnOnce(&Expr) -> Expr>,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
        kind: JoinKind,
    ) -> Self {
        let mut this = self.close_window();
        let source = QuerySource::new(display_name(&item_type), TypeRef::collection_of(item_type.clone()));
        let nested = Expr::source(&source);
        // The inner key is written against one nested document, which renders as the extent.
        let single = Expr::QuerySource(QuerySource { item_type, ..source.clone() });

        let clause = NestClause {
            outer_keys: outer_keys(&this.current),
            inner_key: inner_key.map(|key| key(&single)),
            bucket: bucket.into(),
            source,
            kind,
        };

        this.current = result(&this.current, &nested);
        this.body_clauses.push(BodyClause::Nest(clause));
        this
    }

    /// Flattens a collection member of the current row (`from x in row.Items`).
    pub fn unnest(
        self,
        collection: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
    ) -> Self {
        self.push_unnest(collection, result, JoinKind::Inner)
    }

    /// Left outer variant of [`unnest`](Self::unnest).
    pub fn left_unnest(
        self,
        collection: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
    ) -> Self {
        self.push_unnest(collection, result, JoinKind::LeftOuter)
    }

    fn push_unnest(
        self,
        collection: impl FnOnce(&Expr) -> Expr,
        result: impl FnOnce(&Expr, &Expr) -> Expr,
        kind: JoinKind,
    ) -> Self {
        let mut this = self.close_window();
        let collection = collection(&this.current);
        let element = collection.ty().element_type().cloned().unwrap_or(TypeRef::Dynamic);
        let source = QuerySource::new(display_name(&element), element);
        let item = Expr::source(&source);

        this.current = result(&this.current, &item);
        this.body_clauses.push(BodyClause::AdditionalFrom(AdditionalFromClause {
            source,
            collection,
            kind,
        }));
        this
    }

    /// Groups the current rows by `key`; the new current row is the grouping.
    pub fn group_by(self, key: impl FnOnce(&Expr) -> Expr) -> Self {
        self.group_by_element(key, |row| row.clone())
    }

    /// Groups by `key`, with `element` selecting what each group contains.
    pub fn group_by_element(
        self,
        key: impl FnOnce(&Expr) -> Expr,
        element: impl FnOnce(&Expr) -> Expr,
    ) -> Self {
        let mut this = self.close_window();
        let key = key(&this.current);
        let element = element(&this.current);
        let source = QuerySource::new(
            "g",
            TypeRef::Grouping { key: Box::new(key.ty()), element: Box::new(element.ty()) },
        );

        this.current = Expr::source(&source);
        this.body_clauses.push(BodyClause::GroupBy(GroupByClause { source, key, element }));
        this
    }

    /// Removes duplicate rows; after `take`/`skip`, only among the windowed rows.
    pub fn distinct(self) -> Self {
        self.close_window().push_operator(ResultOperator::Distinct)
    }

    pub fn take(self, count: usize) -> Self {
        self.push_operator(ResultOperator::Take(count))
    }

    pub fn skip(self, count: usize) -> Self {
        self.push_operator(ResultOperator::Skip(count))
    }

    /// Restricts the main extent to the given document keys.
    pub fn use_keys(self, keys: impl IntoExpr) -> Self {
        self.push_operator(ResultOperator::UseKeys(keys.into_expr()))
    }

    pub fn use_index(self, name: impl Into<String>, kind: IndexKind) -> Self {
        self.push_operator(ResultOperator::UseIndex { name: name.into(), kind })
    }

    /// Prefixes the statement with `EXPLAIN`.
    pub fn explain(self) -> Self {
        self.push_operator(ResultOperator::Explain)
    }

    fn push_operator(mut self, operator: ResultOperator) -> Self {
        self.result_operators.push(operator);
        self
    }

    pub fn count(self) -> QueryModel {
        self.push_operator(ResultOperator::Count).build()
    }

    pub fn long_count(self) -> QueryModel {
        self.push_operator(ResultOperator::LongCount).build()
    }

    pub fn any(self) -> QueryModel {
        self.push_operator(ResultOperator::Any).build()
    }

    pub fn any_where(self, predicate: impl FnOnce(&Expr) -> Expr) -> QueryModel {
        self.filter(predicate).any()
    }

    pub fn all(self, predicate: impl FnOnce(&Expr) -> Expr) -> QueryModel {
        let predicate = predicate(&self.current);
        self.push_operator(ResultOperator::All(predicate)).build()
    }

    pub fn contains(self, value: impl IntoExpr) -> QueryModel {
        self.push_operator(ResultOperator::Contains(value.into_expr())).build()
    }

    pub fn sum(self, selector: impl FnOnce(&Expr) -> Expr) -> QueryModel {
        self.select(selector).push_operator(ResultOperator::Sum).build()
    }

    pub fn average(self, selector: impl FnOnce(&Expr) -> Expr) -> QueryModel {
        self.select(selector).push_operator(ResultOperator::Average).build()
    }

    pub fn min(self, selector: impl FnOnce(&Expr) -> Expr) -> QueryModel {
        self.select(selector).push_operator(ResultOperator::Min).build()
    }

    pub fn max(self, selector: impl FnOnce(&Expr) -> Expr) -> QueryModel {
        self.select(selector).push_operator(ResultOperator::Max).build()
    }

    pub fn first(self) -> QueryModel {
        self.push_operator(ResultOperator::First).build()
    }

    pub fn first_or_default(self) -> QueryModel {
        self.push_operator(ResultOperator::FirstOrDefault).build()
    }

    pub fn single(self) -> QueryModel {
        self.push_operator(ResultOperator::Single).build()
    }

    pub fn single_or_default(self) -> QueryModel {
        self.push_operator(ResultOperator::SingleOrDefault).build()
    }

    /// Builds the query model; the select clause is the current row.
    pub fn build(self) -> QueryModel {
        QueryModel {
            main_from: self.main_from,
            body_clauses: self.body_clauses,
            select: self.current,
            result_operators: self.result_operators,
        }
    }
}
