//! Rendering of expressions to N1QL text.
//!
//! [`ExpressionRenderer`] is a recursive-descent visitor over [`Expr`] that appends to
//! a single output buffer. It resolves member names through the context's
//! [`MemberNameResolver`](crate::naming::MemberNameResolver), dispatches method calls to
//! the translator registry, and applies serialization converters to literals compared
//! against converted members. Range variables are resolved through a [`RenderScope`],
//! which the query generator fills with extent aliases.
//!
//! Literal rules: strings are single-quoted with `'` doubled and `\` escaped, numbers use
//! invariant formatting, booleans render bare, null renders as `NULL`, and identifiers are
//! always backtick-quoted.

use chrono::SecondsFormat;
use std::{collections::HashMap, sync::Arc};

use crate::{
    context::QueryGenerationContext,
    convert::SerializationConverter,
    error::{N1qlError, N1qlResult},
    expression::{BinaryOp, ComparisonOp, ConversionDirection, Expr, UnaryOp, Value},
    method,
    query::{BodyClause, FromSource, QueryModel, QuerySource, ResultOperator},
    translators::MethodCall,
    types::{ConverterKind, MemberInfo, TypeRef},
};

/// Quotes an identifier with backticks.
pub fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Renders a string literal.
pub fn string_literal(value: &str) -> String {
    let mut literal = String::with_capacity(value.len() + 2);
    literal.push('\'');
    for c in value.chars() {
        match c {
            '\'' => literal.push_str("''"),
            '\\' => literal.push_str("\\\\"),
            other => literal.push(other),
        }
    }
    literal.push('\'');
    literal
}

/// What a range variable stands for while rendering.
#[derive(Debug, Clone)]
pub(crate) enum SourceBinding {
    /// An extent or iteration variable, rendered as its alias.
    Alias(String),
    /// A variable standing for another expression, such as a group element.
    Expr(Expr),
    /// A grouping; only its key and aggregates over its elements are renderable.
    Group { key: Expr, element: Expr },
}

/// Range-variable bindings and extent numbering for one statement.
#[derive(Debug, Default)]
pub struct RenderScope {
    bindings: HashMap<u32, SourceBinding>,
    next_extent: usize,
}

impl RenderScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `source` to the next `ExtentN` alias and returns the alias.
    pub fn bind_extent(&mut self, source: &QuerySource) -> String {
        self.next_extent += 1;
        let alias = format!("Extent{}", self.next_extent);
        self.bindings.insert(source.id, SourceBinding::Alias(alias.clone()));
        alias
    }

    /// Binds `source` to an explicit alias.
    pub fn bind_alias(&mut self, source: &QuerySource, alias: impl Into<String>) {
        self.bindings.insert(source.id, SourceBinding::Alias(alias.into()));
    }

    pub(crate) fn extent_count(&self) -> usize {
        self.next_extent
    }

    /// Makes the next extent alias follow `count` already used ones.
    pub(crate) fn continue_numbering(&mut self, count: usize) {
        self.next_extent = self.next_extent.max(count);
    }

    pub(crate) fn bind(&mut self, source_id: u32, binding: SourceBinding) {
        self.bindings.insert(source_id, binding);
    }

    pub(crate) fn unbind(&mut self, source_id: u32) {
        self.bindings.remove(&source_id);
    }

    pub(crate) fn binding(&self, source_id: u32) -> Option<&SourceBinding> {
        self.bindings.get(&source_id)
    }

    /// The alias bound to `source`, if it is an extent.
    pub fn alias_of(&self, source: &QuerySource) -> Option<&str> {
        match self.bindings.get(&source.id) {
            Some(SourceBinding::Alias(alias)) => Some(alias),
            _ => None,
        }
    }
}

/// Renders an expression with an empty scope; free parameters render as identifiers.
pub fn render_expression(expr: &Expr, context: &QueryGenerationContext) -> N1qlResult<String> {
    let mut scope = RenderScope::new();
    ExpressionRenderer::new(context, &mut scope).render(expr)
}

/// Appends N1QL text for expressions to an output buffer.
pub struct ExpressionRenderer<'a> {
    context: &'a QueryGenerationContext,
    scope: &'a mut RenderScope,
    buffer: String,
}

impl<'a> ExpressionRenderer<'a> {
    pub fn new(context: &'a QueryGenerationContext, scope: &'a mut RenderScope) -> Self {
        Self { context, scope, buffer: String::new() }
    }

    pub fn context(&self) -> &QueryGenerationContext {
        self.context
    }

    /// Renders `expr` and returns the text.
    pub fn render(mut self, expr: &Expr) -> N1qlResult<String> {
        self.visit(expr)?;
        Ok(self.buffer)
    }

    /// Renders `expr` into a separate string, keeping the current buffer intact.
    pub fn render_detached(&mut self, expr: &Expr) -> N1qlResult<String> {
        let saved = std::mem::take(&mut self.buffer);
        let result = self.visit(expr);
        let rendered = std::mem::replace(&mut self.buffer, saved);
        result.map(|_| rendered)
    }

    pub fn push_str(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Appends a literal value.
    pub fn push_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.push_str("NULL"),
            Value::Bool(value) => self.push_str(if *value { "true" } else { "false" }),
            Value::Int(value) => self.push_str(&value.to_string()),
            Value::Double(value) if value.is_finite() => self.push_str(&value.to_string()),
            Value::Double(_) => self.push_str("NULL"),
            Value::String(value) => self.push_str(&string_literal(value)),
            Value::DateTime(value) => {
                self.push_str(&string_literal(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            }
            Value::Enum { value, .. } => self.push_str(&value.to_string()),
            Value::Array(items) => {
                self.push_str("[");
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        self.push_str(", ");
                    }
                    self.push_value(item);
                }
                self.push_str("]");
            }
        }
    }

    /// Renders a comma-separated list.
    pub fn visit_list(&mut self, exprs: &[Expr]) -> N1qlResult<()> {
        for (index, expr) in exprs.iter().enumerate() {
            if index > 0 {
                self.push_str(", ");
            }
            self.visit(expr)?;
        }
        Ok(())
    }

    /// The serialized name of a member.
    pub fn member_name(&self, member: &MemberInfo) -> String {
        self.context
            .name_resolver
            .resolve(member)
            .unwrap_or_else(|| member.name.clone())
    }

    /// Returns true if `expr` yields values already in the representation of `kind`.
    pub fn is_stored_as(&self, expr: &Expr, kind: &ConverterKind) -> bool {
        match expr {
            Expr::Member { member, .. } => {
                self.context.serializer.converter_kind(member).as_ref() == Some(kind)
            }
            Expr::Call { method: called, target: Some(target), .. }
                if called.signature == method::datetime_date().signature =>
            {
                self.is_stored_as(target, kind)
            }
            _ => false,
        }
    }

    fn converter_of(&self, expr: &Expr) -> Option<Arc<dyn SerializationConverter>> {
        match expr {
            Expr::Member { member, .. } => self
                .context
                .converters
                .get_converter(member, self.context.serializer.as_ref())
                .cloned(),
            _ => None,
        }
    }

    pub fn visit(&mut self, expr: &Expr) -> N1qlResult<()> {
        match expr {
            Expr::Constant(constant) => {
                self.push_value(&constant.value);
                Ok(())
            }
            Expr::Parameter { name, .. } => {
                self.push_str(&escape_identifier(name));
                Ok(())
            }
            Expr::QuerySource(source) => self.visit_query_source(source),
            Expr::Member { target, member } => self.visit_member(target, member),
            Expr::Unary { op, operand, .. } => self.visit_unary(*op, operand),
            Expr::Binary { op, left, right } => self.visit_binary(*op, left, right),
            Expr::Conditional { test, if_true, if_false } => {
                self.push_str("CASE WHEN ");
                self.visit(test)?;
                self.push_str(" THEN ");
                self.visit(if_true)?;
                self.push_str(" ELSE ");
                self.visit(if_false)?;
                self.push_str(" END");
                Ok(())
            }
            Expr::Call { target, method, args } => {
                let translator = self.context.method_translators.translator_for(method)?;
                let call = MethodCall { target: target.as_deref(), method, args };
                translator.translate(&call, self)
            }
            Expr::New { members } => self.visit_object_literal(members),
            Expr::Array { items, .. } => {
                self.push_str("[");
                self.visit_list(items)?;
                self.push_str("]");
                Ok(())
            }
            Expr::SubQuery(model) => self.visit_subquery(model),
            Expr::StringComparison { op, left, right } => self.visit_comparison(*op, left, right),
            Expr::Conversion { direction, kind, operand, ty } => {
                self.visit_conversion(*direction, kind, operand, ty)
            }
        }
    }

    fn visit_query_source(&mut self, source: &QuerySource) -> N1qlResult<()> {
        match self.scope.binding(source.id).cloned() {
            Some(SourceBinding::Alias(alias)) => {
                self.push_str(&escape_identifier(&alias));
                Ok(())
            }
            Some(SourceBinding::Expr(expr)) => self.visit(&expr),
            Some(SourceBinding::Group { .. }) => Err(N1qlError::UnsupportedTranslation(format!(
                "grouping {} can only be used through its key or aggregates",
                source.name
            ))),
            None => Err(N1qlError::InvalidShape(format!(
                "query source {} is not in scope",
                source.name
            ))),
        }
    }

    fn visit_member(&mut self, target: &Expr, member: &MemberInfo) -> N1qlResult<()> {
        if let Expr::QuerySource(source) = target {
            if let Some(SourceBinding::Group { key, .. }) = self.scope.binding(source.id).cloned() {
                if member.name == "Key" {
                    return self.visit(&key);
                }
            }
        }

        self.visit(target)?;
        self.push_str(".");
        let name = self.member_name(member);
        self.push_str(&escape_identifier(&name));
        Ok(())
    }

    fn visit_unary(&mut self, op: UnaryOp, operand: &Expr) -> N1qlResult<()> {
        match op {
            UnaryOp::Not => {
                self.push_str("NOT ");
                self.visit(operand)
            }
            UnaryOp::Negate => {
                self.push_str("-");
                let start = self.buffer.len();
                self.visit(operand)?;
                // `--` starts a line comment.
                if self.buffer[start..].starts_with('-') {
                    self.buffer.insert(start, '(');
                    self.buffer.push(')');
                }
                Ok(())
            }
            // Conversions with serialization impact are rewritten by the normalizer.
            UnaryOp::Convert => self.visit(operand),
        }
    }

    fn visit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> N1qlResult<()> {
        if let Some(comparison) = op.comparison() {
            return self.visit_comparison(comparison, left, right);
        }

        let operator = match op {
            BinaryOp::AndAlso => " AND ",
            BinaryOp::OrElse => " OR ",
            BinaryOp::Add if left.ty().is_string() || right.ty().is_string() => " || ",
            BinaryOp::Add => " + ",
            BinaryOp::Subtract => " - ",
            BinaryOp::Multiply => " * ",
            BinaryOp::Divide => " / ",
            BinaryOp::Modulo => " % ",
            BinaryOp::Coalesce => {
                self.push_str("IFMISSINGORNULL(");
                self.visit(left)?;
                self.push_str(", ");
                self.visit(right)?;
                self.push_str(")");
                return Ok(());
            }
            comparison => {
                return Err(N1qlError::UnsupportedTranslation(format!(
                    "binary operator {comparison:?}"
                )));
            }
        };

        self.push_str("(");
        self.visit(left)?;
        self.push_str(operator);
        self.visit(right)?;
        self.push_str(")");
        Ok(())
    }

    fn visit_comparison(&mut self, op: ComparisonOp, left: &Expr, right: &Expr) -> N1qlResult<()> {
        if matches!(op, ComparisonOp::Equal | ComparisonOp::NotEqual) {
            let operand = match (left.is_null_constant(), right.is_null_constant()) {
                (_, true) => Some(left),
                (true, false) => Some(right),
                (false, false) => None,
            };
            if let Some(operand) = operand {
                self.push_str("(");
                self.visit(operand)?;
                self.push_str(if op == ComparisonOp::Equal { " IS NULL)" } else { " IS NOT NULL)" });
                return Ok(());
            }
        }

        self.push_str("(");
        self.visit_aligned(left, right)?;
        self.push_str(" ");
        self.push_str(op.symbol());
        self.push_str(" ");
        self.visit_aligned(right, left)?;
        self.push_str(")");
        Ok(())
    }

    /// Renders `expr`; a literal compared with a converted member is rendered in the
    /// member's stored representation.
    fn visit_aligned(&mut self, expr: &Expr, other: &Expr) -> N1qlResult<()> {
        if let Expr::Constant(constant) = expr {
            if let Some(converter) = self.converter_of(other) {
                return converter.render_constant(constant, self);
            }
        }
        self.visit(expr)
    }

    fn visit_object_literal(&mut self, members: &[(String, Expr)]) -> N1qlResult<()> {
        self.push_str("{");
        for (index, (name, expr)) in members.iter().enumerate() {
            if index > 0 {
                self.push_str(", ");
            }
            self.push_str(&serde_json::to_string(name)?);
            self.push_str(": ");
            self.visit(expr)?;
        }
        self.push_str("}");
        Ok(())
    }

    fn visit_conversion(
        &mut self,
        direction: ConversionDirection,
        kind: &ConverterKind,
        operand: &Expr,
        ty: &TypeRef,
    ) -> N1qlResult<()> {
        if let Expr::Conversion { direction: inner_direction, kind: inner_kind, operand: inner, .. } =
            operand
        {
            if inner_kind == kind && *inner_direction != direction {
                return self.visit(inner);
            }
        }

        let converter = self.context.converters.get(kind).cloned().ok_or_else(|| {
            N1qlError::UnsupportedTranslation(format!("no converter registered for {kind:?}"))
        })?;

        match (direction, operand) {
            (ConversionDirection::To, Expr::Constant(constant)) => {
                converter.render_constant(constant, self)
            }
            (ConversionDirection::To, operand) if self.is_stored_as(operand, kind) => {
                self.visit(operand)
            }
            (ConversionDirection::To, operand) => converter.render_to(operand, self),
            (ConversionDirection::From, operand) => converter.render_from(operand, ty, self),
        }
    }

    fn visit_subquery(&mut self, model: &QueryModel) -> N1qlResult<()> {
        let collection = match &model.main_from.from {
            FromSource::Expr(collection) => collection,
            FromSource::Bucket(bucket) => {
                return Err(N1qlError::UnsupportedTranslation(format!(
                    "nested query over bucket {bucket}"
                )));
            }
        };

        if let Expr::QuerySource(group) = collection {
            if let Some(SourceBinding::Group { element, .. }) = self.scope.binding(group.id).cloned() {
                return self.visit_group_aggregate(model, element);
            }
        }

        let mut predicates = Vec::new();
        for clause in &model.body_clauses {
            match clause {
                BodyClause::Where(predicate) => predicates.push(predicate.clone()),
                other => {
                    return Err(N1qlError::UnsupportedTranslation(format!(
                        "clause {other:?} inside a collection subquery"
                    )));
                }
            }
        }
        let filter = predicates.into_iter().reduce(|left, right| left.and(right));

        let item = &model.main_from.source;
        self.scope.next_extent += 1;
        let alias = format!("Extent{}", self.scope.next_extent);
        self.scope.bind_alias(item, alias.clone());

        let result = self.visit_collection_operator(model, collection, &alias, filter.as_ref());
        self.scope.unbind(item.id);
        result
    }

    fn visit_collection_operator(
        &mut self,
        model: &QueryModel,
        collection: &Expr,
        alias: &str,
        filter: Option<&Expr>,
    ) -> N1qlResult<()> {
        let alias = escape_identifier(alias);

        match (model.scalar_operator(), filter) {
            (Some(ResultOperator::Any), None) => {
                self.push_str("(ARRAY_LENGTH(");
                self.visit(collection)?;
                self.push_str(") > 0)");
            }
            (Some(ResultOperator::Any), Some(filter)) => {
                self.push_str(&format!("ANY {alias} IN "));
                self.visit(collection)?;
                self.push_str(" SATISFIES ");
                self.visit(filter)?;
                self.push_str(" END");
            }
            (Some(ResultOperator::All(predicate)), filter) => {
                let condition = match filter {
                    Some(filter) => filter.not().or(predicate),
                    None => predicate.clone(),
                };
                self.push_str(&format!("EVERY {alias} IN "));
                self.visit(collection)?;
                self.push_str(" SATISFIES ");
                self.visit(&condition)?;
                self.push_str(" END");
            }
            (Some(ResultOperator::Contains(value)), None)
                if model.select != Expr::source(&model.main_from.source) =>
            {
                self.push_str(&format!("ANY {alias} IN "));
                self.visit(collection)?;
                self.push_str(" SATISFIES ");
                self.visit(&model.select.eq(value))?;
                self.push_str(" END");
            }
            (Some(ResultOperator::Contains(value)), None) => {
                self.push_str("(");
                self.visit(value)?;
                self.push_str(" IN ");
                self.visit(collection)?;
                self.push_str(")");
            }
            (Some(ResultOperator::Contains(value)), Some(filter)) => {
                let condition = filter.and(model.select.eq(value));
                self.push_str(&format!("ANY {alias} IN "));
                self.visit(collection)?;
                self.push_str(" SATISFIES ");
                self.visit(&condition)?;
                self.push_str(" END");
            }
            (Some(ResultOperator::Count | ResultOperator::LongCount), None) => {
                self.push_str("ARRAY_LENGTH(");
                self.visit(collection)?;
                self.push_str(")");
            }
            (Some(operator), filter) => {
                let (prefix, suffix) = match operator {
                    ResultOperator::Count | ResultOperator::LongCount => ("ARRAY_COUNT(", ")"),
                    ResultOperator::Sum => ("ARRAY_SUM(", ")"),
                    ResultOperator::Average => ("ARRAY_AVG(", ")"),
                    ResultOperator::Min => ("ARRAY_MIN(", ")"),
                    ResultOperator::Max => ("ARRAY_MAX(", ")"),
                    ResultOperator::First | ResultOperator::FirstOrDefault => ("(", ")[0]"),
                    other => {
                        return Err(N1qlError::UnsupportedTranslation(format!(
                            "{} over a collection member",
                            other.name()
                        )));
                    }
                };
                self.push_str(prefix);
                self.visit_array_comprehension(&model.select, collection, &alias, filter)?;
                self.push_str(suffix);
            }
            (None, filter) => self.visit_array_comprehension(&model.select, collection, &alias, filter)?,
        }
        Ok(())
    }

    fn visit_array_comprehension(
        &mut self,
        select: &Expr,
        collection: &Expr,
        alias: &str,
        filter: Option<&Expr>,
    ) -> N1qlResult<()> {
        self.push_str("ARRAY ");
        self.visit(select)?;
        self.push_str(&format!(" FOR {alias} IN "));
        self.visit(collection)?;
        if let Some(filter) = filter {
            self.push_str(" WHEN ");
            self.visit(filter)?;
        }
        self.push_str(" END");
        Ok(())
    }

    fn visit_group_aggregate(&mut self, model: &QueryModel, element: Expr) -> N1qlResult<()> {
        if !model.body_clauses.is_empty() {
            return Err(N1qlError::UnsupportedTranslation(
                "filtered aggregates over a grouping".to_string(),
            ));
        }

        let item = &model.main_from.source;
        self.scope.bind(item.id, SourceBinding::Expr(element));

        let distinct = if model.result_operators.contains(&ResultOperator::Distinct) {
            "DISTINCT "
        } else {
            ""
        };
        let result = match model.scalar_operator() {
            Some(ResultOperator::Count | ResultOperator::LongCount) if distinct.is_empty() => {
                self.push_str("COUNT(*)");
                Ok(())
            }
            Some(operator) => {
                let function = match operator {
                    ResultOperator::Count | ResultOperator::LongCount => Some("COUNT"),
                    ResultOperator::Sum => Some("SUM"),
                    ResultOperator::Average => Some("AVG"),
                    ResultOperator::Min => Some("MIN"),
                    ResultOperator::Max => Some("MAX"),
                    _ => None,
                };
                match function {
                    Some(function) => {
                        self.push_str(function);
                        self.push_str("(");
                        self.push_str(distinct);
                        let rendered = self.visit(&model.select);
                        self.push_str(")");
                        rendered
                    }
                    None => Err(N1qlError::UnsupportedTranslation(format!(
                        "{} over a grouping",
                        operator.name()
                    ))),
                }
            }
            None => Err(N1qlError::UnsupportedTranslation(
                "projection of grouping elements".to_string(),
            )),
        };

        self.scope.unbind(item.id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::QueryGenerationContext,
        expression::Expr,
        query::MainFromClause,
        types::{EnumType, MemberAttributes, ObjectType},
    };
    use chrono::{FixedOffset, TimeZone, Utc};
    use rstest::{fixture, rstest};

    #[fixture]
    fn context() -> QueryGenerationContext {
        QueryGenerationContext::default()
    }

    fn status() -> Arc<EnumType> {
        Arc::new(EnumType::new("Status", [("Active", 1), ("Retired", 2)]))
    }

    fn beer() -> Expr {
        Expr::parameter(
            "b",
            ObjectType::builder("Beer")
                .member("name", TypeRef::String)
                .member("abv", TypeRef::Double)
                .member("tags", TypeRef::collection_of(TypeRef::String))
                .member("status", TypeRef::Enum(status()))
                .member_with(
                    "label",
                    TypeRef::Enum(status()),
                    MemberAttributes::default().with_converter(ConverterKind::StringEnum),
                )
                .member_with("brewery_id", TypeRef::String, MemberAttributes::default().renamed("brewery"))
                .build_type(),
        )
    }

    fn render(expr: &Expr, context: &QueryGenerationContext) -> String {
        render_expression(expr, context).unwrap()
    }

    #[rstest]
    #[case(Expr::constant("it's"), "'it''s'")]
    #[case(Expr::constant("a\\b"), "'a\\\\b'")]
    #[case(Expr::constant(1_234_567), "1234567")]
    #[case(Expr::constant(5.5), "5.5")]
    #[case(Expr::constant(true), "true")]
    #[case(Expr::null(TypeRef::String), "NULL")]
    #[case(Expr::constant(vec![1, 2]), "[1, 2]")]
    fn test_literals(context: QueryGenerationContext, #[case] expr: Expr, #[case] expected: &str) {
        assert_eq!(render(&expr, &context), expected);
    }

    #[rstest]
    fn test_date_literals_are_iso_8601(context: QueryGenerationContext) {
        let utc = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let offset = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2020, 1, 1, 12, 30, 0)
            .unwrap();

        assert_eq!(render(&Expr::constant(utc), &context), "'2020-01-01T00:00:00Z'");
        assert_eq!(render(&Expr::constant(offset), &context), "'2020-01-01T12:30:00+02:00'");
    }

    #[rstest]
    fn test_identifiers_are_escaped(context: QueryGenerationContext) {
        assert_eq!(render(&beer().field("brewery_id"), &context), "`b`.`brewery`");
        assert_eq!(
            render(&Expr::parameter("beer-sample", TypeRef::Dynamic), &context),
            "`beer-sample`"
        );
    }

    #[rstest]
    #[case(beer().field("abv").gt(5).and(beer().field("name").ne("x")), "((`b`.`abv` > 5) AND (`b`.`name` != 'x'))")]
    #[case(beer().field("name").eq(Expr::null(TypeRef::String)), "(`b`.`name` IS NULL)")]
    #[case(Expr::null(TypeRef::String).ne(beer().field("name")), "(`b`.`name` IS NOT NULL)")]
    #[case(beer().field("name").add("!"), "(`b`.`name` || '!')")]
    #[case(beer().field("abv").mul(2).negate(), "-(`b`.`abv` * 2)")]
    #[case(Expr::constant(-5).negate(), "-(-5)")]
    #[case(beer().field("abv").negate().negate(), "-(-`b`.`abv`)")]
    #[case(beer().field("name").coalesce("unknown"), "IFMISSINGORNULL(`b`.`name`, 'unknown')")]
    #[case(beer().field("abv").gt(5).not(), "NOT (`b`.`abv` > 5)")]
    #[case(
        Expr::conditional(beer().field("abv").gt(5), "strong", "light"),
        "CASE WHEN (`b`.`abv` > 5) THEN 'strong' ELSE 'light' END"
    )]
    #[case(
        Expr::new_object([("n", beer().field("name"))]),
        "{\"n\": `b`.`name`}"
    )]
    fn test_operators(context: QueryGenerationContext, #[case] expr: Expr, #[case] expected: &str) {
        assert_eq!(render(&expr, &context), expected);
    }

    #[rstest]
    fn test_enum_constant_renders_numerically_without_converter(context: QueryGenerationContext) {
        let expr = beer().field("status").eq(Expr::enum_constant(&status(), 2));

        assert_eq!(render(&expr, &context), "(`b`.`status` = 2)");
    }

    #[rstest]
    fn test_enum_constant_aligned_with_string_enum_member(context: QueryGenerationContext) {
        let expr = beer().field("label").eq(Expr::enum_constant(&status(), 2));

        assert_eq!(render(&expr, &context), "(`b`.`label` = 'Retired')");
    }

    #[rstest]
    fn test_any_with_predicate(context: QueryGenerationContext) {
        let expr = beer().field("tags").any(|tag| tag.eq("ipa"));

        assert_eq!(
            render(&expr, &context),
            "ANY `Extent1` IN `b`.`tags` SATISFIES (`Extent1` = 'ipa') END"
        );
    }

    #[rstest]
    fn test_any_without_predicate(context: QueryGenerationContext) {
        assert_eq!(render(&beer().field("tags").any_item(), &context), "(ARRAY_LENGTH(`b`.`tags`) > 0)");
    }

    #[rstest]
    fn test_all(context: QueryGenerationContext) {
        let expr = beer().field("tags").all(|tag| tag.ne(""));

        assert_eq!(
            render(&expr, &context),
            "EVERY `Extent1` IN `b`.`tags` SATISFIES (`Extent1` != '') END"
        );
    }

    fn tags_query(select: impl FnOnce(&Expr) -> Expr, value: Expr) -> Expr {
        let item = QuerySource::new("t", TypeRef::String);
        let model = QueryModel::new(
            MainFromClause { source: item.clone(), from: FromSource::Expr(beer().field("tags")) },
            select(&Expr::source(&item)),
        )
        .with_result_operator(ResultOperator::Contains(value));

        Expr::SubQuery(Box::new(model))
    }

    #[rstest]
    fn test_contains_over_items(context: QueryGenerationContext) {
        let expr = tags_query(|tag| tag.clone(), Expr::constant("ipa"));

        assert_eq!(render(&expr, &context), "('ipa' IN `b`.`tags`)");
    }

    #[rstest]
    fn test_contains_over_projected_items(context: QueryGenerationContext) {
        let expr = tags_query(|tag| tag.length(), Expr::constant(3));

        assert_eq!(
            render(&expr, &context),
            "ANY `Extent1` IN `b`.`tags` SATISFIES (LENGTH(`Extent1`) = 3) END"
        );
    }

    #[rstest]
    fn test_collection_aggregates(context: QueryGenerationContext) {
        assert_eq!(render(&beer().field("tags").count(), &context), "ARRAY_LENGTH(`b`.`tags`)");
        assert_eq!(
            render(&beer().field("tags").max(|tag| tag.length()), &context),
            "ARRAY_MAX(ARRAY LENGTH(`Extent1`) FOR `Extent1` IN `b`.`tags` END)"
        );
    }

    #[rstest]
    fn test_unbound_source_is_rejected(context: QueryGenerationContext) {
        let source = QuerySource::new("b", TypeRef::Dynamic);

        assert!(matches!(
            render_expression(&Expr::source(&source), &context),
            Err(N1qlError::InvalidShape(_))
        ));
    }

    #[rstest]
    fn test_unfolded_string_compare_is_unsupported(context: QueryGenerationContext) {
        let expr = Expr::string_compare(beer().field("name"), "m");

        assert!(matches!(
            render_expression(&expr, &context),
            Err(N1qlError::UnsupportedTranslation(_))
        ));
    }
}
