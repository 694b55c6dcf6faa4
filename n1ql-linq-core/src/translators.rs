//! Method-call translation.
//!
//! Every method call that reaches the renderer is dispatched through the
//! [`MethodCallTranslatorRegistry`] by its [`MethodSignature`]. Methods carrying a
//! N1QL function mapping (see [`MethodInfo::with_n1ql_function`]) are translated as plain
//! function calls even when they are not registered. Anything else fails with
//! [`N1qlError::UnsupportedTranslation`] naming the method.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, OnceLock},
};

use crate::{
    error::{N1qlError, N1qlResult},
    expression::{Expr, Value},
    method::{self, MethodInfo, MethodSignature},
    render::ExpressionRenderer,
    types::ConverterKind,
};

/// A method call as seen by a translator.
#[derive(Debug, Clone, Copy)]
pub struct MethodCall<'e> {
    pub target: Option<&'e Expr>,
    pub method: &'e MethodInfo,
    pub args: &'e [Expr],
}

impl<'e> MethodCall<'e> {
    pub fn target(&self) -> N1qlResult<&'e Expr> {
        self.target.ok_or_else(|| {
            N1qlError::InvalidShape(format!("{} requires a target instance", self.method))
        })
    }

    pub fn arg(&self, index: usize) -> N1qlResult<&'e Expr> {
        self.args.get(index).ok_or_else(|| {
            N1qlError::InvalidShape(format!("{} is missing argument {index}", self.method))
        })
    }
}

/// Renders one kind of method call.
pub trait MethodCallTranslator: Send + Sync + Debug {
    fn translate(&self, call: &MethodCall<'_>, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikePattern {
    Contains,
    StartsWith,
    EndsWith,
}

/// `Contains`/`StartsWith`/`EndsWith` rendered as `LIKE`.
#[derive(Debug, Clone, Copy)]
pub struct LikeTranslator {
    pattern: LikePattern,
}

impl LikeTranslator {
    pub fn contains() -> Self {
        Self { pattern: LikePattern::Contains }
    }

    pub fn starts_with() -> Self {
        Self { pattern: LikePattern::StartsWith }
    }

    pub fn ends_with() -> Self {
        Self { pattern: LikePattern::EndsWith }
    }

    fn leading_wildcard(self) -> bool {
        matches!(self.pattern, LikePattern::Contains | LikePattern::EndsWith)
    }

    fn trailing_wildcard(self) -> bool {
        matches!(self.pattern, LikePattern::Contains | LikePattern::StartsWith)
    }
}

/// Escapes the LIKE wildcards in a literal fragment.
pub fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for c in fragment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl MethodCallTranslator for LikeTranslator {
    fn translate(&self, call: &MethodCall<'_>, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        let target = call.target()?;
        let argument = call.arg(0)?;

        renderer.push_str("(");
        renderer.visit(target)?;
        renderer.push_str(" LIKE ");

        match argument.as_constant().map(|constant| &constant.value) {
            Some(Value::String(fragment)) => {
                let mut pattern = escape_like(fragment);
                if self.leading_wildcard() {
                    pattern.insert(0, '%');
                }
                if self.trailing_wildcard() {
                    pattern.push('%');
                }
                renderer.push_value(&Value::String(pattern));
            }
            _ => {
                if self.leading_wildcard() {
                    renderer.push_str("'%' || ");
                }
                renderer.visit(argument)?;
                if self.trailing_wildcard() {
                    renderer.push_str(" || '%'");
                }
            }
        }

        renderer.push_str(")");
        Ok(())
    }
}

/// A static method rendered as `FUNCNAME(arg1, arg2, ...)`.
#[derive(Debug, Clone)]
pub struct FunctionTranslator {
    function: String,
}

impl FunctionTranslator {
    /// Creates a translator for a static method mapped to a N1QL function.
    ///
    /// # Errors
    ///
    /// Returns [`N1qlError::InvalidShape`] if the method is not static or the function
    /// name is not a valid N1QL identifier.
    pub fn new(method: &MethodInfo, function: &str) -> N1qlResult<Self> {
        if !method.signature.is_static {
            return Err(N1qlError::InvalidShape(format!(
                "{method} must be static to map onto N1QL function {function}"
            )));
        }

        let mut chars = function.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(N1qlError::InvalidShape(format!(
                "{function:?} is not a valid N1QL function name for {method}"
            )));
        }

        Ok(Self { function: function.to_string() })
    }

    /// Like [`new`](Self::new), also requiring the method to take `arity` parameters.
    pub fn with_arity(method: &MethodInfo, function: &str, arity: usize) -> N1qlResult<Self> {
        if method.signature.parameters.len() != arity {
            return Err(N1qlError::InvalidShape(format!(
                "{method} takes {} parameters, {function} expects {arity}",
                method.signature.parameters.len()
            )));
        }
        Self::new(method, function)
    }
}

impl MethodCallTranslator for FunctionTranslator {
    fn translate(&self, call: &MethodCall<'_>, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        renderer.push_str(&self.function);
        renderer.push_str("(");
        renderer.visit_list(call.args)?;
        renderer.push_str(")");
        Ok(())
    }
}

/// An instance method rendered as `FUNCNAME(target, arg1, ...)`.
#[derive(Debug, Clone)]
struct InstanceFunctionTranslator {
    function: &'static str,
}

impl MethodCallTranslator for InstanceFunctionTranslator {
    fn translate(&self, call: &MethodCall<'_>, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        renderer.push_str(self.function);
        renderer.push_str("(");
        renderer.visit(call.target()?)?;
        for arg in call.args {
            renderer.push_str(", ");
            renderer.visit(arg)?;
        }
        renderer.push_str(")");
        Ok(())
    }
}

/// A unary test rendered as `(operand <suffix>)`, e.g. `IS MISSING`.
#[derive(Debug, Clone)]
struct PostfixTranslator {
    suffix: &'static str,
}

impl MethodCallTranslator for PostfixTranslator {
    fn translate(&self, call: &MethodCall<'_>, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        let operand = match call.target {
            Some(target) => target,
            None => call.arg(0)?,
        };

        renderer.push_str("(");
        renderer.visit(operand)?;
        renderer.push_str(" ");
        renderer.push_str(self.suffix);
        renderer.push_str(")");
        Ok(())
    }
}

/// `Key(doc)` → `META(doc).id`
#[derive(Debug, Clone, Copy)]
struct KeyTranslator;

impl MethodCallTranslator for KeyTranslator {
    fn translate(&self, call: &MethodCall<'_>, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        renderer.push_str("META(");
        renderer.visit(call.arg(0)?)?;
        renderer.push_str(").id");
        Ok(())
    }
}

/// `date.Date` → `DATE_TRUNC_STR(date, 'day')`, or the millisecond variant for dates
/// stored as Unix milliseconds.
#[derive(Debug, Clone, Copy)]
struct DateTruncTranslator;

impl MethodCallTranslator for DateTruncTranslator {
    fn translate(&self, call: &MethodCall<'_>, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        let target = call.target()?;
        let function = if renderer.is_stored_as(target, &ConverterKind::UnixMilliseconds) {
            "DATE_TRUNC_MILLIS("
        } else {
            "DATE_TRUNC_STR("
        };

        renderer.push_str(function);
        renderer.visit(target)?;
        renderer.push_str(", 'day')");
        Ok(())
    }
}

/// `collection.Contains(value)` → `(value IN collection)`
#[derive(Debug, Clone, Copy)]
struct InTranslator;

impl MethodCallTranslator for InTranslator {
    fn translate(&self, call: &MethodCall<'_>, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        renderer.push_str("(");
        renderer.visit(call.arg(0)?)?;
        renderer.push_str(" IN ");
        renderer.visit(call.target()?)?;
        renderer.push_str(")");
        Ok(())
    }
}

/// Maps method signatures to translators.
#[derive(Debug, Clone)]
pub struct MethodCallTranslatorRegistry {
    translators: HashMap<MethodSignature, Arc<dyn MethodCallTranslator>>,
}

impl MethodCallTranslatorRegistry {
    /// Creates a registry with no translators.
    pub fn empty() -> Self {
        Self { translators: HashMap::new() }
    }

    /// Creates a registry with the built-in translators.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(method::string_contains().signature, Arc::new(LikeTranslator::contains()));
        registry.register(method::string_starts_with().signature, Arc::new(LikeTranslator::starts_with()));
        registry.register(method::string_ends_with().signature, Arc::new(LikeTranslator::ends_with()));

        let string_functions = [
            (method::string_to_upper(), "UPPER"),
            (method::string_to_lower(), "LOWER"),
            (method::string_trim(), "TRIM"),
            (method::string_trim_start(), "LTRIM"),
            (method::string_trim_end(), "RTRIM"),
            (method::string_length(), "LENGTH"),
            (method::string_substring(), "SUBSTR"),
            (method::string_substring_with_length(), "SUBSTR"),
            (method::string_index_of(), "POSITION"),
            (method::string_replace(), "REPLACE"),
            (method::string_split(), "SPLIT"),
            (method::collection_count(), "ARRAY_LENGTH"),
        ];
        for (method, function) in string_functions {
            registry.register(method.signature, Arc::new(InstanceFunctionTranslator { function }));
        }

        registry.register(method::enumerable_contains().signature, Arc::new(InTranslator));
        registry.register(method::key().signature, Arc::new(KeyTranslator));
        registry.register(
            method::meta().signature,
            Arc::new(FunctionTranslator { function: "META".to_string() }),
        );
        registry.register(method::datetime_date().signature, Arc::new(DateTruncTranslator));

        let postfix = [
            (method::is_missing(), "IS MISSING"),
            (method::is_not_missing(), "IS NOT MISSING"),
            (method::is_valued(), "IS VALUED"),
            (method::is_not_valued(), "IS NOT VALUED"),
            (method::nullable_has_value(), "IS VALUED"),
        ];
        for (method, suffix) in postfix {
            registry.register(method.signature, Arc::new(PostfixTranslator { suffix }));
        }

        for (name, function) in method::MATH_FUNCTIONS {
            registry.register(
                method::math(name).signature,
                Arc::new(FunctionTranslator { function: function.to_string() }),
            );
        }
        registry.register(
            method::math_pow().signature,
            Arc::new(FunctionTranslator { function: "POWER".to_string() }),
        );
        registry.register(
            method::math_round_digits().signature,
            Arc::new(FunctionTranslator { function: "ROUND".to_string() }),
        );

        registry
    }

    /// The process-wide default registry, built on first use.
    pub fn global() -> Arc<MethodCallTranslatorRegistry> {
        static GLOBAL: OnceLock<Arc<MethodCallTranslatorRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(MethodCallTranslatorRegistry::new())).clone()
    }

    /// Registers a translator, replacing any previous one for the same signature.
    pub fn register(&mut self, signature: MethodSignature, translator: Arc<dyn MethodCallTranslator>) {
        self.translators.insert(signature, translator);
    }

    /// Registers `method` as a direct mapping onto a N1QL function.
    ///
    /// # Errors
    ///
    /// Returns [`N1qlError::InvalidShape`] if the method cannot be mapped; see
    /// [`FunctionTranslator::new`].
    pub fn register_function(&mut self, method: &MethodInfo, function: &str) -> N1qlResult<()> {
        let translator = FunctionTranslator::new(method, function)?;
        self.register(method.signature.clone(), Arc::new(translator));
        Ok(())
    }

    /// Finds the translator for a method.
    ///
    /// # Errors
    ///
    /// Returns [`N1qlError::UnsupportedTranslation`] if no translator is registered and
    /// the method carries no N1QL function mapping.
    pub fn translator_for(&self, method: &MethodInfo) -> N1qlResult<Arc<dyn MethodCallTranslator>> {
        if let Some(translator) = self.translators.get(&method.signature) {
            return Ok(translator.clone());
        }

        match &method.n1ql_function {
            Some(function) => Ok(Arc::new(FunctionTranslator::new(method, function)?)),
            None => Err(N1qlError::UnsupportedTranslation(format!(
                "method {method} has no N1QL translation"
            ))),
        }
    }
}

impl Default for MethodCallTranslatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::QueryGenerationContext, functions, render::render_expression, types::TypeRef};
    use rstest::{fixture, rstest};

    #[fixture]
    fn context() -> QueryGenerationContext {
        QueryGenerationContext::default()
    }

    fn render(expr: &Expr, context: &QueryGenerationContext) -> String {
        render_expression(expr, context).unwrap()
    }

    #[rstest]
    #[case(Expr::constant("test").contains("t"), "('test' LIKE '%t%')")]
    #[case(Expr::constant("test").starts_with("t"), "('test' LIKE 't%')")]
    #[case(Expr::constant("test").ends_with("t"), "('test' LIKE '%t')")]
    #[case(
        Expr::constant("test").contains(Expr::parameter("X", TypeRef::String)),
        "('test' LIKE '%' || `X` || '%')"
    )]
    #[case(
        Expr::constant("test").starts_with(Expr::parameter("X", TypeRef::String)),
        "('test' LIKE `X` || '%')"
    )]
    #[case(Expr::constant("test").contains("50%_off"), "('test' LIKE '%50\\\\%\\\\_off%')")]
    fn test_like_rendering(
        context: QueryGenerationContext,
        #[case] expr: Expr,
        #[case] expected: &str,
    ) {
        assert_eq!(render(&expr, &context), expected);
    }

    #[rstest]
    fn test_key_accessor(context: QueryGenerationContext) {
        let expr = functions::key(Expr::parameter("arg1", TypeRef::Dynamic));

        assert_eq!(render(&expr, &context), "META(`arg1`).id");
    }

    #[rstest]
    #[case(Expr::parameter("s", TypeRef::String).to_upper(), "UPPER(`s`)")]
    #[case(Expr::parameter("s", TypeRef::String).substring(1, Some(Expr::constant(2))), "SUBSTR(`s`, 1, 2)")]
    #[case(functions::is_missing(Expr::parameter("s", TypeRef::String)), "(`s` IS MISSING)")]
    #[case(functions::math("Abs", Expr::parameter("n", TypeRef::Double)), "ABS(`n`)")]
    #[case(functions::pow(Expr::parameter("n", TypeRef::Double), 2), "POWER(`n`, 2)")]
    #[case(
        Expr::parameter("tags", TypeRef::collection_of(TypeRef::String)).contains("ipa"),
        "('ipa' IN `tags`)"
    )]
    #[case(Expr::parameter("d", TypeRef::DateTime).date(), "DATE_TRUNC_STR(`d`, 'day')")]
    fn test_builtin_translations(
        context: QueryGenerationContext,
        #[case] expr: Expr,
        #[case] expected: &str,
    ) {
        assert_eq!(render(&expr, &context), expected);
    }

    #[rstest]
    fn test_attribute_driven_function(context: QueryGenerationContext) {
        let method = MethodInfo::new(
            MethodSignature::static_method("Custom", "Greatest", ["Int32", "Int32"]),
            TypeRef::Int32,
        )
        .with_n1ql_function("GREATEST");
        let expr = functions::call(method, [Expr::constant(1), Expr::constant(2)]);

        assert_eq!(render(&expr, &context), "GREATEST(1, 2)");
    }

    #[rstest]
    fn test_unregistered_method_is_unsupported(context: QueryGenerationContext) {
        let method = MethodInfo::new(
            MethodSignature::instance("String", "Normalize", Vec::<String>::new()),
            TypeRef::String,
        );
        let expr = Expr::call(method, Some(Expr::constant("x")), []);

        match render_expression(&expr, &context) {
            Err(N1qlError::UnsupportedTranslation(message)) => {
                assert!(message.contains("String.Normalize()"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[rstest]
    #[case(MethodSignature::instance("Custom", "Greatest", ["Int32"]), "GREATEST")]
    #[case(MethodSignature::static_method("Custom", "Greatest", ["Int32"]), "")]
    #[case(MethodSignature::static_method("Custom", "Greatest", ["Int32"]), "GREATEST()")]
    fn test_function_translator_validates_eagerly(
        #[case] signature: MethodSignature,
        #[case] function: &str,
    ) {
        let method = MethodInfo::new(signature, TypeRef::Int32);

        assert!(matches!(
            FunctionTranslator::new(&method, function),
            Err(N1qlError::InvalidShape(_))
        ));
    }

    #[rstest]
    fn test_function_translator_checks_arity() {
        let method = MethodInfo::new(
            MethodSignature::static_method("Custom", "Greatest", ["Int32"]),
            TypeRef::Int32,
        );

        assert!(FunctionTranslator::with_arity(&method, "GREATEST", 1).is_ok());
        assert!(matches!(
            FunctionTranslator::with_arity(&method, "GREATEST", 2),
            Err(N1qlError::InvalidShape(_))
        ));
    }

    #[rstest]
    fn test_register_function() {
        let method = MethodInfo::new(
            MethodSignature::static_method("Custom", "Now", Vec::<String>::new()),
            TypeRef::String,
        );
        let mut registry = MethodCallTranslatorRegistry::empty();

        registry.register_function(&method, "NOW_STR").unwrap();

        assert!(registry.translator_for(&method).is_ok());
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("50%", "50\\%")]
    #[case("a_b\\c", "a\\_b\\\\c")]
    fn test_escape_like(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_like(input), expected);
    }
}
