//! Serialization converters.
//!
//! A member can be stored in a representation different from its in-memory type:
//! dates as Unix milliseconds, enums by name. A [`SerializationConverter`] knows how to
//! translate values and expressions between the two representations in N1QL text,
//! and the [`ConverterRegistry`] maps a member's [`ConverterKind`] to its converter.
//!
//! Conversions are represented in the expression tree by [`Expr::Conversion`] nodes.
//! The renderer elides a `to` conversion applied directly to the matching `from`
//! conversion (and vice versa), so round trips never render twice.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, OnceLock},
};

use crate::{
    error::{N1qlError, N1qlResult},
    expression::{Constant, ConversionDirection, Expr, Value},
    naming::TypeSerializer,
    render::ExpressionRenderer,
    types::{ConverterKind, EnumType, MemberInfo, TypeRef},
};

/// Translates between the in-memory and the stored representation of a value.
pub trait SerializationConverter: Send + Sync + Debug {
    fn kind(&self) -> ConverterKind;

    /// The type of the stored representation of a value of type `ty`.
    fn stored_type(&self, ty: &TypeRef) -> TypeRef;

    /// Wraps `expr` so that it renders in the stored representation.
    fn wrap_to(&self, expr: Expr) -> Expr {
        let ty = self.stored_type(&expr.ty());
        Expr::Conversion {
            direction: ConversionDirection::To,
            kind: self.kind(),
            operand: Box::new(expr),
            ty,
        }
    }

    /// Wraps a stored-representation `expr` so that it renders as a value of type `ty`.
    fn wrap_from(&self, expr: Expr, ty: TypeRef) -> Expr {
        Expr::Conversion {
            direction: ConversionDirection::From,
            kind: self.kind(),
            operand: Box::new(expr),
            ty,
        }
    }

    /// Renders an in-memory expression converted to the stored representation.
    fn render_to(&self, operand: &Expr, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()>;

    /// Renders a stored-representation expression converted back to `target`.
    fn render_from(
        &self,
        operand: &Expr,
        target: &TypeRef,
        renderer: &mut ExpressionRenderer<'_>,
    ) -> N1qlResult<()>;

    /// Renders a literal in the stored representation.
    fn render_constant(
        &self,
        constant: &Constant,
        renderer: &mut ExpressionRenderer<'_>,
    ) -> N1qlResult<()>;
}

/// Dates stored as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixMillisecondsConverter;

impl SerializationConverter for UnixMillisecondsConverter {
    fn kind(&self) -> ConverterKind {
        ConverterKind::UnixMilliseconds
    }

    fn stored_type(&self, ty: &TypeRef) -> TypeRef {
        if ty.is_nullable() { TypeRef::Int64.nullable() } else { TypeRef::Int64 }
    }

    fn render_to(&self, operand: &Expr, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        renderer.push_str("STR_TO_MILLIS(");
        renderer.visit(operand)?;
        renderer.push_str(")");
        Ok(())
    }

    fn render_from(
        &self,
        operand: &Expr,
        _target: &TypeRef,
        renderer: &mut ExpressionRenderer<'_>,
    ) -> N1qlResult<()> {
        renderer.push_str("MILLIS_TO_STR(");
        renderer.visit(operand)?;
        renderer.push_str(")");
        Ok(())
    }

    fn render_constant(
        &self,
        constant: &Constant,
        renderer: &mut ExpressionRenderer<'_>,
    ) -> N1qlResult<()> {
        match &constant.value {
            Value::DateTime(value) => {
                renderer.push_str(&value.timestamp_millis().to_string());
                Ok(())
            }
            Value::Null | Value::Int(_) => {
                renderer.push_value(&constant.value);
                Ok(())
            }
            other => Err(N1qlError::InvalidShape(format!(
                "cannot convert {other:?} to Unix milliseconds"
            ))),
        }
    }
}

/// Enums stored by variant name.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringEnumConverter;

impl StringEnumConverter {
    fn enum_type<'t>(ty: &'t TypeRef) -> N1qlResult<&'t Arc<EnumType>> {
        ty.enum_type()
            .ok_or_else(|| N1qlError::InvalidShape(format!("{ty} is not an enum type")))
    }
}

impl SerializationConverter for StringEnumConverter {
    fn kind(&self) -> ConverterKind {
        ConverterKind::StringEnum
    }

    fn stored_type(&self, ty: &TypeRef) -> TypeRef {
        if ty.is_nullable() { TypeRef::String.nullable() } else { TypeRef::String }
    }

    fn render_to(&self, operand: &Expr, renderer: &mut ExpressionRenderer<'_>) -> N1qlResult<()> {
        let ty = operand.ty();
        let enum_type = Self::enum_type(&ty)?;

        renderer.push_str("CASE ");
        renderer.visit(operand)?;
        for variant in &enum_type.variants {
            renderer.push_str(&format!(" WHEN {} THEN ", variant.value));
            renderer.push_value(&Value::String(variant.name.clone()));
        }
        renderer.push_str(" END");
        Ok(())
    }

    fn render_from(
        &self,
        operand: &Expr,
        target: &TypeRef,
        renderer: &mut ExpressionRenderer<'_>,
    ) -> N1qlResult<()> {
        let enum_type = Self::enum_type(target)?;

        renderer.push_str("CASE ");
        renderer.visit(operand)?;
        for variant in &enum_type.variants {
            renderer.push_str(" WHEN ");
            renderer.push_value(&Value::String(variant.name.clone()));
            renderer.push_str(&format!(" THEN {}", variant.value));
        }
        renderer.push_str(" END");
        Ok(())
    }

    fn render_constant(
        &self,
        constant: &Constant,
        renderer: &mut ExpressionRenderer<'_>,
    ) -> N1qlResult<()> {
        let name = match (&constant.value, constant.ty.enum_type()) {
            (Value::Enum { ty, value }, _) => ty.name_of(*value).map(str::to_string),
            (Value::Int(value), Some(ty)) => ty.name_of(*value).map(str::to_string),
            _ => None,
        };

        match name {
            Some(name) => renderer.push_value(&Value::String(name)),
            // Undefined values are stored numerically.
            None => renderer.push_value(&constant.value),
        }
        Ok(())
    }
}

/// Maps converter kinds to converters.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    converters: HashMap<ConverterKind, Arc<dyn SerializationConverter>>,
}

impl ConverterRegistry {
    /// Creates a registry with no converters.
    pub fn empty() -> Self {
        Self { converters: HashMap::new() }
    }

    /// Creates a registry with the built-in converters.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(UnixMillisecondsConverter));
        registry.register(Arc::new(StringEnumConverter));
        registry
    }

    /// The process-wide default registry, built on first use.
    pub fn global() -> Arc<ConverterRegistry> {
        static GLOBAL: OnceLock<Arc<ConverterRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ConverterRegistry::new())).clone()
    }

    /// Registers a converter under its kind, replacing any previous one.
    pub fn register(&mut self, converter: Arc<dyn SerializationConverter>) {
        self.converters.insert(converter.kind(), converter);
    }

    pub fn get(&self, kind: &ConverterKind) -> Option<&Arc<dyn SerializationConverter>> {
        self.converters.get(kind)
    }

    /// The converter that applies to `member`, if any.
    pub fn get_converter(
        &self,
        member: &MemberInfo,
        serializer: &dyn TypeSerializer,
    ) -> Option<&Arc<dyn SerializationConverter>> {
        serializer
            .converter_kind(member)
            .and_then(|kind| self.converters.get(&kind))
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
