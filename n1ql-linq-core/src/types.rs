//! Static type information for query expressions.
//!
//! Expressions carry a [`TypeRef`] so that the normalizer and renderer can make the
//! same decisions a reflection-based translator would: whether a comparison involves
//! dates, which members carry a custom serialization converter, how an enum value is
//! spelled on the wire, and so on.
//!
//! Most applications obtain type information through the [`Model`] trait, which is
//! implemented for primitives, `Option`, `Vec` and the chrono date types, and can be
//! derived for structs and enums with `#[derive(Model)]`.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::{fmt, sync::Arc};

/// The static type of an expression or member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Bool,
    Int32,
    Int64,
    Double,
    Decimal,
    String,
    /// A date/time without offset information, serialized as ISO-8601 by default.
    DateTime,
    /// A date/time with an explicit UTC offset.
    DateTimeOffset,
    Enum(Arc<EnumType>),
    Nullable(Box<TypeRef>),
    Collection(Box<TypeRef>),
    Object(Arc<ObjectType>),
    /// The element type of a grouped sequence (`IGrouping<Key, Element>`).
    Grouping {
        key: Box<TypeRef>,
        element: Box<TypeRef>,
    },
    /// Untyped JSON.
    Dynamic,
}

impl TypeRef {
    /// Wraps this type in `Nullable` unless it already is.
    pub fn nullable(self) -> Self {
        match self {
            TypeRef::Nullable(_) => self,
            other => TypeRef::Nullable(Box::new(other)),
        }
    }

    /// Creates a collection type of the given element type.
    pub fn collection_of(element: TypeRef) -> Self {
        TypeRef::Collection(Box::new(element))
    }

    /// Returns the type with any `Nullable` wrapper removed.
    pub fn underlying(&self) -> &TypeRef {
        match self {
            TypeRef::Nullable(inner) => inner.underlying(),
            other => other,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeRef::Nullable(_))
    }

    /// Returns true for `DateTime` and `DateTimeOffset`, nullable or not.
    pub fn is_date_like(&self) -> bool {
        matches!(self.underlying(), TypeRef::DateTime | TypeRef::DateTimeOffset)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.underlying(),
            TypeRef::Int32 | TypeRef::Int64 | TypeRef::Double | TypeRef::Decimal
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self.underlying(), TypeRef::Int32 | TypeRef::Int64)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.underlying(), TypeRef::String)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.underlying(), TypeRef::Collection(_))
    }

    /// Returns the enum definition if this is a (nullable) enum type.
    pub fn enum_type(&self) -> Option<&Arc<EnumType>> {
        match self.underlying() {
            TypeRef::Enum(enum_type) => Some(enum_type),
            _ => None,
        }
    }

    /// Returns the element type of a collection or grouping.
    pub fn element_type(&self) -> Option<&TypeRef> {
        match self.underlying() {
            TypeRef::Collection(element) => Some(element),
            TypeRef::Grouping { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Looks up a member on an object type.
    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        match self.underlying() {
            TypeRef::Object(object) => object.member(name),
            _ => None,
        }
    }

    /// A short, human readable type name used in error messages and method signatures.
    pub fn name(&self) -> String {
        match self {
            TypeRef::Bool => "Boolean".to_string(),
            TypeRef::Int32 => "Int32".to_string(),
            TypeRef::Int64 => "Int64".to_string(),
            TypeRef::Double => "Double".to_string(),
            TypeRef::Decimal => "Decimal".to_string(),
            TypeRef::String => "String".to_string(),
            TypeRef::DateTime => "DateTime".to_string(),
            TypeRef::DateTimeOffset => "DateTimeOffset".to_string(),
            TypeRef::Enum(enum_type) => enum_type.name.clone(),
            TypeRef::Nullable(inner) => format!("Nullable<{}>", inner.name()),
            TypeRef::Collection(element) => format!("IEnumerable<{}>", element.name()),
            TypeRef::Object(object) => object.name.clone(),
            TypeRef::Grouping { key, element } => {
                format!("IGrouping<{}, {}>", key.name(), element.name())
            }
            TypeRef::Dynamic => "Object".to_string(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A single named value of an enum type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumVariant {
    pub name: String,
    pub value: i64,
}

/// Definition of an enum: its name, underlying numeric type and defined values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    pub name: String,
    pub underlying: TypeRef,
    pub variants: Vec<EnumVariant>,
}

impl EnumType {
    /// Creates an enum definition backed by `Int32`.
    pub fn new<N: Into<String>>(
        name: impl Into<String>,
        variants: impl IntoIterator<Item = (N, i64)>,
    ) -> Self {
        Self {
            name: name.into(),
            underlying: TypeRef::Int32,
            variants: variants
                .into_iter()
                .map(|(name, value)| EnumVariant { name: name.into(), value })
                .collect(),
        }
    }

    /// Returns the variant name for a numeric value, if one is defined.
    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.variants
            .iter()
            .find(|variant| variant.value == value)
            .map(|variant| variant.name.as_str())
    }

    /// Returns the numeric value of a variant name, if one is defined.
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.variants
            .iter()
            .find(|variant| variant.name == name)
            .map(|variant| variant.value)
    }
}

/// Identifies a custom serialization behavior attached to a member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConverterKind {
    /// Dates stored as the number of milliseconds since the Unix epoch.
    UnixMilliseconds,
    /// Enums stored by variant name instead of numeric value.
    StringEnum,
    /// Application defined converter, registered under this name.
    Custom(String),
}

impl ConverterKind {
    /// Parses the spelling used by `#[n1ql(converter = "...")]`.
    pub fn parse(value: &str) -> Self {
        match value {
            "unix_millis" | "unix_milliseconds" => ConverterKind::UnixMilliseconds,
            "string_enum" => ConverterKind::StringEnum,
            other => ConverterKind::Custom(other.to_string()),
        }
    }
}

/// Serialization attributes of a member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MemberAttributes {
    /// Explicit wire name.
    pub rename: Option<String>,
    /// Custom serialization converter.
    pub converter: Option<ConverterKind>,
    /// Marks the member holding the document key.
    pub is_key: bool,
}

impl MemberAttributes {
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    pub fn with_converter(mut self, kind: ConverterKind) -> Self {
        self.converter = Some(kind);
        self
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }
}

/// A property or field of an object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberInfo {
    pub name: String,
    pub declaring_type: String,
    pub ty: TypeRef,
    pub attributes: MemberAttributes,
}

impl MemberInfo {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            declaring_type: declaring_type.into(),
            ty,
            attributes: MemberAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: MemberAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Definition of a document or sub-document type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectType {
    pub name: String,
    pub members: Vec<MemberInfo>,
}

impl ObjectType {
    pub fn builder(name: impl Into<String>) -> ObjectTypeBuilder {
        ObjectTypeBuilder::new(name)
    }

    pub fn member(&self, name: &str) -> Option<&MemberInfo> {
        self.members.iter().find(|member| member.name == name)
    }

    /// Returns the member flagged as the document key.
    pub fn key_member(&self) -> Option<&MemberInfo> {
        self.members.iter().find(|member| member.attributes.is_key)
    }
}

/// Fluent builder for [`ObjectType`], used by hand-written models and by the derive macros.
#[derive(Debug, Clone)]
pub struct ObjectTypeBuilder {
    object: ObjectType,
}

impl ObjectTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            object: ObjectType { name: name.into(), members: Vec::new() },
        }
    }

    /// Adds a member without serialization attributes.
    pub fn member(self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.member_with(name, ty, MemberAttributes::default())
    }

    /// Adds a member with explicit serialization attributes.
    pub fn member_with(
        mut self,
        name: impl Into<String>,
        ty: TypeRef,
        attributes: MemberAttributes,
    ) -> Self {
        let member = MemberInfo::new(self.object.name.clone(), name, ty).with_attributes(attributes);
        self.object.members.push(member);
        self
    }

    pub fn build(self) -> Arc<ObjectType> {
        Arc::new(self.object)
    }

    /// Builds the object type and wraps it in a [`TypeRef`].
    pub fn build_type(self) -> TypeRef {
        TypeRef::Object(self.build())
    }
}

/// Exposes the static [`TypeRef`] of a Rust type.
///
/// Implemented here for primitives and containers; derive it for documents and enums:
///
/// ```ignore
/// #[derive(Model)]
/// #[n1ql(rename_all = "camelCase")]
/// pub struct Beer {
///     pub name: String,
///     #[n1ql(converter = "unix_millis")]
///     pub updated: chrono::DateTime<chrono::Utc>,
/// }
/// ```
pub trait Model {
    fn type_ref() -> TypeRef;
}

macro_rules! impl_model {
    ($type_ref:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Model for $ty {
                fn type_ref() -> TypeRef {
                    $type_ref
                }
            }
        )+
    };
}

impl_model!(TypeRef::Bool => bool);
impl_model!(TypeRef::Int32 => i8, i16, i32, u8, u16);
impl_model!(TypeRef::Int64 => i64, u32, u64, isize, usize);
impl_model!(TypeRef::Double => f32, f64);
impl_model!(TypeRef::String => String, str, char);
impl_model!(TypeRef::DateTime => DateTime<Utc>, NaiveDateTime, NaiveDate);
impl_model!(TypeRef::DateTimeOffset => DateTime<FixedOffset>);
impl_model!(TypeRef::Dynamic => Value);

impl<T: Model> Model for Option<T> {
    fn type_ref() -> TypeRef {
        T::type_ref().nullable()
    }
}

impl<T: Model> Model for Vec<T> {
    fn type_ref() -> TypeRef {
        TypeRef::collection_of(T::type_ref())
    }
}

impl<T: Model + ?Sized> Model for Box<T> {
    fn type_ref() -> TypeRef {
        T::type_ref()
    }
}

impl<T: Model + ?Sized> Model for &T {
    fn type_ref() -> TypeRef {
        T::type_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TypeRef::DateTime, true)]
    #[case(TypeRef::DateTimeOffset.nullable(), true)]
    #[case(TypeRef::String, false)]
    #[case(TypeRef::Int64.nullable(), false)]
    fn test_is_date_like(#[case] ty: TypeRef, #[case] expected: bool) {
        assert_eq!(ty.is_date_like(), expected);
    }

    #[rstest]
    fn test_model_for_containers() {
        assert_eq!(Option::<i32>::type_ref(), TypeRef::Nullable(Box::new(TypeRef::Int32)));
        assert_eq!(
            Vec::<String>::type_ref(),
            TypeRef::Collection(Box::new(TypeRef::String))
        );
        assert_eq!(Option::<Option<i32>>::type_ref(), Option::<i32>::type_ref());
    }

    #[rstest]
    fn test_enum_lookup() {
        let status = EnumType::new("Status", [("Active", 1), ("Retired", 2)]);

        assert_eq!(status.name_of(2), Some("Retired"));
        assert_eq!(status.name_of(3), None);
        assert_eq!(status.value_of("Active"), Some(1));
    }

    #[rstest]
    fn test_object_builder_records_declaring_type() {
        let beer = ObjectType::builder("Beer")
            .member("name", TypeRef::String)
            .member_with("id", TypeRef::String, MemberAttributes::default().key())
            .build();

        assert_eq!(beer.member("name").map(|m| m.declaring_type.as_str()), Some("Beer"));
        assert_eq!(beer.key_member().map(|m| m.name.as_str()), Some("id"));
    }

    #[rstest]
    #[case("unix_millis", ConverterKind::UnixMilliseconds)]
    #[case("string_enum", ConverterKind::StringEnum)]
    #[case("base64", ConverterKind::Custom("base64".to_string()))]
    fn test_parse_converter_kind(#[case] input: &str, #[case] expected: ConverterKind) {
        assert_eq!(ConverterKind::parse(input), expected);
    }
}
