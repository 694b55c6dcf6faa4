//! Method descriptors.
//!
//! A [`MethodSignature`] identifies a method by declaring type, name and parameter
//! types; it is the key of the method-call translator registry. The functions in this
//! module return the descriptors of the well-known methods that have built-in
//! translations.

use std::fmt;

use crate::types::TypeRef;

/// Canonical identity of a method: declaring type, name and parameter type names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub declaring_type: String,
    pub name: String,
    pub parameters: Vec<String>,
    pub is_static: bool,
}

impl MethodSignature {
    pub fn instance<P: Into<String>>(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        parameters: impl IntoIterator<Item = P>,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
            is_static: false,
        }
    }

    pub fn static_method<P: Into<String>>(
        declaring_type: impl Into<String>,
        name: impl Into<String>,
        parameters: impl IntoIterator<Item = P>,
    ) -> Self {
        Self { is_static: true, ..Self::instance(declaring_type, name, parameters) }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.declaring_type, self.name, self.parameters.join(", "))
    }
}

/// A method descriptor as it appears in a call expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodInfo {
    pub signature: MethodSignature,
    pub return_type: TypeRef,
    /// Name of the N1QL function this method maps to, for attribute-driven methods.
    pub n1ql_function: Option<String>,
}

impl MethodInfo {
    pub fn new(signature: MethodSignature, return_type: TypeRef) -> Self {
        Self { signature, return_type, n1ql_function: None }
    }

    /// Marks this method as a direct mapping onto a N1QL function.
    pub fn with_n1ql_function(mut self, function: impl Into<String>) -> Self {
        self.n1ql_function = Some(function.into());
        self
    }
}

impl fmt::Display for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.signature.fmt(f)
    }
}

pub(crate) const STRING: &str = "String";
pub(crate) const ENUMERABLE: &str = "Enumerable";
pub(crate) const MATH: &str = "Math";
pub(crate) const N1QL_FUNCTIONS: &str = "N1QlFunctions";
pub(crate) const DATE_TIME: &str = "DateTime";
pub(crate) const NULLABLE: &str = "Nullable";

macro_rules! known_method {
    ($(#[$doc:meta])* $fn_name:ident => instance $decl:expr, $name:literal, [$($param:literal),*] -> $ret:expr) => {
        $(#[$doc])*
        pub fn $fn_name() -> MethodInfo {
            let parameters: Vec<&str> = vec![$($param),*];
            MethodInfo::new(MethodSignature::instance($decl, $name, parameters), $ret)
        }
    };
    ($(#[$doc:meta])* $fn_name:ident => static $decl:expr, $name:literal, [$($param:literal),*] -> $ret:expr) => {
        $(#[$doc])*
        pub fn $fn_name() -> MethodInfo {
            let parameters: Vec<&str> = vec![$($param),*];
            MethodInfo::new(MethodSignature::static_method($decl, $name, parameters), $ret)
        }
    };
}

known_method!(string_contains => instance STRING, "Contains", ["String"] -> TypeRef::Bool);
known_method!(string_starts_with => instance STRING, "StartsWith", ["String"] -> TypeRef::Bool);
known_method!(string_ends_with => instance STRING, "EndsWith", ["String"] -> TypeRef::Bool);
known_method!(string_to_upper => instance STRING, "ToUpper", [] -> TypeRef::String);
known_method!(string_to_lower => instance STRING, "ToLower", [] -> TypeRef::String);
known_method!(string_trim => instance STRING, "Trim", [] -> TypeRef::String);
known_method!(string_trim_start => instance STRING, "TrimStart", [] -> TypeRef::String);
known_method!(string_trim_end => instance STRING, "TrimEnd", [] -> TypeRef::String);
known_method!(string_length => instance STRING, "get_Length", [] -> TypeRef::Int32);
known_method!(string_substring => instance STRING, "Substring", ["Int32"] -> TypeRef::String);
known_method!(string_substring_with_length => instance STRING, "Substring", ["Int32", "Int32"] -> TypeRef::String);
known_method!(string_index_of => instance STRING, "IndexOf", ["String"] -> TypeRef::Int32);
known_method!(string_replace => instance STRING, "Replace", ["String", "String"] -> TypeRef::String);
known_method!(string_split => instance STRING, "Split", ["String"] -> TypeRef::collection_of(TypeRef::String));
known_method!(string_compare_to => instance STRING, "CompareTo", ["String"] -> TypeRef::Int32);
known_method!(
    /// `String.Compare(a, b)`; only translatable once folded into a comparison.
    string_compare => static STRING, "Compare", ["String", "String"] -> TypeRef::Int32
);

known_method!(enumerable_contains => instance ENUMERABLE, "Contains", ["Object"] -> TypeRef::Bool);
known_method!(collection_count => instance ENUMERABLE, "Count", [] -> TypeRef::Int32);

known_method!(datetime_date => instance DATE_TIME, "get_Date", [] -> TypeRef::DateTime);
known_method!(nullable_has_value => instance NULLABLE, "get_HasValue", [] -> TypeRef::Bool);

known_method!(
    /// `N1QlFunctions.Key(doc)`: the document key.
    key => static N1QL_FUNCTIONS, "Key", ["Object"] -> TypeRef::String
);
known_method!(
    /// `N1QlFunctions.Meta(doc)`: the document metadata object.
    meta => static N1QL_FUNCTIONS, "Meta", ["Object"] -> TypeRef::Dynamic
);
known_method!(is_missing => static N1QL_FUNCTIONS, "IsMissing", ["Object"] -> TypeRef::Bool);
known_method!(is_not_missing => static N1QL_FUNCTIONS, "IsNotMissing", ["Object"] -> TypeRef::Bool);
known_method!(is_valued => static N1QL_FUNCTIONS, "IsValued", ["Object"] -> TypeRef::Bool);
known_method!(is_not_valued => static N1QL_FUNCTIONS, "IsNotValued", ["Object"] -> TypeRef::Bool);

/// `Math.<name>(Double)`, for the unary math functions with a built-in translation.
pub fn math(name: &str) -> MethodInfo {
    MethodInfo::new(MethodSignature::static_method(MATH, name, ["Double"]), TypeRef::Double)
}

/// `Math.Pow(Double, Double)`
pub fn math_pow() -> MethodInfo {
    MethodInfo::new(
        MethodSignature::static_method(MATH, "Pow", ["Double", "Double"]),
        TypeRef::Double,
    )
}

/// `Math.Round(Double, Int32)`
pub fn math_round_digits() -> MethodInfo {
    MethodInfo::new(
        MethodSignature::static_method(MATH, "Round", ["Double", "Int32"]),
        TypeRef::Double,
    )
}

/// Unary math functions and their N1QL spelling.
pub(crate) const MATH_FUNCTIONS: &[(&str, &str)] = &[
    ("Abs", "ABS"),
    ("Ceiling", "CEIL"),
    ("Floor", "FLOOR"),
    ("Round", "ROUND"),
    ("Sqrt", "SQRT"),
    ("Exp", "EXP"),
    ("Log", "LN"),
    ("Log10", "LOG"),
    ("Sign", "SIGN"),
    ("Truncate", "TRUNC"),
    ("Sin", "SIN"),
    ("Cos", "COS"),
    ("Tan", "TAN"),
];
