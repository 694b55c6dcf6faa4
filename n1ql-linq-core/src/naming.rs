//! Member name resolution.
//!
//! The renderer never spells a member by its Rust name directly: it asks the
//! [`MemberNameResolver`] of the generation context for the serialized (wire) name.
//! Two resolvers are provided. [`AttributeNameResolver`] honors explicit renames and
//! otherwise applies a [`NamingStrategy`]; [`SerializerNameResolver`] delegates to a
//! [`TypeSerializer`], the capability that also reports date formats and converters.

use serde::Deserialize;
use std::{fmt::Debug, sync::Arc};

use crate::types::{ConverterKind, MemberInfo};

/// Resolves the serialized name of a member.
///
/// Returning `None` makes the renderer fall back to the raw member name.
pub trait MemberNameResolver: Send + Sync + Debug {
    fn resolve(&self, member: &MemberInfo) -> Option<String>;
}

/// Casing convention applied to member names without an explicit rename.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    /// Use the member name unchanged.
    #[default]
    AsIs,
    CamelCase,
    PascalCase,
    SnakeCase,
}

impl NamingStrategy {
    pub fn apply(self, name: &str) -> String {
        match self {
            NamingStrategy::AsIs => name.to_string(),
            NamingStrategy::SnakeCase => words(name).join("_"),
            NamingStrategy::PascalCase => words(name).iter().map(|word| capitalize(word)).collect(),
            NamingStrategy::CamelCase => words(name)
                .iter()
                .enumerate()
                .map(|(index, word)| if index == 0 { word.clone() } else { capitalize(word) })
                .collect(),
        }
    }
}

/// Splits an identifier into lowercase words at underscores and case boundaries.
fn words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;

    for c in name.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if c.is_uppercase() && previous_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Resolves explicit renames, then applies the naming strategy.
#[derive(Debug, Clone, Default)]
pub struct AttributeNameResolver {
    strategy: NamingStrategy,
}

impl AttributeNameResolver {
    pub fn new(strategy: NamingStrategy) -> Self {
        Self { strategy }
    }
}

impl MemberNameResolver for AttributeNameResolver {
    fn resolve(&self, member: &MemberInfo) -> Option<String> {
        match &member.attributes.rename {
            Some(rename) => Some(rename.clone()),
            None => Some(self.strategy.apply(&member.name)),
        }
    }
}

/// How a serializer writes dates that carry no converter of their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateTimeFormat {
    #[default]
    Iso8601,
    UnixMilliseconds,
}

/// The serializer capability consulted during translation.
pub trait TypeSerializer: Send + Sync + Debug {
    /// The wire name of a member, if the serializer knows it.
    fn member_name(&self, member: &MemberInfo) -> Option<String>;

    /// The default text format for dates.
    fn date_format(&self) -> DateTimeFormat {
        DateTimeFormat::Iso8601
    }

    /// The converter applied to a member, explicit or implied by the serializer settings.
    fn converter_kind(&self, member: &MemberInfo) -> Option<ConverterKind> {
        member.attributes.converter.clone()
    }
}

/// The default serializer description, matching how `serde_json` writes derived models.
#[derive(Debug, Clone, Default)]
pub struct JsonTypeSerializer {
    naming: NamingStrategy,
    date_format: DateTimeFormat,
}

impl JsonTypeSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_naming(mut self, naming: NamingStrategy) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_date_format(mut self, date_format: DateTimeFormat) -> Self {
        self.date_format = date_format;
        self
    }
}

impl TypeSerializer for JsonTypeSerializer {
    fn member_name(&self, member: &MemberInfo) -> Option<String> {
        AttributeNameResolver::new(self.naming).resolve(member)
    }

    fn date_format(&self) -> DateTimeFormat {
        self.date_format
    }

    fn converter_kind(&self, member: &MemberInfo) -> Option<ConverterKind> {
        match &member.attributes.converter {
            Some(kind) => Some(kind.clone()),
            None if member.ty.is_date_like() && self.date_format == DateTimeFormat::UnixMilliseconds => {
                Some(ConverterKind::UnixMilliseconds)
            }
            None => None,
        }
    }
}

/// Resolves names through a [`TypeSerializer`].
#[derive(Debug, Clone)]
pub struct SerializerNameResolver {
    serializer: Arc<dyn TypeSerializer>,
}

impl SerializerNameResolver {
    pub fn new(serializer: Arc<dyn TypeSerializer>) -> Self {
        Self { serializer }
    }
}

impl MemberNameResolver for SerializerNameResolver {
    fn resolve(&self, member: &MemberInfo) -> Option<String> {
        self.serializer.member_name(member)
    }
}
