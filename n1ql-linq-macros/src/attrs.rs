use proc_macro2::Group;
use syn::{Attribute, Expr, Ident, LitStr, Result, Token, ext::IdentExt, meta::ParseNestedMeta};

///
/// RenameRule
///

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
}

impl RenameRule {
    fn parse(value: &LitStr) -> Result<Self> {
        Ok(match value.value().as_str() {
            "lowercase" => Self::Lower,
            "UPPERCASE" => Self::Upper,
            "PascalCase" => Self::Pascal,
            "camelCase" => Self::Camel,
            "snake_case" => Self::Snake,
            "SCREAMING_SNAKE_CASE" => Self::ScreamingSnake,
            "kebab-case" => Self::Kebab,
            _ => return Err(syn::Error::new_spanned(value, "unknown rename rule")),
        })
    }

    pub fn apply(self, name: &str) -> String {
        let words = words(name);

        match self {
            Self::Lower => words.concat(),
            Self::Upper => words.concat().to_uppercase(),
            Self::Pascal => words.iter().map(|word| capitalize(word)).collect(),
            Self::Camel => words
                .iter()
                .enumerate()
                .map(|(i, word)| if i == 0 { word.clone() } else { capitalize(word) })
                .collect(),
            Self::Snake => words.join("_"),
            Self::ScreamingSnake => words.join("_").to_uppercase(),
            Self::Kebab => words.join("-"),
        }
    }
}

/// Lowercase words of a snake_case or PascalCase identifier.
fn words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();

    for ch in name.chars() {
        if ch == '_' || ch == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
            current.extend(ch.to_lowercase());
        } else {
            current.extend(ch.to_lowercase());
        }
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

///
/// ContainerAttrs
///

#[derive(Debug, Default)]
pub struct ContainerAttrs {
    pub rename_all: Option<RenameRule>,
    pub document_type: Option<String>,
}

impl ContainerAttrs {
    pub fn parse(attrs: &[Attribute]) -> Result<Self> {
        let mut parsed = Self::default();

        for attr in attrs {
            if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename_all") && meta.input.peek(Token![=]) {
                        parsed.rename_all = Some(RenameRule::parse(&meta.value()?.parse()?)?);
                        Ok(())
                    } else {
                        skip(&meta)
                    }
                })?;
            } else if attr.path().is_ident("n1ql") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename_all") {
                        parsed.rename_all = Some(RenameRule::parse(&meta.value()?.parse()?)?);
                    } else if meta.path.is_ident("document_type") {
                        parsed.document_type = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else {
                        return Err(meta.error("unsupported n1ql container attribute"));
                    }
                    Ok(())
                })?;
            }
        }
        Ok(parsed)
    }
}

///
/// FieldAttrs
///

#[derive(Debug, Default)]
pub struct FieldAttrs {
    pub rename: Option<String>,
    pub converter: Option<String>,
    pub key: bool,
    pub skip: bool,
}

impl FieldAttrs {
    pub fn parse(attrs: &[Attribute]) -> Result<Self> {
        let mut parsed = Self::default();

        for attr in attrs {
            if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
                        parsed.rename = Some(meta.value()?.parse::<LitStr>()?.value());
                        Ok(())
                    } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                        parsed.skip = true;
                        Ok(())
                    } else {
                        skip(&meta)
                    }
                })?;
            } else if attr.path().is_ident("n1ql") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") {
                        parsed.rename = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else if meta.path.is_ident("converter") {
                        parsed.converter = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else if meta.path.is_ident("key") {
                        parsed.key = true;
                    } else {
                        return Err(meta.error("unsupported n1ql field attribute"));
                    }
                    Ok(())
                })?;
            }
        }
        Ok(parsed)
    }

    /// The wire name: an explicit rename, or the container rule applied to `ident`.
    pub fn wire_name(&self, ident: &Ident, rule: Option<RenameRule>) -> Option<String> {
        self.rename
            .clone()
            .or_else(|| rule.map(|rule| rule.apply(&ident.unraw().to_string())))
    }
}

// Consumes a serde option this crate does not interpret.
fn skip(meta: &ParseNestedMeta) -> Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        meta.input.parse::<Group>()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_rules() {
        assert_eq!(RenameRule::Camel.apply("brewery_id"), "breweryId");
        assert_eq!(RenameRule::Pascal.apply("brewery_id"), "BreweryId");
        assert_eq!(RenameRule::Snake.apply("RequestPlus"), "request_plus");
        assert_eq!(RenameRule::ScreamingSnake.apply("abv"), "ABV");
        assert_eq!(RenameRule::Kebab.apply("brewery_id"), "brewery-id");
        assert_eq!(RenameRule::Lower.apply("Active"), "active");
    }

    #[test]
    fn test_field_attrs() {
        let field: syn::Field = syn::parse_quote! {
            #[serde(rename = "beerName", default, skip_serializing_if = "Option::is_none")]
            #[n1ql(converter = "unix_millis", key)]
            name: Option<String>
        };

        let attrs = FieldAttrs::parse(&field.attrs).unwrap();

        assert_eq!(attrs.rename.as_deref(), Some("beerName"));
        assert_eq!(attrs.converter.as_deref(), Some("unix_millis"));
        assert!(attrs.key);
        assert!(!attrs.skip);
    }
}
