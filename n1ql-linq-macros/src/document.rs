use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Error, Fields, ext::IdentExt};

use crate::attrs::{ContainerAttrs, FieldAttrs};

// derive_document
pub fn derive_document(input: TokenStream) -> TokenStream {
    let input: DeriveInput = match syn::parse2(input) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };

    match expand(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let container = ContainerAttrs::parse(&input.attrs)?;

    let Data::Struct(data) = &input.data else {
        return Err(Error::new_spanned(ident, "Document can only be derived for structs"));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(Error::new_spanned(
            &data.fields,
            "Document can only be derived for structs with named fields",
        ));
    };

    let mut key_field = None;
    for field in &named.named {
        if FieldAttrs::parse(&field.attrs)?.key {
            if key_field.is_some() {
                return Err(Error::new_spanned(field, "only one field can be marked #[n1ql(key)]"));
            }
            key_field = field.ident.as_ref();
        }
    }
    let Some(key_field) = key_field else {
        return Err(Error::new_spanned(
            ident,
            "Document requires a field marked #[n1ql(key)]",
        ));
    };

    let document_type = container
        .document_type
        .unwrap_or_else(|| ident.unraw().to_string().to_lowercase());

    Ok(quote! {
        impl #impl_generics ::n1ql_linq::document::Document for #ident #ty_generics #where_clause {
            fn document_key(&self) -> ::std::option::Option<::std::string::String> {
                ::n1ql_linq::document::DocumentKey::to_document_key(&self.#key_field)
            }

            fn document_type() -> &'static str {
                #document_type
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_field_and_type() {
        let tokens = derive_document(quote! {
            #[n1ql(document_type = "brewery")]
            struct Brewery {
                #[n1ql(key)]
                id: String,
                name: String,
            }
        })
        .to_string();

        assert!(tokens.contains("self . id"));
        assert!(tokens.contains("\"brewery\""));
    }

    #[test]
    fn test_default_type_is_lowercase_name() {
        let tokens = derive_document(quote! {
            struct Beer { #[n1ql(key)] id: Option<i64> }
        })
        .to_string();

        assert!(tokens.contains("\"beer\""));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let tokens = derive_document(quote! { struct Beer { name: String } }).to_string();

        assert!(tokens.contains("compile_error"));
        assert!(tokens.contains("n1ql(key)"));
    }
}
