use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DataEnum, DeriveInput, Error, Expr, ExprLit, ExprUnary, Fields, Lit, UnOp, ext::IdentExt};

use crate::attrs::{ContainerAttrs, FieldAttrs};

// derive_model
pub fn derive_model(input: TokenStream) -> TokenStream {
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

    let type_ref = match &input.data {
        Data::Struct(data) => {
            let Fields::Named(named) = &data.fields else {
                return Err(Error::new_spanned(
                    &data.fields,
                    "Model can only be derived for structs with named fields",
                ));
            };
            struct_type_ref(&ident.unraw().to_string(), named.named.iter(), &container)?
        }
        Data::Enum(data) => enum_type_ref(&ident.unraw().to_string(), data, &container)?,
        Data::Union(_) => {
            return Err(Error::new_spanned(ident, "Model cannot be derived for unions"));
        }
    };

    // Generic types build their type on every call; a shared static would mix
    // instantiations.
    let body = if input.generics.params.is_empty() {
        quote! {
            static TYPE: ::std::sync::OnceLock<::n1ql_linq::types::TypeRef> = ::std::sync::OnceLock::new();
            TYPE.get_or_init(|| #type_ref).clone()
        }
    } else {
        type_ref
    };

    Ok(quote! {
        impl #impl_generics ::n1ql_linq::types::Model for #ident #ty_generics #where_clause {
            fn type_ref() -> ::n1ql_linq::types::TypeRef {
                #body
            }
        }
    })
}

fn struct_type_ref<'a>(
    name: &str,
    fields: impl Iterator<Item = &'a syn::Field>,
    container: &ContainerAttrs,
) -> syn::Result<TokenStream> {
    let mut members = Vec::new();

    for field in fields {
        let attrs = FieldAttrs::parse(&field.attrs)?;
        if attrs.skip {
            continue;
        }

        let Some(field_ident) = field.ident.as_ref() else {
            continue;
        };
        let member_name = field_ident.unraw().to_string();
        let ty = &field.ty;

        let rename = attrs
            .wire_name(field_ident, container.rename_all)
            .map(|wire| quote! { .renamed(#wire) });
        let converter = attrs.converter.as_ref().map(|converter| {
            quote! { .with_converter(::n1ql_linq::types::ConverterKind::parse(#converter)) }
        });
        let key = attrs.key.then(|| quote! { .key() });

        members.push(quote! {
            .member_with(
                #member_name,
                <#ty as ::n1ql_linq::types::Model>::type_ref(),
                ::n1ql_linq::types::MemberAttributes::default() #rename #converter #key,
            )
        });
    }

    Ok(quote! {
        ::n1ql_linq::types::ObjectType::builder(#name)
            #(#members)*
            .build_type()
    })
}

fn enum_type_ref(name: &str, data: &DataEnum, container: &ContainerAttrs) -> syn::Result<TokenStream> {
    let mut variants = Vec::new();
    let mut next: i64 = 0;

    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(Error::new_spanned(
                variant,
                "Model can only be derived for enums with unit variants",
            ));
        }

        let value = match &variant.discriminant {
            Some((_, expr)) => discriminant(expr)?,
            None => next,
        };
        next = value + 1;

        let attrs = FieldAttrs::parse(&variant.attrs)?;
        let variant_name = attrs
            .wire_name(&variant.ident, container.rename_all)
            .unwrap_or_else(|| variant.ident.unraw().to_string());

        variants.push(quote! { (#variant_name, #value) });
    }

    Ok(quote! {
        ::n1ql_linq::types::TypeRef::Enum(::std::sync::Arc::new(
            ::n1ql_linq::types::EnumType::new(#name, [#(#variants),*]),
        ))
    })
}

fn discriminant(expr: &Expr) -> syn::Result<i64> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Int(int), .. }) => int.base10_parse(),
        Expr::Unary(ExprUnary { op: UnOp::Neg(_), expr, .. }) => Ok(-discriminant(expr)?),
        other => Err(Error::new_spanned(other, "enum discriminants must be integer literals")),
    }
}
