use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Error, Fields, GenericArgument, PathArguments, Type, ext::IdentExt};

use crate::attrs::FieldAttrs;

// derive_trackable
pub fn derive_trackable(input: TokenStream) -> TokenStream {
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
    let type_name = ident.unraw().to_string();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            other => {
                return Err(Error::new_spanned(
                    other,
                    format!("cannot create change-tracking proxy for {type_name}: only structs with named fields can be tracked"),
                ));
            }
        },
        Data::Enum(_) | Data::Union(_) => {
            return Err(Error::new_spanned(
                ident,
                format!("cannot create change-tracking proxy for {type_name}: only structs with named fields can be tracked"),
            ));
        }
    };

    let mut members = Vec::new();
    let mut tracked_members = Vec::new();
    let mut visits = Vec::new();

    for field in fields {
        if FieldAttrs::parse(&field.attrs)?.skip {
            continue;
        }
        let Some(field_ident) = field.ident.as_ref() else {
            continue;
        };
        let name = field_ident.unraw().to_string();
        members.push(name.clone());

        match classify(&field.ty) {
            Member::Plain => {}
            Member::Tracked => {
                tracked_members.push(name);
                visits.push(quote! { f(&self.#field_ident); });
            }
            Member::OptionalTracked => {
                tracked_members.push(name);
                visits.push(quote! {
                    if let ::std::option::Option::Some(member) = &self.#field_ident {
                        f(member);
                    }
                });
            }
        }
    }

    Ok(quote! {
        impl #impl_generics ::n1ql_linq::tracking::Trackable for #ident #ty_generics #where_clause {
            fn describe() -> ::n1ql_linq::tracking::ProxyDescriptor {
                ::n1ql_linq::tracking::ProxyDescriptor {
                    type_name: ::std::string::String::from(#type_name),
                    members: ::std::vec![#(#members),*],
                    tracked_members: ::std::vec![#(#tracked_members),*],
                }
            }

            #[allow(unused_variables)]
            fn for_each_tracked(&self, f: &mut dyn FnMut(&dyn ::n1ql_linq::tracking::TrackedObject)) {
                #(#visits)*
            }
        }
    })
}

///
/// Member
///

enum Member {
    Plain,
    Tracked,
    OptionalTracked,
}

fn classify(ty: &Type) -> Member {
    if is_tracked(ty) {
        return Member::Tracked;
    }

    match option_inner(ty) {
        Some(inner) if is_tracked(inner) => Member::OptionalTracked,
        _ => Member::Plain,
    }
}

fn is_tracked(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| segment.ident == "Tracked" || segment.ident == "TrackedList")
}

fn option_inner(ty: &Type) -> Option<&Type> {
    let segment = last_segment(ty).filter(|segment| segment.ident == "Option")?;
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };

    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    })
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    let Type::Path(path) = ty else {
        return None;
    };

    path.path.segments.last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_members_are_visited() {
        let tokens = derive_trackable(quote! {
            struct Brewery {
                name: String,
                address: Tracked<Address>,
                beers: TrackedList<Tracked<Beer>>,
                owner: Option<Tracked<Person>>,
                tags: Vec<String>,
            }
        })
        .to_string();

        assert!(tokens.contains("f (& self . address)"));
        assert!(tokens.contains("f (& self . beers)"));
        assert!(tokens.contains("& self . owner"));
        assert!(!tokens.contains("self . tags"));
    }

    #[test]
    fn test_enum_is_rejected() {
        let tokens = derive_trackable(quote! { enum Style { Ipa, Stout } }).to_string();

        assert!(tokens.contains("cannot create change-tracking proxy for Style"));
    }

    #[test]
    fn test_tuple_struct_is_rejected() {
        let tokens = derive_trackable(quote! { struct Abv(f64); }).to_string();

        assert!(tokens.contains("cannot create change-tracking proxy for Abv"));
    }
}
