//! Procedural macros for the n1ql-linq project.
//!
//! - `#[derive(Model)]` exposes the static type of a struct or unit-variant enum to the
//!   query translator, honoring `serde` renames and `#[n1ql(...)]` attributes.
//! - `#[derive(Document)]` implements `Document` from the field marked `#[n1ql(key)]`.
//! - `#[derive(Trackable)]` generates the child visitor used by change tracking.
//!
//! Generated code refers to the `n1ql_linq` facade crate.

use proc_macro::TokenStream;

mod attrs;
mod document;
mod model;
mod trackable;

#[proc_macro_derive(Model, attributes(n1ql))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    model::derive_model(input.into()).into()
}

#[proc_macro_derive(Document, attributes(n1ql))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    document::derive_document(input.into()).into()
}

#[proc_macro_derive(Trackable, attributes(n1ql))]
pub fn derive_trackable(input: TokenStream) -> TokenStream {
    trackable::derive_trackable(input.into()).into()
}
