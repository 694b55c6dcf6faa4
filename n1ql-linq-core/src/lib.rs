//! Translation of LINQ-style query models into N1QL, with change tracking for documents.
//!
//! This crate is the core of the n1ql-linq project and provides:
//!
//! - **Type information** ([`types`]) - Static types of members and expressions, the [`Model`](types::Model) trait
//! - **Expressions** ([`expression`]) - The expression tree queries are built from
//! - **Query models** ([`query`], [`queryable`]) - Query sources, body clauses, result operators and a fluent builder
//! - **Normalization** ([`normalize`]) - Rewrites applied before rendering
//! - **Naming and conversion** ([`naming`], [`convert`]) - Member name resolution and serialization converters
//! - **Method translation** ([`translators`], [`functions`]) - N1QL renderings of method calls
//! - **Rendering** ([`render`], [`parts`], [`generate`]) - Expression and statement generation
//! - **Execution** ([`backend`], [`executor`]) - The bucket backend abstraction and result materialization
//! - **Documents and tracking** ([`document`], [`tracking`], [`bucket`]) - Keys, dirty tracking and the unit of work
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use n1ql_linq_core::{context::QueryGenerationContext, generate::generate_query, queryable::Queryable};
//!
//! let model = Queryable::of::<Beer>("beer-sample")
//!     .filter(|b| b.field("abv").gt(6))
//!     .order_by(|b| b.field("name"))
//!     .take(10)
//!     .build();
//!
//! let plan = generate_query(&model, &QueryGenerationContext::default())?;
//! assert_eq!(
//!     plan.statement,
//!     "SELECT `Extent1`.* FROM `beer-sample` as `Extent1` WHERE (`Extent1`.`abv` > 6) ORDER BY `Extent1`.`name` ASC LIMIT 10"
//! );
//! ```

#[allow(unused_extern_crates)]
extern crate self as n1ql_linq_core;

pub mod backend;
pub mod bucket;
pub mod context;
pub mod convert;
pub mod document;
pub mod error;
pub mod executor;
pub mod expression;
pub mod functions;
pub mod generate;
pub mod method;
pub mod naming;
pub mod normalize;
pub mod parts;
pub mod query;
pub mod queryable;
pub mod render;
pub mod tracking;
pub mod translators;
pub mod types;
