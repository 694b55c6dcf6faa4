//! Main n1ql-linq crate: LINQ-style queries over N1QL buckets, with change tracking.
//!
//! This crate is the primary entry point for users of n1ql-linq. It re-exports the core
//! types, the derive macros and the in-memory backend.
//!
//! # Features
//!
//! - **Typed query models** - Describe documents with `#[derive(Model)]` and build queries fluently
//! - **N1QL generation** - Joins, nests, unnests, grouping, aggregates and quantifiers, gated by cluster version
//! - **Change tracking** - `#[derive(Trackable)]` documents report mutations through `Tracked<T>`
//! - **Unit of work** - `BucketContext` batches saves and removals until `submit_changes`
//!
//! # Quick Start
//!
//! ```ignore
//! use n1ql_linq::{prelude::*, memory::InMemoryBucket};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Model, Document, Trackable)]
//! #[serde(rename_all = "camelCase")]
//! pub struct Beer {
//!     #[n1ql(key)]
//!     pub id: String,
//!     pub name: String,
//!     pub brewery_id: String,
//!     pub abv: f64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> N1qlResult<()> {
//!     let backend = InMemoryBucket::builder().bucket_name("beer-sample").build().await?;
//!     let mut context = BucketContext::builder(backend).build().await?;
//!
//!     let query = context
//!         .query::<Beer>()
//!         .filter(|beer| beer.field("abv").gt(6))
//!         .order_by(|beer| beer.field("name"))
//!         .take(10)
//!         .build();
//!
//!     // SELECT `Extent1`.* FROM `beer-sample` as `Extent1`
//!     //   WHERE (`Extent1`.`abv` > 6) ORDER BY `Extent1`.`name` ASC LIMIT 10
//!     let strong: Vec<Beer> = context.execute(&query).await?;
//!
//!     context.begin_change_tracking();
//!     for beer in &strong {
//!         context.save(beer).await?;
//!     }
//!     context.submit_changes().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Change Tracking
//!
//! ```ignore
//! let mut beers = context.query_tracked::<Beer>(&query).await?;
//! beers[0].set(|beer| &mut beer.abv, 8.0);
//! assert!(beers[0].is_dirty());
//!
//! context.submit_changes().await?;
//! assert!(!beers[0].is_dirty());
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory bucket for development and testing

#[allow(unused_extern_crates)]
extern crate self as n1ql_linq;

pub mod prelude;

pub use n1ql_linq_core::{
    backend, bucket, context, convert, document, error, executor, expression, functions, generate,
    method, naming, normalize, parts, query, queryable, render, tracking, translators, types,
};
pub use n1ql_linq_macros::{Document, Model, Trackable};

// Re-export JSON types for convenience
pub use serde_json;

/// In-memory backend implementations.
pub mod memory {
    pub use n1ql_linq_memory::{InMemoryBucket, InMemoryBucketBuilder};
}
