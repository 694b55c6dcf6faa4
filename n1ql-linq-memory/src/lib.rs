//! In-memory bucket backend for n1ql-linq.
//!
//! This crate provides a thread-safe, in-memory implementation of the `BucketBackend`
//! trait. Key/value operations behave like a real bucket, including CAS values and
//! `KeyNotFound` on removal of a missing key. Queries are not evaluated; they are
//! recorded and answered from scripted responses, which makes the bucket suitable for
//! testing generated statements and the unit of work.
//!
//! # Quick Start
//!
//! ```ignore
//! use n1ql_linq::{prelude::*, memory::InMemoryBucket};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryBucket::builder().bucket_name("beer-sample").build().await?;
//!     let mut context = BucketContext::builder(backend).build().await?;
//!
//!     context.save(&beer).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as n1ql_linq_memory;

pub mod bucket;

pub use bucket::{InMemoryBucket, InMemoryBucketBuilder};
