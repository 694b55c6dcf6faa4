//! Convenient re-exports of commonly used types from n1ql-linq.
//!
//! ```ignore
//! use n1ql_linq::prelude::*;
//! ```
//!
//! This provides access to:
//! - Model, document and tracking traits with their derive macros
//! - The query builder, expressions and statement generation
//! - The bucket context, backends and builders
//! - Error types

pub use n1ql_linq_core::{
    backend::{BucketBackend, BucketBackendBuilder, MutationResult, QueryRequest},
    bucket::{BucketContext, BucketContextBuilder},
    context::{BucketConfig, ClusterVersion, QueryGenerationContext, ScanConsistency},
    document::{Document, DocumentExt, DocumentKey, DocumentMetadata, WithMetadata},
    error::{N1qlError, N1qlResult},
    executor::QueryExecutor,
    expression::Expr,
    generate::{QueryPlan, ResultShape, generate_query},
    naming::NamingStrategy,
    query::{HashHint, IndexKind, QueryModel, SortDirection},
    queryable::Queryable,
    tracking::{Trackable, Tracked, TrackedList, TrackedObject, create_proxy},
    types::{Model, TypeRef},
};
pub use n1ql_linq_macros::{Document, Model, Trackable};
