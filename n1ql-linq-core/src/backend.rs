//! Bucket backend abstraction.
//!
//! The core never talks to a cluster directly. A [`BucketBackend`] receives generated
//! N1QL statements and key/value writes and reports their outcome; the query executor
//! and the unit of work are written against this trait only.
//!
//! # Traits
//!
//! - [`BucketBackend`]: The async interface to one bucket
//! - [`BucketBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! let backend = InMemoryBucket::builder().bucket_name("beer-sample").build().await?;
//!
//! let result = backend.upsert("beer-1", json!({ "name": "Pliny" })).await?;
//! assert!(result.success);
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

use crate::{
    context::{ClusterVersion, ScanConsistency},
    error::N1qlResult,
};

/// A statement submitted to the query service.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub statement: String,
    pub scan_consistency: ScanConsistency,
}

impl QueryRequest {
    pub fn new(statement: impl Into<String>) -> Self {
        Self { statement: statement.into(), scan_consistency: ScanConsistency::default() }
    }

    pub fn with_scan_consistency(mut self, consistency: ScanConsistency) -> Self {
        self.scan_consistency = consistency;
        self
    }
}

/// The outcome of a key/value write as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult {
    pub success: bool,
    /// The store's status, e.g. `Success` or `KeyNotFound`.
    pub status: String,
    pub cas: u64,
}

impl MutationResult {
    pub fn success(cas: u64) -> Self {
        Self { success: true, status: "Success".to_string(), cas }
    }

    pub fn failure(status: impl Into<String>) -> Self {
        Self { success: false, status: status.into(), cas: 0 }
    }
}

/// Abstract interface to a single bucket.
///
/// Write methods return a [`MutationResult`] rather than an error when the store
/// rejects a write; `Err` is reserved for transport or backend failures.
#[async_trait]
pub trait BucketBackend: Send + Sync + Debug {
    /// The name of the bucket this backend serves.
    fn bucket_name(&self) -> &str;

    /// The version of the cluster, used to gate query features.
    async fn cluster_version(&self) -> N1qlResult<ClusterVersion>;

    /// Executes a N1QL statement and returns its result rows.
    async fn query(&self, request: QueryRequest) -> N1qlResult<Vec<Value>>;

    /// Inserts or replaces the document stored under `key`.
    async fn upsert(&self, key: &str, document: Value) -> N1qlResult<MutationResult>;

    /// Removes the document stored under `key`.
    async fn remove(&self, key: &str) -> N1qlResult<MutationResult>;

    /// Reads the document stored under `key`.
    async fn get(&self, key: &str) -> N1qlResult<Option<Value>>;

    /// Releases any resources held by the backend.
    async fn shutdown(self) -> N1qlResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> BucketBackend for &B
where
    B: BucketBackend,
{
    fn bucket_name(&self) -> &str {
        (*self).bucket_name()
    }

    async fn cluster_version(&self) -> N1qlResult<ClusterVersion> {
        (*self).cluster_version().await
    }

    async fn query(&self, request: QueryRequest) -> N1qlResult<Vec<Value>> {
        (*self).query(request).await
    }

    async fn upsert(&self, key: &str, document: Value) -> N1qlResult<MutationResult> {
        (*self).upsert(key, document).await
    }

    async fn remove(&self, key: &str) -> N1qlResult<MutationResult> {
        (*self).remove(key).await
    }

    async fn get(&self, key: &str) -> N1qlResult<Option<Value>> {
        (*self).get(key).await
    }
}

/// Factory trait for creating bucket backends.
#[async_trait]
pub trait BucketBackendBuilder {
    type Backend: BucketBackend;

    async fn build(self) -> N1qlResult<Self::Backend>;
}
