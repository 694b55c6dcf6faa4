//! In-memory bucket implementation.
//!
//! Documents are held as JSON values in a HashMap behind an async-safe read-write lock.
//! The bucket does not evaluate N1QL: every statement it receives is recorded, and the
//! rows returned are the responses scripted with [`InMemoryBucket::push_response`], in
//! order. This makes it a test double for the query path and a working store for the
//! key/value path.

use async_trait::async_trait;
use mea::rwlock::RwLock;
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tracing::debug;

use n1ql_linq_core::{
    backend::{BucketBackend, BucketBackendBuilder, MutationResult, QueryRequest},
    context::ClusterVersion,
    error::N1qlResult,
};

const TARGET: &str = "n1ql_linq::memory";

#[derive(Debug, Clone, PartialEq)]
struct StoredDocument {
    value: Value,
    cas: u64,
}

/// Thread-safe in-memory bucket.
///
/// `InMemoryBucket` is cloneable and uses `Arc`-wrapped internal state; clones share
/// the same documents, scripted responses and recorded statements.
///
/// # Example
///
/// ```ignore
/// use n1ql_linq_memory::InMemoryBucket;
/// use serde_json::json;
///
/// let bucket = InMemoryBucket::builder().bucket_name("beer-sample").build().await?;
/// bucket.push_response(vec![json!("Pliny")]).await;
///
/// let rows = bucket.query(QueryRequest::new("SELECT RAW name FROM `beer-sample`")).await?;
/// assert_eq!(rows, vec![json!("Pliny")]);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryBucket {
    name: String,
    cluster_version: ClusterVersion,
    documents: Arc<RwLock<HashMap<String, StoredDocument>>>,
    responses: Arc<RwLock<VecDeque<Vec<Value>>>>,
    requests: Arc<RwLock<Vec<QueryRequest>>>,
    cas: Arc<AtomicU64>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryBucket {
    /// Creates an empty bucket named `default`, reporting cluster version 6.5.0.
    pub fn new() -> Self {
        Self::with_settings("default".to_string(), ClusterVersion::new(6, 5, 0))
    }

    fn with_settings(name: String, cluster_version: ClusterVersion) -> Self {
        Self {
            name,
            cluster_version,
            documents: Arc::new(RwLock::new(HashMap::new())),
            responses: Arc::new(RwLock::new(VecDeque::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
            cas: Arc::new(AtomicU64::new(0)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn builder() -> InMemoryBucketBuilder {
        InMemoryBucketBuilder::default()
    }

    /// Queues the rows returned by the next query.
    pub async fn push_response(&self, rows: Vec<Value>) {
        self.responses.write().await.push_back(rows);
    }

    /// Every query request received so far.
    pub async fn requests(&self) -> Vec<QueryRequest> {
        self.requests.read().await.clone()
    }

    /// The statements of every query received so far.
    pub async fn statements(&self) -> Vec<String> {
        self.requests
            .read()
            .await
            .iter()
            .map(|request| request.statement.clone())
            .collect()
    }

    /// Makes subsequent writes report `TemporaryFailure`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// The CAS of the document stored under `key`.
    pub async fn cas(&self, key: &str) -> Option<u64> {
        self.documents.read().await.get(key).map(|document| document.cas)
    }

    fn next_cas(&self) -> u64 {
        self.cas.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn failing(&self) -> Option<MutationResult> {
        self.fail_writes
            .load(Ordering::Acquire)
            .then(|| MutationResult::failure("TemporaryFailure"))
    }
}

impl Default for InMemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketBackend for InMemoryBucket {
    fn bucket_name(&self) -> &str {
        &self.name
    }

    async fn cluster_version(&self) -> N1qlResult<ClusterVersion> {
        Ok(self.cluster_version)
    }

    async fn query(&self, request: QueryRequest) -> N1qlResult<Vec<Value>> {
        debug!(target: TARGET, statement = %request.statement, "query received");
        self.requests.write().await.push(request);

        Ok(self.responses.write().await.pop_front().unwrap_or_default())
    }

    async fn upsert(&self, key: &str, document: Value) -> N1qlResult<MutationResult> {
        if let Some(failure) = self.failing() {
            return Ok(failure);
        }

        let cas = self.next_cas();
        self.documents
            .write()
            .await
            .insert(key.to_string(), StoredDocument { value: document, cas });

        Ok(MutationResult::success(cas))
    }

    async fn remove(&self, key: &str) -> N1qlResult<MutationResult> {
        if let Some(failure) = self.failing() {
            return Ok(failure);
        }

        match self.documents.write().await.remove(key) {
            Some(_) => Ok(MutationResult::success(self.next_cas())),
            None => Ok(MutationResult::failure("KeyNotFound")),
        }
    }

    async fn get(&self, key: &str) -> N1qlResult<Option<Value>> {
        Ok(self
            .documents
            .read()
            .await
            .get(key)
            .map(|document| document.value.clone()))
    }
}

/// Builder for constructing [`InMemoryBucket`] instances.
#[derive(Debug, Default)]
pub struct InMemoryBucketBuilder {
    name: Option<String>,
    cluster_version: Option<ClusterVersion>,
    documents: Vec<(String, Value)>,
}

impl InMemoryBucketBuilder {
    pub fn bucket_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn cluster_version(mut self, version: ClusterVersion) -> Self {
        self.cluster_version = Some(version);
        self
    }

    /// Seeds the bucket with a document.
    pub fn document(mut self, key: impl Into<String>, value: Value) -> Self {
        self.documents.push((key.into(), value));
        self
    }
}

#[async_trait]
impl BucketBackendBuilder for InMemoryBucketBuilder {
    type Backend = InMemoryBucket;

    async fn build(self) -> N1qlResult<Self::Backend> {
        let bucket = InMemoryBucket::with_settings(
            self.name.unwrap_or_else(|| "default".to_string()),
            self.cluster_version.unwrap_or(ClusterVersion::new(6, 5, 0)),
        );

        for (key, value) in self.documents {
            bucket.upsert(&key, value).await?;
        }
        Ok(bucket)
    }
}
