//! The bucket context: query entry point and unit of work.
//!
//! A [`BucketContext`] wraps a [`BucketBackend`] with the query generation settings of
//! one bucket. Outside a change-tracking session, [`save`](BucketContext::save) and
//! [`remove`](BucketContext::remove) write through to the backend immediately. Between
//! [`begin_change_tracking`](BucketContext::begin_change_tracking) and
//! [`end_change_tracking`](BucketContext::end_change_tracking) they only record a
//! pending change per document key. Documents loaded with
//! [`query_tracked`](BucketContext::query_tracked) during a session are watched as well:
//! [`submit_changes`](BucketContext::submit_changes) writes the pending changes and every
//! watched document that is dirty, in one pass, and marks the written documents clean.
//!
//! # Example
//!
//! ```ignore
//! let mut context = BucketContext::builder(InMemoryBucket::builder().build().await?)
//!     .config(BucketConfig { bucket_name: "beer-sample".into(), ..Default::default() })
//!     .build()
//!     .await?;
//!
//! context.begin_change_tracking();
//! context.save(&beer).await?;
//! context.save(&beer).await?;
//! assert_eq!(context.modified_count(), 1);
//!
//! context.submit_changes().await?;
//! assert_eq!(context.modified_count(), 0);
//! ```

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::{debug, warn};

use crate::{
    backend::BucketBackend,
    context::{BucketConfig, QueryGenerationContext},
    document::{Document, DocumentExt, WithMetadata},
    error::{N1qlError, N1qlResult},
    executor::QueryExecutor,
    query::QueryModel,
    queryable::Queryable,
    tracking::{DocumentSnapshot, Trackable, Tracked, TrackedObject, TrackingNode},
    types::Model,
};

const TARGET: &str = "n1ql_linq::bucket";

/// A write recorded during a change-tracking session.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingChange {
    Upsert(Value),
    Remove,
}

/// A document known to the session; loaded documents carry their latest state.
#[derive(Debug)]
struct TrackedDocument {
    node: Arc<TrackingNode>,
    snapshot: Option<Arc<DocumentSnapshot>>,
}

#[derive(Debug, Default)]
struct TrackingSession {
    pending: BTreeMap<String, PendingChange>,
    tracked: BTreeMap<String, TrackedDocument>,
}

impl TrackingSession {
    /// Keys of loaded documents changed since they were loaded or last submitted, and
    /// without an explicit pending change.
    fn dirty_loaded(&self) -> impl Iterator<Item = (&String, &Arc<DocumentSnapshot>)> {
        self.tracked.iter().filter_map(move |(key, document)| match &document.snapshot {
            Some(snapshot) if document.node.is_dirty() && !self.pending.contains_key(key) => {
                Some((key, snapshot))
            }
            _ => None,
        })
    }
}

/// Query entry point and unit of work for one bucket.
#[derive(Debug)]
pub struct BucketContext<B: BucketBackend> {
    executor: QueryExecutor<B>,
    bucket_name: String,
    session: Option<TrackingSession>,
}

impl<B: BucketBackend> BucketContext<B> {
    /// Creates a context with explicit query settings.
    pub fn new(backend: B, context: QueryGenerationContext) -> Self {
        let bucket_name = backend.bucket_name().to_string();
        Self { executor: QueryExecutor::new(backend, context), bucket_name, session: None }
    }

    pub fn builder(backend: B) -> BucketContextBuilder<B> {
        BucketContextBuilder { backend, config: None, context: None }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn backend(&self) -> &B {
        self.executor.backend()
    }

    pub fn executor(&self) -> &QueryExecutor<B> {
        &self.executor
    }

    /// Starts a query over documents of type `T` in this bucket.
    pub fn query<T: Model>(&self) -> Queryable {
        Queryable::of::<T>(self.bucket_name.clone())
    }

    pub async fn execute<T: DeserializeOwned>(&self, model: &QueryModel) -> N1qlResult<Vec<T>> {
        self.executor.execute_collection(model).await
    }

    pub async fn execute_scalar<T: DeserializeOwned>(&self, model: &QueryModel) -> N1qlResult<T> {
        self.executor.execute_scalar(model).await
    }

    pub async fn execute_single<T: DeserializeOwned>(
        &self,
        model: &QueryModel,
        return_default_if_empty: bool,
    ) -> N1qlResult<Option<T>> {
        self.executor.execute_single(model, return_default_if_empty).await
    }

    /// Executes `model` and wraps every document for change tracking.
    ///
    /// During a change-tracking session the loaded documents are registered under their
    /// key, taken from the row metadata when present, and written by
    /// [`submit_changes`](Self::submit_changes) once they are dirty.
    pub async fn query_tracked<T>(&mut self, model: &QueryModel) -> N1qlResult<Vec<Tracked<T>>>
    where
        T: Document + Trackable + Serialize,
    {
        let rows: Vec<Value> = self.executor.execute_collection(model).await?;
        let mut documents = Vec::with_capacity(rows.len());

        for row in rows {
            let WithMetadata { mut document, metadata } = WithMetadata::<Tracked<T>>::from_row(row)?;

            if let Some(session) = self.session.as_mut() {
                let key = metadata
                    .map(|metadata| metadata.id)
                    .filter(|id| !id.is_empty())
                    .or_else(|| document.document_key())
                    .ok_or_else(|| N1qlError::DocumentKeyMissing(T::document_type().to_string()))?;
                let snapshot = document.attach_snapshot();
                session.tracked.insert(
                    key,
                    TrackedDocument { node: document.tracking_node().clone(), snapshot: Some(snapshot) },
                );
            }
            documents.push(document);
        }
        Ok(documents)
    }

    /// Reads one document by key.
    pub async fn get<D: Document>(&self, key: &str) -> N1qlResult<Option<D>> {
        match self.backend().get(key).await? {
            Some(value) => Ok(Some(D::from_json(value)?)),
            None => Ok(None),
        }
    }

    /// Writes `document`, or records the write if change tracking is active.
    ///
    /// # Errors
    ///
    /// Fails with [`N1qlError::DocumentKeyMissing`] if the document has no key and with
    /// [`N1qlError::WriteFailed`] if an immediate write is rejected by the store.
    pub async fn save<D: Document>(&mut self, document: &D) -> N1qlResult<()> {
        let key = document.require_key()?;
        let change = PendingChange::Upsert(document.to_json()?);

        if let Some(session) = self.session.as_mut() {
            session
                .tracked
                .entry(key.clone())
                .or_insert_with(|| TrackedDocument { node: TrackingNode::new(), snapshot: None });
            session.pending.insert(key, change);
            return Ok(());
        }
        self.write(&key, &change).await
    }

    /// Removes `document`, or records the removal if change tracking is active.
    pub async fn remove<D: Document>(&mut self, document: &D) -> N1qlResult<()> {
        let key = document.require_key()?;

        if let Some(session) = self.session.as_mut() {
            session.tracked.remove(&key);
            session.pending.insert(key, PendingChange::Remove);
            return Ok(());
        }
        self.write(&key, &PendingChange::Remove).await
    }

    pub fn begin_change_tracking(&mut self) {
        if self.session.is_none() {
            self.session = Some(TrackingSession::default());
        }
    }

    /// Ends the session, discarding changes that were not submitted.
    pub fn end_change_tracking(&mut self) {
        if let Some(session) = self.session.take() {
            if !session.pending.is_empty() {
                warn!(target: TARGET, discarded = session.pending.len(), "ending change tracking with unsubmitted changes");
            }
        }
    }

    pub fn is_change_tracking(&self) -> bool {
        self.session.is_some()
    }

    /// Number of distinct documents the next submit would write: pending saves and
    /// removals plus loaded documents that are dirty.
    pub fn modified_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.pending.len() + session.dirty_loaded().count())
    }

    /// Number of documents known to the current session.
    pub fn tracked_count(&self) -> usize {
        self.session.as_ref().map_or(0, |session| session.tracked.len())
    }

    /// Number of tracked documents mutated since they were loaded.
    pub fn dirty_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| {
                session.tracked.values().filter(|document| document.node.is_dirty()).count()
            })
    }

    /// Writes every pending change and every dirty loaded document, and returns how many
    /// documents were written. Written documents are marked clean.
    ///
    /// On the first failed write the failed change and those not yet attempted stay
    /// pending; loaded documents among them stay dirty instead.
    pub async fn submit_changes(&mut self) -> N1qlResult<usize> {
        let Some(session) = self.session.as_mut() else {
            return Ok(0);
        };

        let mut dirty = Vec::new();
        for (key, snapshot) in session.dirty_loaded() {
            if let Some(state) = snapshot.latest() {
                dirty.push((key.clone(), state?));
            }
        }

        let mut loaded = BTreeSet::new();
        let mut changes = std::mem::take(&mut session.pending);
        for (key, state) in dirty {
            changes.insert(key.clone(), PendingChange::Upsert(state));
            loaded.insert(key);
        }

        let total = changes.len();
        let mut changes = changes.into_iter();

        while let Some((key, change)) = changes.next() {
            if let Err(err) = self.write(&key, &change).await {
                let remaining: BTreeMap<_, _> = std::iter::once((key, change))
                    .chain(changes)
                    .filter(|(key, _)| !loaded.contains(key))
                    .collect();

                if let Some(session) = self.session.as_mut() {
                    session.pending = remaining;
                }
                return Err(err);
            }

            if let Some(document) = self.session.as_ref().and_then(|session| session.tracked.get(&key)) {
                document.node.clear_status();
            }
        }

        debug!(target: TARGET, written = total, "submitted changes");
        Ok(total)
    }

    async fn write(&self, key: &str, change: &PendingChange) -> N1qlResult<()> {
        let backend = self.executor.backend();
        let result = match change {
            PendingChange::Upsert(document) => backend.upsert(key, document.clone()).await?,
            PendingChange::Remove => backend.remove(key).await?,
        };

        if !result.success {
            warn!(target: TARGET, key, status = %result.status, "write failed");
            return Err(N1qlError::WriteFailed(key.to_string(), result.status));
        }
        Ok(())
    }
}

/// Builder for [`BucketContext`].
#[derive(Debug)]
pub struct BucketContextBuilder<B: BucketBackend> {
    backend: B,
    config: Option<BucketConfig>,
    context: Option<QueryGenerationContext>,
}

impl<B: BucketBackend> BucketContextBuilder<B> {
    pub fn config(mut self, config: BucketConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `context` as is, ignoring any configuration.
    pub fn context(mut self, context: QueryGenerationContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Builds the context, asking the backend for its cluster version unless the
    /// configuration pins one.
    pub async fn build(self) -> N1qlResult<BucketContext<B>> {
        let context = match (self.context, self.config) {
            (Some(context), _) => context,
            (None, config) => {
                let config = config.unwrap_or_default();
                let reported = match config.cluster_version {
                    Some(version) => version,
                    None => self.backend.cluster_version().await?,
                };
                QueryGenerationContext::from_config(&config, reported)
            }
        };

        Ok(BucketContext::new(self.backend, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{MutationResult, QueryRequest},
        context::ClusterVersion,
        tracking::ProxyDescriptor,
        types::{MemberAttributes, ObjectType, TypeRef},
    };
    use async_trait::async_trait;
    use rstest::rstest;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recording {
        rows: Vec<Value>,
        fail_writes: bool,
        writes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BucketBackend for Recording {
        fn bucket_name(&self) -> &str {
            "beer-sample"
        }

        async fn cluster_version(&self) -> N1qlResult<ClusterVersion> {
            Ok(ClusterVersion::new(6, 5, 0))
        }

        async fn query(&self, _: QueryRequest) -> N1qlResult<Vec<Value>> {
            Ok(self.rows.clone())
        }

        async fn upsert(&self, key: &str, _: Value) -> N1qlResult<MutationResult> {
            self.writes.lock().unwrap().push(format!("upsert {key}"));
            Ok(if self.fail_writes { MutationResult::failure("TemporaryFailure") } else { MutationResult::success(1) })
        }

        async fn remove(&self, key: &str) -> N1qlResult<MutationResult> {
            self.writes.lock().unwrap().push(format!("remove {key}"));
            Ok(if self.fail_writes { MutationResult::failure("KeyNotFound") } else { MutationResult::success(1) })
        }

        async fn get(&self, _: &str) -> N1qlResult<Option<Value>> {
            Ok(self.rows.first().cloned())
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Beer {
        id: String,
        name: String,
    }

    impl Model for Beer {
        fn type_ref() -> TypeRef {
            ObjectType::builder("Beer")
                .member_with("id", TypeRef::String, MemberAttributes::default().key())
                .member("name", TypeRef::String)
                .build_type()
        }
    }

    impl Document for Beer {
        fn document_key(&self) -> Option<String> {
            (!self.id.is_empty()).then(|| self.id.clone())
        }

        fn document_type() -> &'static str {
            "beer"
        }
    }

    impl Trackable for Beer {
        fn describe() -> ProxyDescriptor {
            ProxyDescriptor { type_name: "Beer".into(), members: vec!["id", "name"], tracked_members: vec![] }
        }

        fn for_each_tracked(&self, _: &mut dyn FnMut(&dyn TrackedObject)) {}
    }

    fn beer(id: &str) -> Beer {
        Beer { id: id.into(), name: "Pliny".into() }
    }

    async fn context(backend: Recording) -> BucketContext<Recording> {
        BucketContext::builder(backend).build().await.unwrap()
    }

    fn writes(context: &BucketContext<Recording>) -> Vec<String> {
        context.backend().writes.lock().unwrap().clone()
    }

    #[rstest]
    #[tokio::test]
    async fn test_untracked_save_writes_immediately() {
        let mut context = context(Recording::default()).await;

        context.save(&beer("b1")).await.unwrap();

        assert_eq!(writes(&context), vec!["upsert b1"]);
        assert_eq!(context.modified_count(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_untracked_write_failure_is_reported() {
        let mut context = context(Recording { fail_writes: true, ..Default::default() }).await;

        let result = context.remove(&beer("b1")).await;

        assert!(matches!(
            result,
            Err(N1qlError::WriteFailed(key, status)) if key == "b1" && status == "KeyNotFound"
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn test_missing_key_is_rejected() {
        let mut context = context(Recording::default()).await;

        let result = context.save(&beer("")).await;

        assert!(matches!(result, Err(N1qlError::DocumentKeyMissing(ty)) if ty == "beer"));
        assert!(writes(&context).is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_tracked_saves_count_once_per_key() {
        let mut context = context(Recording::default()).await;
        context.begin_change_tracking();

        context.save(&beer("b1")).await.unwrap();
        context.save(&beer("b1")).await.unwrap();
        context.save(&beer("b2")).await.unwrap();

        assert_eq!(context.modified_count(), 2);
        assert!(writes(&context).is_empty());

        let tracked = context.tracked_count();
        assert_eq!(context.submit_changes().await.unwrap(), 2);

        assert_eq!(context.modified_count(), 0);
        assert_eq!(context.tracked_count(), tracked);
        assert_eq!(writes(&context), vec!["upsert b1", "upsert b2"]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_remove_replaces_pending_save() {
        let mut context = context(Recording::default()).await;
        context.begin_change_tracking();

        context.save(&beer("b1")).await.unwrap();
        context.remove(&beer("b1")).await.unwrap();
        context.submit_changes().await.unwrap();

        assert_eq!(writes(&context), vec!["remove b1"]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_failed_submit_keeps_changes_pending() {
        let mut context = context(Recording { fail_writes: true, ..Default::default() }).await;
        context.begin_change_tracking();

        context.save(&beer("b1")).await.unwrap();
        context.save(&beer("b2")).await.unwrap();

        assert!(matches!(context.submit_changes().await, Err(N1qlError::WriteFailed(key, _)) if key == "b1"));
        assert_eq!(context.modified_count(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn test_end_change_tracking_discards_pending() {
        let mut context = context(Recording::default()).await;
        context.begin_change_tracking();
        context.save(&beer("b1")).await.unwrap();

        context.end_change_tracking();

        assert!(!context.is_change_tracking());
        assert_eq!(context.modified_count(), 0);
        assert_eq!(context.submit_changes().await.unwrap(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_query_tracked_registers_documents() {
        let rows = vec![json!({
            "id": "b1",
            "name": "Pliny",
            "__metadata": { "id": "beer-b1", "cas": 3 }
        })];
        let mut context = context(Recording { rows, ..Default::default() }).await;
        context.begin_change_tracking();

        let model = context.query::<Beer>().build();
        let mut beers = context.query_tracked::<Beer>(&model).await.unwrap();

        assert_eq!(context.tracked_count(), 1);
        assert_eq!(context.dirty_count(), 0);
        assert!(!beers[0].is_dirty());

        beers[0].set(|b| &mut b.name, "Pliny the Elder".into());
        assert_eq!(context.dirty_count(), 1);
        assert_eq!(context.modified_count(), 1);

        assert_eq!(context.submit_changes().await.unwrap(), 1);
        assert_eq!(writes(&context), vec!["upsert beer-b1"]);
        assert!(!beers[0].is_dirty());
        assert_eq!(context.dirty_count(), 0);
        assert_eq!(context.modified_count(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_explicit_save_takes_precedence_over_loaded_state() {
        let rows = vec![json!({ "id": "b1", "name": "Pliny" })];
        let mut context = context(Recording { rows, ..Default::default() }).await;
        context.begin_change_tracking();

        let model = context.query::<Beer>().build();
        let mut beers = context.query_tracked::<Beer>(&model).await.unwrap();
        beers[0].set(|b| &mut b.name, "Pliny the Younger".into());
        context.save(beers[0].get()).await.unwrap();

        assert_eq!(context.modified_count(), 1);
        assert_eq!(context.submit_changes().await.unwrap(), 1);
        assert_eq!(writes(&context), vec!["upsert b1"]);
        assert!(!beers[0].is_dirty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_failed_submit_leaves_loaded_document_dirty() {
        let rows = vec![json!({ "id": "b1", "name": "Pliny" })];
        let mut context = context(Recording { rows, fail_writes: true, ..Default::default() }).await;
        context.begin_change_tracking();

        let model = context.query::<Beer>().build();
        let mut beers = context.query_tracked::<Beer>(&model).await.unwrap();
        beers[0].set(|b| &mut b.name, "Blind Pig".into());

        assert!(context.submit_changes().await.is_err());
        assert!(beers[0].is_dirty());
        assert_eq!(context.modified_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_unchanged_loaded_document_is_not_written() {
        let rows = vec![json!({ "id": "b1", "name": "Pliny" })];
        let mut context = context(Recording { rows, ..Default::default() }).await;
        context.begin_change_tracking();

        let model = context.query::<Beer>().build();
        let _beers = context.query_tracked::<Beer>(&model).await.unwrap();

        assert_eq!(context.submit_changes().await.unwrap(), 0);
        assert!(writes(&context).is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_configured_version_overrides_backend() {
        let config = BucketConfig {
            cluster_version: Some(ClusterVersion::new(4, 5, 0)),
            include_metadata: true,
            ..Default::default()
        };
        let context = BucketContext::builder(Recording::default()).config(config).build().await.unwrap();

        assert_eq!(context.executor().context().cluster_version, ClusterVersion::new(4, 5, 0));
        assert!(context.executor().context().include_metadata);
        assert_eq!(context.bucket_name(), "beer-sample");
    }

    #[rstest]
    #[tokio::test]
    async fn test_get_reads_document() {
        let context = context(Recording { rows: vec![json!({ "id": "b1", "name": "Heady" })], ..Default::default() }).await;

        let beer: Option<Beer> = context.get("b1").await.unwrap();

        assert_eq!(beer.map(|b| b.name).as_deref(), Some("Heady"));
    }
}
