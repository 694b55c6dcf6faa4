//! Execution of query models against a bucket backend.
//!
//! [`QueryExecutor`] generates the statement for a model, sends it to the backend and
//! materializes the rows according to the plan's [`ResultShape`].

use serde::de::DeserializeOwned;
use serde_json::{Value, from_value};
use tracing::debug;

use crate::{
    backend::{BucketBackend, QueryRequest},
    context::QueryGenerationContext,
    error::{N1qlError, N1qlResult},
    generate::{QueryPlan, ResultShape, generate_query},
    query::QueryModel,
};

const TARGET: &str = "n1ql_linq::query";

#[derive(Debug)]
pub struct QueryExecutor<B: BucketBackend> {
    backend: B,
    context: QueryGenerationContext,
}

impl<B: BucketBackend> QueryExecutor<B> {
    pub fn new(backend: B, context: QueryGenerationContext) -> Self {
        Self { backend, context }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn context(&self) -> &QueryGenerationContext {
        &self.context
    }

    /// Generates the plan for `model` without executing it.
    pub fn plan(&self, model: &QueryModel) -> N1qlResult<QueryPlan> {
        generate_query(model, &self.context)
    }

    async fn fetch(&self, plan: &QueryPlan) -> N1qlResult<Vec<Value>> {
        let request = QueryRequest::new(plan.statement.clone())
            .with_scan_consistency(plan.scan_consistency);
        let rows = self.backend.query(request).await?;

        debug!(target: TARGET, rows = rows.len(), "query returned");
        Ok(rows)
    }

    /// Executes `model` and deserializes every row.
    pub async fn execute_collection<T: DeserializeOwned>(&self, model: &QueryModel) -> N1qlResult<Vec<T>> {
        let plan = self.plan(model)?;
        let rows = self.fetch(&plan).await?;

        rows.into_iter()
            .map(|row| from_value(row).map_err(N1qlError::from))
            .collect()
    }

    /// Executes a model ending in an aggregate or quantifier.
    ///
    /// An empty result, or a `null` aggregate over no rows, yields the operator's
    /// default: `0` for counts and sums, `false` for `Any`, `true` for `All`.
    pub async fn execute_scalar<T: DeserializeOwned>(&self, model: &QueryModel) -> N1qlResult<T> {
        let plan = self.plan(model)?;
        let ResultShape::Scalar { default } = &plan.shape else {
            return Err(N1qlError::InvalidShape(format!(
                "query does not produce a scalar: {}",
                plan.statement
            )));
        };

        let value = match self.fetch(&plan).await?.into_iter().next() {
            Some(Value::Null) | None => default.clone(),
            Some(value) => value,
        };
        Ok(from_value(value)?)
    }

    /// Executes a model ending in `First`/`Single` and returns its element.
    ///
    /// With `return_default_if_empty`, an empty result yields `None`; otherwise it fails
    /// with [`N1qlError::NotFound`]. `Single` variants fail with
    /// [`N1qlError::MultipleElements`] when more than one row matches.
    pub async fn execute_single<T: DeserializeOwned>(
        &self,
        model: &QueryModel,
        return_default_if_empty: bool,
    ) -> N1qlResult<Option<T>> {
        let plan = self.plan(model)?;
        let single = matches!(plan.shape, ResultShape::Element { single: true, .. });
        let mut rows = self.fetch(&plan).await?.into_iter();

        let Some(first) = rows.next() else {
            return if return_default_if_empty {
                Ok(None)
            } else {
                Err(N1qlError::NotFound(plan.statement))
            };
        };
        if single && rows.next().is_some() {
            return Err(N1qlError::MultipleElements(plan.statement));
        }

        Ok(Some(from_value(first)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::MutationResult, context::ClusterVersion, queryable::Queryable, types::TypeRef,
    };
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FixedRows {
        rows: Vec<Value>,
        statements: Mutex<Vec<String>>,
    }

    impl FixedRows {
        fn new(rows: Vec<Value>) -> Self {
            Self { rows, statements: Mutex::default() }
        }
    }

    #[async_trait]
    impl BucketBackend for FixedRows {
        fn bucket_name(&self) -> &str {
            "beer-sample"
        }

        async fn cluster_version(&self) -> N1qlResult<ClusterVersion> {
            Ok(ClusterVersion::default())
        }

        async fn query(&self, request: QueryRequest) -> N1qlResult<Vec<Value>> {
            self.statements.lock().unwrap().push(request.statement);
            Ok(self.rows.clone())
        }

        async fn upsert(&self, _: &str, _: Value) -> N1qlResult<MutationResult> {
            Ok(MutationResult::success(1))
        }

        async fn remove(&self, _: &str) -> N1qlResult<MutationResult> {
            Ok(MutationResult::success(1))
        }

        async fn get(&self, _: &str) -> N1qlResult<Option<Value>> {
            Ok(None)
        }
    }

    fn executor(rows: Vec<Value>) -> QueryExecutor<FixedRows> {
        QueryExecutor::new(FixedRows::new(rows), QueryGenerationContext::default())
    }

    fn names() -> Queryable {
        Queryable::from_bucket("beer-sample", TypeRef::Dynamic).select(|b| b.field("name"))
    }

    #[rstest]
    #[tokio::test]
    async fn test_execute_collection() {
        let executor = executor(vec![json!("Pliny"), json!("Heady")]);

        let names: Vec<String> = executor.execute_collection(&names().build()).await.unwrap();

        assert_eq!(names, vec!["Pliny", "Heady"]);
        assert_eq!(
            executor.backend().statements.lock().unwrap().as_slice(),
            ["SELECT RAW `Extent1`.`name` FROM `beer-sample` as `Extent1`"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_quantifiers_over_empty_source() {
        let executor = executor(Vec::new());

        let any: bool = executor.execute_scalar(&names().any()).await.unwrap();
        let all: bool = executor.execute_scalar(&names().all(|name| name.eq("x"))).await.unwrap();
        let count: i64 = executor.execute_scalar(&names().count()).await.unwrap();

        assert!(!any);
        assert!(all);
        assert_eq!(count, 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_null_aggregate_uses_default() {
        let executor = executor(vec![Value::Null]);

        let sum: f64 = executor
            .execute_scalar(&Queryable::from_bucket("beer-sample", TypeRef::Dynamic).sum(|b| b.field("abv")))
            .await
            .unwrap();
        let average: Option<f64> = executor
            .execute_scalar(&Queryable::from_bucket("beer-sample", TypeRef::Dynamic).average(|b| b.field("abv")))
            .await
            .unwrap();

        assert_eq!(sum, 0.0);
        assert_eq!(average, None);
    }

    #[rstest]
    #[tokio::test]
    async fn test_scalar_of_collection_query_is_invalid() {
        let result = executor(Vec::new()).execute_scalar::<bool>(&names().build()).await;

        assert!(matches!(result, Err(N1qlError::InvalidShape(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn test_single_element_semantics() {
        let empty = executor(Vec::new());
        let two = executor(vec![json!("Pliny"), json!("Heady")]);

        assert_eq!(empty.execute_single::<String>(&names().first_or_default(), true).await.unwrap(), None);
        assert!(matches!(
            empty.execute_single::<String>(&names().first(), false).await,
            Err(N1qlError::NotFound(_))
        ));
        assert!(matches!(
            two.execute_single::<String>(&names().single(), false).await,
            Err(N1qlError::MultipleElements(_))
        ));
        assert_eq!(
            two.execute_single::<String>(&names().first(), false).await.unwrap().as_deref(),
            Some("Pliny")
        );
    }
}
