//! Query execution under the caller's access scope.

use std::sync::Arc;

use sales_insight_store::query::{AggregateArgs, FindManyArgs, GroupByArgs};
use sales_insight_store::{AccessContext, Entity, SalesStore, StoreError};

use crate::query::{Operation, StructuredQuery};
use crate::ResultSet;

/// Execution failure.
///
/// `Display` stays generic so the message is safe to show to a caller; use
/// [`ExecutionError::detail`] for logs.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("the query could not be run")]
    InvalidQuery { detail: String },

    #[error("the data store rejected the query")]
    StoreRejected(#[source] StoreError),
}

impl ExecutionError {
    fn invalid(detail: impl Into<String>) -> Self {
        ExecutionError::InvalidQuery {
            detail: detail.into(),
        }
    }

    pub fn detail(&self) -> String {
        match self {
            ExecutionError::InvalidQuery { detail } => detail.clone(),
            ExecutionError::StoreRejected(e) => e.to_string(),
        }
    }
}

pub struct QueryExecutor {
    store: Arc<dyn SalesStore>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn SalesStore>) -> Self {
        Self { store }
    }

    /// Run `query` against the store, restricted to what `ctx` may see.
    ///
    /// Entity, operation and argument shape are all resolved before the
    /// store is called, so an invalid query never reaches it.
    pub fn execute(
        &self,
        query: &StructuredQuery,
        ctx: &AccessContext,
    ) -> Result<ResultSet, ExecutionError> {
        let entity = Entity::from_name(&query.target_entity).ok_or_else(|| {
            ExecutionError::invalid(format!("unknown entity `{}`", query.target_entity))
        })?;
        let operation = Operation::parse(&query.operation).ok_or_else(|| {
            ExecutionError::invalid(format!("unsupported operation `{}`", query.operation))
        })?;
        let scope = ctx.scope_filter(entity);
        let args = &query.arguments;

        let rows = match operation {
            Operation::List => {
                let args = FindManyArgs::from_json(args).map_err(|e| ExecutionError::invalid(e.to_string()))?;
                self.store.find_many(entity, &scope, &args)
            }
            Operation::Aggregate => {
                let args = AggregateArgs::from_json(args).map_err(|e| ExecutionError::invalid(e.to_string()))?;
                self.store.aggregate(entity, &scope, &args).map(|record| vec![record])
            }
            Operation::GroupBy => {
                let args = GroupByArgs::from_json(args).map_err(|e| ExecutionError::invalid(e.to_string()))?;
                self.store.group_by(entity, &scope, &args)
            }
        }
        .map_err(ExecutionError::StoreRejected)?;

        tracing::info!(
            subject = %ctx.subject_id,
            entity = %entity,
            operation = operation.as_str(),
            rows = rows.len(),
            "executed query"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sales_insight_store::{InMemoryStore, NewOrderItem};
    use serde_json::json;

    fn setup() -> (QueryExecutor, AccessContext) {
        let store = InMemoryStore::new();
        let user = store.add_user("ann@test.com", None, "Oregon");
        let lamp = store.add_product("Lamp", "Furniture", 25.0).unwrap();
        store
            .place_order("Oregon", &[NewOrderItem::new(lamp.id.clone(), 4)])
            .unwrap();
        store
            .place_order("Texas", &[NewOrderItem::new(lamp.id, 1)])
            .unwrap();
        let ctx = AccessContext::new(user.id, "Oregon");
        (QueryExecutor::new(Arc::new(store)), ctx)
    }

    #[test]
    fn dispatches_each_operation() {
        let (executor, ctx) = setup();

        let list = executor
            .execute(&StructuredQuery::new("Order", "findMany", json!({})), &ctx)
            .unwrap();
        assert_eq!(list.len(), 1);

        let agg = executor
            .execute(
                &StructuredQuery::new("OrderItemDetail", "aggregate", json!({ "_sum": { "quantity": true } })),
                &ctx,
            )
            .unwrap();
        assert_eq!(agg.len(), 1);
        assert_eq!(agg[0]["_sum"]["quantity"], json!(4));

        let groups = executor
            .execute(
                &StructuredQuery::new("OrderItemDetail", "groupBy", json!({ "by": "region", "_count": true })),
                &ctx,
            )
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["region"], json!("Oregon"));
    }

    #[test]
    fn rejects_unknown_entity_and_verb() {
        let (executor, ctx) = setup();
        for query in [
            StructuredQuery::new("Invoice", "findMany", json!({})),
            StructuredQuery::new("Order", "deleteMany", json!({})),
            StructuredQuery::new("Order", "findMany", json!([1, 2])),
            StructuredQuery::new("OrderItemDetail", "groupBy", json!({})),
        ] {
            let err = executor.execute(&query, &ctx).unwrap_err();
            assert!(matches!(err, ExecutionError::InvalidQuery { .. }), "{query:?}");
        }
    }

    #[test]
    fn store_rejections_are_opaque() {
        let (executor, ctx) = setup();
        let err = executor
            .execute(
                &StructuredQuery::new("Order", "aggregate", json!({ "_sum": { "region": true } })),
                &ctx,
            )
            .unwrap_err();
        assert!(matches!(err, ExecutionError::StoreRejected(StoreError::TypeMismatch { .. })));
        assert_eq!(err.to_string(), "the data store rejected the query");
        assert!(err.detail().contains("region"));
    }

    #[test]
    fn where_cannot_widen_scope() {
        let (executor, ctx) = setup();
        let rows = executor
            .execute(
                &StructuredQuery::new(
                    "OrderItemDetail",
                    "findMany",
                    json!({ "where": { "OR": [{ "region": "Texas" }, { "region": "Oregon" }] } }),
                ),
                &ctx,
            )
            .unwrap();
        assert!(rows.iter().all(|r| r["region"] == json!("Oregon")));
        assert_eq!(rows.len(), 1);
    }
}
