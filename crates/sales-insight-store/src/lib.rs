//! Sales Insight data store
//!
//! The data-store collaborator behind the insight pipeline:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        SALES STORE                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  arguments (JSON) ──► query::{FindMany,Aggregate,GroupBy}Args    │
//! │                                   │                              │
//! │  AccessContext ──► scope_filter ──┤                              │
//! │                                   ▼                              │
//! │                       ┌──────────────────────┐                   │
//! │                       │  SalesStore          │                   │
//! │                       │  (InMemoryStore)     │                   │
//! │                       └──────────┬───────────┘                   │
//! │                                  │                               │
//! │             Product · Order · OrderItem · OrderItemDetail (view) │
//! │                                  │                               │
//! │                       JSON snapshot (persistence)                │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every read takes the caller's scope filter as a separate argument and
//! intersects it with the query's own `where`. Nothing in the query
//! arguments can widen the scope.

pub mod access;
pub mod memory;
pub mod persistence;
pub mod query;
pub mod schema;


pub use access::{AccessContext, SubjectDirectory, SubjectLookupError};
pub use memory::{InMemoryStore, NewOrderItem, Order, OrderItem, Product, User};
pub use persistence::{demo_snapshot, StoreConfig, StoreSnapshot};
pub use query::{AggregateArgs, ArgumentError, Filter, FindManyArgs, GroupByArgs};
pub use schema::{Entity, FieldType};

/// One result row: field name → scalar or nested aggregate object.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("unknown field `{field}` on {entity}")]
    UnknownField { entity: Entity, field: String },

    #[error("field `{field}` expects {expected}: {detail}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        detail: String,
    },

    #[error("{entity} `{id}` does not exist")]
    UnknownReference { entity: Entity, id: String },

    #[error("{entity} `{id}` already exists")]
    DuplicateId { entity: Entity, id: String },

    #[error("user `{id}` already exists")]
    DuplicateUser { id: String },

    #[error("{0} is a reporting view and cannot be written")]
    ViewNotWritable(Entity),

    #[error("orderBy field `{field}` is not part of `by`")]
    NotGrouped { field: String },

    #[error("invalid {entity} record: {detail}")]
    InvalidRecord { entity: Entity, detail: String },
}

/// Read interface the executor runs structured queries against.
///
/// Implementations must evaluate `scope AND args.filter`; the scope is
/// passed separately so the store, not the query, owns that conjunction.
pub trait SalesStore: Send + Sync {
    fn find_many(
        &self,
        entity: Entity,
        scope: &Filter,
        args: &FindManyArgs,
    ) -> Result<Vec<Record>, StoreError>;

    fn aggregate(
        &self,
        entity: Entity,
        scope: &Filter,
        args: &AggregateArgs,
    ) -> Result<Record, StoreError>;

    fn group_by(
        &self,
        entity: Entity,
        scope: &Filter,
        args: &GroupByArgs,
    ) -> Result<Vec<Record>, StoreError>;
}
