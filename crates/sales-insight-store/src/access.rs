//! Caller identity and row-level access scoping.
//!
//! Every query runs under an [`AccessContext`]. The scope filter built here is
//! AND-ed with whatever filter the model produced, so a caller can only see
//! rows belonging to their own region regardless of what the query asks for.

use serde::{Deserialize, Serialize};

use crate::query::Filter;
use crate::schema::Entity;

/// The authenticated caller, resolved from a subject id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub subject_id: String,
    pub region: String,
}

impl AccessContext {
    pub fn new(subject_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            region: region.into(),
        }
    }

    /// Restriction that must hold for every row of `entity` this caller sees.
    ///
    /// Products are a shared catalog and carry no region. Order items have no
    /// region of their own and are scoped through their parent order.
    pub fn scope_filter(&self, entity: Entity) -> Filter {
        match entity {
            Entity::Product => Filter::All,
            Entity::Order | Entity::OrderItemDetail => {
                Filter::field_equals("region", self.region.clone())
            }
            Entity::OrderItem => Filter::Related {
                foreign_key: "orderId".to_string(),
                target: Entity::Order,
                filter: Box::new(Filter::field_equals("region", self.region.clone())),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubjectLookupError {
    #[error("unknown subject: {subject_id}")]
    UnknownSubject { subject_id: String },
}

/// Resolves a subject id into an access context.
pub trait SubjectDirectory: Send + Sync {
    fn lookup_subject(&self, subject_id: &str) -> Result<AccessContext, SubjectLookupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn products_are_unscoped() {
        let ctx = AccessContext::new("u1", "Washington");
        assert_eq!(ctx.scope_filter(Entity::Product), Filter::All);
    }

    #[test]
    fn order_items_are_scoped_through_their_order() {
        let ctx = AccessContext::new("u1", "Washington");
        match ctx.scope_filter(Entity::OrderItem) {
            Filter::Related {
                foreign_key,
                target,
                filter,
            } => {
                assert_eq!(foreign_key, "orderId");
                assert_eq!(target, Entity::Order);
                assert_eq!(*filter, Filter::field_equals("region", "Washington"));
            }
            other => panic!("unexpected scope {other:?}"),
        }
    }
}
