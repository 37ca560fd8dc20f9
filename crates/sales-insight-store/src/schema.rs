//! Queryable entity catalog.
//!
//! This is the live schema the executor and store validate against. The
//! prompt-side description of the same schema lives in
//! `sales_insight_llm::prompts` and is checked against this catalog by tests.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Int,
    Float,
    DateTime,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Int | FieldType::Float)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::DateTime => "DateTime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> FieldDef {
    FieldDef { name, ty }
}

const PRODUCT_FIELDS: &[FieldDef] = &[
    field("id", FieldType::String),
    field("name", FieldType::String),
    field("category", FieldType::String),
    field("price", FieldType::Float),
];

const ORDER_FIELDS: &[FieldDef] = &[
    field("id", FieldType::String),
    field("createdAt", FieldType::DateTime),
    field("updatedAt", FieldType::DateTime),
    field("region", FieldType::String),
];

const ORDER_ITEM_FIELDS: &[FieldDef] = &[
    field("id", FieldType::String),
    field("quantity", FieldType::Int),
    field("productId", FieldType::String),
    field("orderId", FieldType::String),
];

const ORDER_ITEM_DETAIL_FIELDS: &[FieldDef] = &[
    field("id", FieldType::String),
    field("createdAt", FieldType::DateTime),
    field("updatedAt", FieldType::DateTime),
    field("product", FieldType::String),
    field("category", FieldType::String),
    field("region", FieldType::String),
    field("unitPrice", FieldType::Float),
    field("quantity", FieldType::Int),
    field("subtotal", FieldType::Float),
];

/// Entities (and the reporting view) a structured query may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Entity {
    Product,
    Order,
    OrderItem,
    /// Denormalized order items joined with their order and product.
    OrderItemDetail,
}

impl Entity {
    pub const ALL: [Entity; 4] = [
        Entity::Product,
        Entity::Order,
        Entity::OrderItem,
        Entity::OrderItemDetail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Entity::Product => "Product",
            Entity::Order => "Order",
            Entity::OrderItem => "OrderItem",
            Entity::OrderItemDetail => "OrderItemDetail",
        }
    }

    /// Exact, case-sensitive lookup by schema name.
    pub fn from_name(name: &str) -> Option<Entity> {
        Entity::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Reporting views are read-only projections over the base tables.
    pub fn is_view(self) -> bool {
        matches!(self, Entity::OrderItemDetail)
    }

    pub fn fields(self) -> &'static [FieldDef] {
        match self {
            Entity::Product => PRODUCT_FIELDS,
            Entity::Order => ORDER_FIELDS,
            Entity::OrderItem => ORDER_ITEM_FIELDS,
            Entity::OrderItemDetail => ORDER_ITEM_DETAIL_FIELDS,
        }
    }

    pub fn field(self, name: &str) -> Option<&'static FieldDef> {
        self.fields().iter().find(|f| f.name == name)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
