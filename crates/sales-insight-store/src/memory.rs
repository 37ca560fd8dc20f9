//! In-memory sales store.
//!
//! Typed tables behind a single `parking_lot::RwLock`. Reads materialize
//! rows as [`Record`]s (the `OrderItemDetail` view is joined on the fly),
//! filter them with the scope and query filter, then sort, page and
//! aggregate. Results are deterministic: lists keep insertion order and
//! groups are sorted by their key unless `orderBy` says otherwise.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use uuid::Uuid;

use crate::access::{AccessContext, SubjectDirectory, SubjectLookupError};
use crate::query::{
    json_kind, AggregateArgs, AggregateFn, AggregateSelection, Comparison, CountSelection, Filter,
    FindManyArgs, GroupByArgs, OrderBy, OrderKey, SortDirection,
};
use crate::schema::{Entity, FieldDef, FieldType};
use crate::{Record, SalesStore, StoreError};

// ============================================================================
// Rows
// ============================================================================

/// Identity table entry. Not queryable; only used to resolve access scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: String,
    pub quantity: i64,
    pub product_id: String,
    pub order_id: String,
}

/// Line of a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub product_id: String,
    pub quantity: i64,
}

impl NewOrderItem {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

fn record<const N: usize>(pairs: [(&str, Value); N]) -> Record {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn timestamp(dt: &DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn float(x: f64) -> Value {
    Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

impl Product {
    fn to_record(&self) -> Record {
        record([
            ("id", json!(self.id)),
            ("name", json!(self.name)),
            ("category", json!(self.category)),
            ("price", float(self.price)),
        ])
    }
}

impl Order {
    fn to_record(&self) -> Record {
        record([
            ("id", json!(self.id)),
            ("createdAt", timestamp(&self.created_at)),
            ("updatedAt", timestamp(&self.updated_at)),
            ("region", json!(self.region)),
        ])
    }
}

impl OrderItem {
    fn to_record(&self) -> Record {
        record([
            ("id", json!(self.id)),
            ("quantity", json!(self.quantity)),
            ("productId", json!(self.product_id)),
            ("orderId", json!(self.order_id)),
        ])
    }
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) users: Vec<User>,
    pub(crate) products: Vec<Product>,
    pub(crate) orders: Vec<Order>,
    pub(crate) order_items: Vec<OrderItem>,
}

impl Tables {
    pub(crate) fn insert_user(&mut self, user: User) -> Result<(), StoreError> {
        if self.users.iter().any(|u| u.id == user.id) {
            return Err(StoreError::DuplicateUser { id: user.id });
        }
        self.users.push(user);
        Ok(())
    }

    pub(crate) fn insert_product(&mut self, product: Product) -> Result<(), StoreError> {
        if self.products.iter().any(|p| p.id == product.id) {
            return Err(StoreError::DuplicateId {
                entity: Entity::Product,
                id: product.id,
            });
        }
        if !product.price.is_finite() {
            return Err(StoreError::InvalidRecord {
                entity: Entity::Product,
                detail: format!("price of `{}` is not a finite number", product.id),
            });
        }
        self.products.push(product);
        Ok(())
    }

    pub(crate) fn insert_order(&mut self, order: Order) -> Result<(), StoreError> {
        if self.orders.iter().any(|o| o.id == order.id) {
            return Err(StoreError::DuplicateId {
                entity: Entity::Order,
                id: order.id,
            });
        }
        self.orders.push(order);
        Ok(())
    }

    pub(crate) fn insert_order_item(&mut self, item: OrderItem) -> Result<(), StoreError> {
        if self.order_items.iter().any(|i| i.id == item.id) {
            return Err(StoreError::DuplicateId {
                entity: Entity::OrderItem,
                id: item.id,
            });
        }
        if item.quantity < 1 {
            return Err(StoreError::InvalidRecord {
                entity: Entity::OrderItem,
                detail: format!("quantity must be positive, got {}", item.quantity),
            });
        }
        if !self.products.iter().any(|p| p.id == item.product_id) {
            return Err(StoreError::UnknownReference {
                entity: Entity::Product,
                id: item.product_id,
            });
        }
        if !self.orders.iter().any(|o| o.id == item.order_id) {
            return Err(StoreError::UnknownReference {
                entity: Entity::Order,
                id: item.order_id,
            });
        }
        self.order_items.push(item);
        Ok(())
    }

    fn detail_record(&self, item: &OrderItem) -> Option<Record> {
        let order = self.orders.iter().find(|o| o.id == item.order_id)?;
        let product = self.products.iter().find(|p| p.id == item.product_id)?;
        Some(record([
            ("id", json!(item.id)),
            ("createdAt", timestamp(&order.created_at)),
            ("updatedAt", timestamp(&order.updated_at)),
            ("product", json!(product.name)),
            ("category", json!(product.category)),
            ("region", json!(order.region)),
            ("unitPrice", float(product.price)),
            ("quantity", json!(item.quantity)),
            ("subtotal", float(product.price * item.quantity as f64)),
        ]))
    }

    fn rows(&self, entity: Entity) -> Vec<Record> {
        match entity {
            Entity::Product => self.products.iter().map(Product::to_record).collect(),
            Entity::Order => self.orders.iter().map(Order::to_record).collect(),
            Entity::OrderItem => self.order_items.iter().map(OrderItem::to_record).collect(),
            Entity::OrderItemDetail => self
                .order_items
                .iter()
                .filter_map(|item| self.detail_record(item))
                .collect(),
        }
    }

    fn row_by_id(&self, entity: Entity, id: &str) -> Option<Record> {
        match entity {
            Entity::Product => self.products.iter().find(|p| p.id == id).map(Product::to_record),
            Entity::Order => self.orders.iter().find(|o| o.id == id).map(Order::to_record),
            Entity::OrderItem => self
                .order_items
                .iter()
                .find(|i| i.id == id)
                .map(OrderItem::to_record),
            Entity::OrderItemDetail => self
                .order_items
                .iter()
                .find(|i| i.id == id)
                .and_then(|item| self.detail_record(item)),
        }
    }

    fn matches(&self, entity: Entity, row: &Record, filter: &Filter) -> bool {
        match filter {
            Filter::All => true,
            Filter::And(parts) => parts.iter().all(|f| self.matches(entity, row, f)),
            Filter::Or(parts) => parts.iter().any(|f| self.matches(entity, row, f)),
            Filter::Not(inner) => !self.matches(entity, row, inner),
            Filter::Field { field, op, value } => {
                let ty = field_type(entity, field);
                let actual = row.get(field).unwrap_or(&Value::Null);
                apply_comparison(ty, actual, *op, value)
            }
            Filter::Related {
                foreign_key,
                target,
                filter,
            } => row
                .get(foreign_key)
                .and_then(Value::as_str)
                .and_then(|id| self.row_by_id(*target, id))
                .is_some_and(|related| self.matches(*target, &related, filter)),
        }
    }

    fn select(&self, entity: Entity, filter: &Filter) -> Vec<Record> {
        self.rows(entity)
            .into_iter()
            .filter(|row| self.matches(entity, row, filter))
            .collect()
    }
}

// ============================================================================
// Value semantics
// ============================================================================

fn field_type(entity: Entity, field: &str) -> FieldType {
    entity.field(field).map(|d| d.ty).unwrap_or(FieldType::String)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn compare_values(ty: FieldType, a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) if ty == FieldType::DateTime => {
            match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(ty: FieldType, a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        _ => compare_values(ty, a, b) == Some(Ordering::Equal),
    }
}

/// Total order for sorting: nulls after every value in ascending order.
fn sort_cmp(ty: FieldType, a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(ty, a, b).unwrap_or(Ordering::Equal),
    }
}

fn apply_comparison(ty: FieldType, actual: &Value, op: Comparison, operand: &Value) -> bool {
    let text = |f: fn(&str, &str) -> bool| match (actual.as_str(), operand.as_str()) {
        (Some(a), Some(b)) => f(a, b),
        _ => false,
    };
    let ordered = |accept: fn(Ordering) -> bool| {
        compare_values(ty, actual, operand).is_some_and(accept)
    };
    match op {
        Comparison::Equals => values_equal(ty, actual, operand),
        Comparison::NotEquals => !values_equal(ty, actual, operand),
        Comparison::In => operand
            .as_array()
            .is_some_and(|xs| xs.iter().any(|x| values_equal(ty, actual, x))),
        Comparison::NotIn => operand
            .as_array()
            .is_some_and(|xs| !xs.iter().any(|x| values_equal(ty, actual, x))),
        Comparison::Lt => ordered(|o| o == Ordering::Less),
        Comparison::Lte => ordered(|o| o != Ordering::Greater),
        Comparison::Gt => ordered(|o| o == Ordering::Greater),
        Comparison::Gte => ordered(|o| o != Ordering::Less),
        Comparison::Contains => text(|a, b| a.contains(b)),
        Comparison::StartsWith => text(|a, b| a.starts_with(b)),
        Comparison::EndsWith => text(|a, b| a.ends_with(b)),
    }
}

// ============================================================================
// Validation against the schema
// ============================================================================

fn field_def(entity: Entity, field: &str) -> Result<&'static FieldDef, StoreError> {
    entity.field(field).ok_or_else(|| StoreError::UnknownField {
        entity,
        field: field.to_string(),
    })
}

fn numeric_field(entity: Entity, field: &str, func: AggregateFn) -> Result<(), StoreError> {
    let def = field_def(entity, field)?;
    if matches!(func, AggregateFn::Sum | AggregateFn::Avg) && !def.ty.is_numeric() {
        return Err(StoreError::TypeMismatch {
            field: field.to_string(),
            expected: "a numeric field",
            detail: format!("cannot apply {} to a {} field", func.key(), def.ty.name()),
        });
    }
    Ok(())
}

/// `having` compares every aggregate against a number, so `_min`/`_max` of a
/// non-numeric field can never match.
fn having_field(entity: Entity, field: &str, func: AggregateFn) -> Result<(), StoreError> {
    numeric_field(entity, field, func)?;
    let def = field_def(entity, field)?;
    if matches!(func, AggregateFn::Min | AggregateFn::Max) && !def.ty.is_numeric() {
        return Err(StoreError::TypeMismatch {
            field: field.to_string(),
            expected: "a numeric field",
            detail: format!("cannot filter groups on {} of a {} field", func.key(), def.ty.name()),
        });
    }
    Ok(())
}

fn check_scalar(def: &FieldDef, value: &Value) -> Result<(), StoreError> {
    let ok = match (def.ty, value) {
        (_, Value::Null) => true,
        (FieldType::Int | FieldType::Float, Value::Number(_)) => true,
        (FieldType::String, Value::String(_)) => true,
        (FieldType::DateTime, Value::String(s)) => parse_timestamp(s).is_some(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::TypeMismatch {
            field: def.name.to_string(),
            expected: def.ty.name(),
            detail: match value {
                Value::String(s) => format!("got string {s:?}"),
                other => format!("got {}", json_kind(other)),
            },
        })
    }
}

fn check_filter(entity: Entity, filter: &Filter) -> Result<(), StoreError> {
    match filter {
        Filter::All => Ok(()),
        Filter::And(parts) | Filter::Or(parts) => {
            parts.iter().try_for_each(|f| check_filter(entity, f))
        }
        Filter::Not(inner) => check_filter(entity, inner),
        Filter::Field { field, op, value } => {
            let def = field_def(entity, field)?;
            match op {
                Comparison::Contains | Comparison::StartsWith | Comparison::EndsWith => {
                    if def.ty != FieldType::String {
                        return Err(StoreError::TypeMismatch {
                            field: field.clone(),
                            expected: "String",
                            detail: format!("`{}` is not supported on {} fields", op.key(), def.ty.name()),
                        });
                    }
                    Ok(())
                }
                Comparison::In | Comparison::NotIn => value
                    .as_array()
                    .map(|xs| xs.iter().try_for_each(|x| check_scalar(def, x)))
                    .unwrap_or(Ok(())),
                _ => check_scalar(def, value),
            }
        }
        Filter::Related {
            foreign_key,
            target,
            filter,
        } => {
            field_def(entity, foreign_key)?;
            check_filter(*target, filter)
        }
    }
}

fn check_aggregates(entity: Entity, selection: &AggregateSelection) -> Result<(), StoreError> {
    if let Some(CountSelection::Fields { fields, .. }) = &selection.count {
        for field in fields {
            field_def(entity, field)?;
        }
    }
    for func in [AggregateFn::Sum, AggregateFn::Avg, AggregateFn::Min, AggregateFn::Max] {
        for field in selection.fields_for(func) {
            numeric_field(entity, field, func)?;
        }
    }
    Ok(())
}

/// Field sort keys for list/aggregate; aggregate keys only make sense per group.
fn field_order<'a>(
    entity: Entity,
    order_by: &'a [OrderBy],
) -> Result<Vec<(&'a str, FieldType, SortDirection)>, StoreError> {
    order_by
        .iter()
        .map(|o| match &o.key {
            OrderKey::Field(field) => {
                let def = field_def(entity, field)?;
                Ok((field.as_str(), def.ty, o.direction))
            }
            OrderKey::Aggregate { func, .. } => Err(StoreError::NotGrouped {
                field: func.key().to_string(),
            }),
        })
        .collect()
}

fn directed(direction: SortDirection, ord: Ordering) -> Ordering {
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

fn sort_rows(rows: &mut [Record], keys: &[(&str, FieldType, SortDirection)]) {
    if keys.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        keys.iter()
            .map(|(field, ty, dir)| {
                let av = a.get(*field).unwrap_or(&Value::Null);
                let bv = b.get(*field).unwrap_or(&Value::Null);
                directed(*dir, sort_cmp(*ty, av, bv))
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

fn page<T>(items: Vec<T>, skip: usize, take: Option<usize>) -> Vec<T> {
    items
        .into_iter()
        .skip(skip)
        .take(take.unwrap_or(usize::MAX))
        .collect()
}

// ============================================================================
// Aggregation
// ============================================================================

fn compute(entity: Entity, rows: &[Record], func: AggregateFn, field: &str) -> Value {
    let ty = field_type(entity, field);
    let values = rows
        .iter()
        .filter_map(|r| r.get(field))
        .filter(|v| !v.is_null());

    match func {
        AggregateFn::Count => json!(values.count()),
        AggregateFn::Sum if ty == FieldType::Int => {
            let nums: Vec<i64> = values.filter_map(Value::as_i64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                json!(nums.iter().fold(0i64, |acc, n| acc.saturating_add(*n)))
            }
        }
        AggregateFn::Sum => {
            let nums: Vec<f64> = values.filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                float(nums.iter().sum())
            }
        }
        AggregateFn::Avg => {
            let nums: Vec<f64> = values.filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggregateFn::Min => values
            .min_by(|a, b| sort_cmp(ty, a, b))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateFn::Max => values
            .max_by(|a, b| sort_cmp(ty, a, b))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

fn aggregate_rows(entity: Entity, rows: &[Record], selection: &AggregateSelection) -> Record {
    let mut out = Record::new();
    match &selection.count {
        Some(CountSelection::Rows) => {
            out.insert("_count".to_string(), json!(rows.len()));
        }
        Some(CountSelection::Fields { all, fields }) => {
            let mut counts = Map::new();
            if *all {
                counts.insert("_all".to_string(), json!(rows.len()));
            }
            for field in fields {
                counts.insert(field.clone(), compute(entity, rows, AggregateFn::Count, field));
            }
            out.insert("_count".to_string(), Value::Object(counts));
        }
        None => {}
    }
    for func in [AggregateFn::Sum, AggregateFn::Avg, AggregateFn::Min, AggregateFn::Max] {
        let fields = selection.fields_for(func);
        if fields.is_empty() {
            continue;
        }
        let values: Map<String, Value> = fields
            .iter()
            .map(|f| (f.clone(), compute(entity, rows, func, f)))
            .collect();
        out.insert(func.key().to_string(), Value::Object(values));
    }
    out
}

// ============================================================================
// Store
// ============================================================================

/// Process-local [`SalesStore`] over typed tables.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    pub(crate) tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, email: &str, name: Option<&str>, region: &str) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.map(str::to_string),
            region: region.to_string(),
        };
        self.tables.write().users.push(user.clone());
        user
    }

    pub fn add_product(&self, name: &str, category: &str, price: f64) -> Result<Product, StoreError> {
        let product = Product {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            category: category.to_string(),
            price,
        };
        self.tables.write().insert_product(product.clone())?;
        Ok(product)
    }

    /// Create an order and its items atomically. Every product must exist.
    pub fn place_order(&self, region: &str, items: &[NewOrderItem]) -> Result<Order, StoreError> {
        let mut tables = self.tables.write();
        // Validate every line before touching the tables.
        for item in items {
            if !tables.products.iter().any(|p| p.id == item.product_id) {
                return Err(StoreError::UnknownReference {
                    entity: Entity::Product,
                    id: item.product_id.clone(),
                });
            }
            if item.quantity < 1 {
                return Err(StoreError::InvalidRecord {
                    entity: Entity::OrderItem,
                    detail: format!("quantity must be positive, got {}", item.quantity),
                });
            }
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            region: region.to_string(),
        };
        tables.insert_order(order.clone())?;
        for item in items {
            tables.insert_order_item(OrderItem {
                id: Uuid::new_v4().to_string(),
                quantity: item.quantity,
                product_id: item.product_id.clone(),
                order_id: order.id.clone(),
            })?;
        }
        tracing::debug!(order = %order.id, region = %order.region, items = items.len(), "order placed");
        Ok(order)
    }

    /// Insert a raw record into a base table. The reporting view is read-only.
    pub fn insert_record(&self, entity: Entity, record: Value) -> Result<(), StoreError> {
        fn decode<T: serde::de::DeserializeOwned>(entity: Entity, record: Value) -> Result<T, StoreError> {
            serde_json::from_value(record).map_err(|e| StoreError::InvalidRecord {
                entity,
                detail: e.to_string(),
            })
        }

        let mut tables = self.tables.write();
        match entity {
            Entity::Product => tables.insert_product(decode(entity, record)?),
            Entity::Order => tables.insert_order(decode(entity, record)?),
            Entity::OrderItem => tables.insert_order_item(decode(entity, record)?),
            Entity::OrderItemDetail => Err(StoreError::ViewNotWritable(entity)),
        }
    }

    pub fn users(&self) -> Vec<User> {
        self.tables.read().users.clone()
    }
}

impl SalesStore for InMemoryStore {
    fn find_many(
        &self,
        entity: Entity,
        scope: &Filter,
        args: &FindManyArgs,
    ) -> Result<Vec<Record>, StoreError> {
        let filter = scope.clone().and(args.filter.clone());
        check_filter(entity, &filter)?;
        let keys = field_order(entity, &args.order_by)?;
        if let Some(select) = &args.select {
            for field in select {
                field_def(entity, field)?;
            }
        }

        let mut rows = self.tables.read().select(entity, &filter);
        sort_rows(&mut rows, &keys);
        let mut rows = page(rows, args.skip, args.take);

        if let Some(select) = &args.select {
            for row in &mut rows {
                row.retain(|k, _| select.iter().any(|s| s == k));
            }
        }
        tracing::debug!(entity = %entity, rows = rows.len(), "find_many");
        Ok(rows)
    }

    fn aggregate(
        &self,
        entity: Entity,
        scope: &Filter,
        args: &AggregateArgs,
    ) -> Result<Record, StoreError> {
        let filter = scope.clone().and(args.filter.clone());
        check_filter(entity, &filter)?;
        check_aggregates(entity, &args.aggregates)?;
        let keys = field_order(entity, &args.order_by)?;

        let mut rows = self.tables.read().select(entity, &filter);
        sort_rows(&mut rows, &keys);
        let rows = page(rows, args.skip, args.take);

        tracing::debug!(entity = %entity, rows = rows.len(), "aggregate");
        Ok(aggregate_rows(entity, &rows, &args.aggregates))
    }

    fn group_by(
        &self,
        entity: Entity,
        scope: &Filter,
        args: &GroupByArgs,
    ) -> Result<Vec<Record>, StoreError> {
        let filter = scope.clone().and(args.filter.clone());
        check_filter(entity, &filter)?;
        let by_types = args
            .by
            .iter()
            .map(|f| field_def(entity, f).map(|d| d.ty))
            .collect::<Result<Vec<_>, _>>()?;
        check_aggregates(entity, &args.aggregates)?;
        for cond in &args.having {
            having_field(entity, &cond.field, cond.func)?;
        }
        for order in &args.order_by {
            match &order.key {
                OrderKey::Field(field) if !args.by.contains(field) => {
                    return Err(StoreError::NotGrouped {
                        field: field.clone(),
                    })
                }
                OrderKey::Aggregate {
                    func,
                    field: Some(field),
                } => numeric_field(entity, field, *func)?,
                _ => {}
            }
        }

        let rows = self.tables.read().select(entity, &filter);

        let mut groups: Vec<(Vec<Value>, Vec<Record>)> = Vec::new();
        for row in rows {
            let key: Vec<Value> = args
                .by
                .iter()
                .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
                .collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }

        let key_cmp = |a: &[Value], b: &[Value]| {
            by_types
                .iter()
                .zip(a.iter().zip(b))
                .map(|(ty, (x, y))| sort_cmp(*ty, x, y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        };
        groups.sort_by(|a, b| key_cmp(a.0.as_slice(), b.0.as_slice()));

        groups.retain(|(_, members)| {
            args.having.iter().all(|cond| {
                let value = compute(entity, members, cond.func, &cond.field);
                apply_comparison(FieldType::Float, &value, cond.op, &cond.value)
            })
        });

        if !args.order_by.is_empty() {
            let sort_values = |key: &[Value], members: &[Record]| -> Vec<(Value, FieldType)> {
                args.order_by
                    .iter()
                    .map(|order| match &order.key {
                        OrderKey::Field(field) => {
                            let idx = args.by.iter().position(|b| b == field).unwrap_or(0);
                            (key[idx].clone(), by_types[idx])
                        }
                        OrderKey::Aggregate { field: None, .. } => {
                            (json!(members.len()), FieldType::Int)
                        }
                        OrderKey::Aggregate {
                            func,
                            field: Some(field),
                        } => (compute(entity, members, *func, field), FieldType::Float),
                    })
                    .collect()
            };
            let mut keyed: Vec<_> = groups
                .into_iter()
                .map(|(key, members)| (sort_values(key.as_slice(), members.as_slice()), key, members))
                .collect();
            keyed.sort_by(|a, b| {
                args.order_by
                    .iter()
                    .zip(a.0.iter().zip(&b.0))
                    .map(|(order, ((x, ty), (y, _)))| directed(order.direction, sort_cmp(*ty, x, y)))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
            groups = keyed.into_iter().map(|(_, key, members)| (key, members)).collect();
        }

        let out: Vec<Record> = page(groups, args.skip, args.take)
            .into_iter()
            .map(|(key, members)| {
                let mut row: Record = args.by.iter().cloned().zip(key).collect();
                row.extend(aggregate_rows(entity, &members, &args.aggregates));
                row
            })
            .collect();
        tracing::debug!(entity = %entity, groups = out.len(), "group_by");
        Ok(out)
    }
}

impl SubjectDirectory for InMemoryStore {
    /// Subjects are matched by user id, or by email as a convenience for
    /// command-line use.
    fn lookup_subject(&self, subject_id: &str) -> Result<AccessContext, SubjectLookupError> {
        let wanted = subject_id.trim();
        let unknown = || SubjectLookupError::UnknownSubject {
            subject_id: subject_id.to_string(),
        };
        if wanted.is_empty() {
            return Err(unknown());
        }
        self.tables
            .read()
            .users
            .iter()
            .find(|u| u.id == wanted || u.email.eq_ignore_ascii_case(wanted))
            .map(|u| AccessContext::new(u.id.clone(), u.region.clone()))
            .ok_or_else(unknown)
    }
}
