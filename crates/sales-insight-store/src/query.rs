//! Typed query arguments.
//!
//! The language model produces an untyped `arguments` bag shaped like the
//! Prisma client API (`where`, `orderBy`, `by`, `_sum`, ...). This module
//! turns that bag into typed arguments per operation.
//!
//! Only the *structure* is checked here. Whether a field exists on the target
//! entity, or whether it is numeric, is the store's call at execution time.

use serde_json::{Map, Value};

use crate::schema::Entity;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgumentError {
    #[error("arguments must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
    #[error("unsupported argument `{key}` for {operation}")]
    UnknownKey { operation: &'static str, key: String },
    #[error("missing required argument `{key}` for {operation}")]
    Missing { operation: &'static str, key: &'static str },
    #[error("invalid `{key}`: {message}")]
    Invalid { key: String, message: String },
}

fn invalid(key: impl Into<String>, message: impl Into<String>) -> ArgumentError {
    ArgumentError::Invalid {
        key: key.into(),
        message: message.into(),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    NotEquals,
    In,
    NotIn,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    StartsWith,
    EndsWith,
}

impl Comparison {
    fn from_key(key: &str) -> Option<Comparison> {
        Some(match key {
            "equals" => Comparison::Equals,
            "not" => Comparison::NotEquals,
            "in" => Comparison::In,
            "notIn" => Comparison::NotIn,
            "lt" => Comparison::Lt,
            "lte" => Comparison::Lte,
            "gt" => Comparison::Gt,
            "gte" => Comparison::Gte,
            "contains" => Comparison::Contains,
            "startsWith" => Comparison::StartsWith,
            "endsWith" => Comparison::EndsWith,
            _ => return None,
        })
    }

    pub fn key(self) -> &'static str {
        match self {
            Comparison::Equals => "equals",
            Comparison::NotEquals => "not",
            Comparison::In => "in",
            Comparison::NotIn => "notIn",
            Comparison::Lt => "lt",
            Comparison::Lte => "lte",
            Comparison::Gt => "gt",
            Comparison::Gte => "gte",
            Comparison::Contains => "contains",
            Comparison::StartsWith => "startsWith",
            Comparison::EndsWith => "endsWith",
        }
    }

    fn check_operand(self, field: &str, value: &Value) -> Result<(), ArgumentError> {
        let ok = match self {
            Comparison::Equals | Comparison::NotEquals => {
                !matches!(value, Value::Array(_) | Value::Object(_))
            }
            Comparison::In | Comparison::NotIn => match value {
                Value::Array(items) => items
                    .iter()
                    .all(|v| !matches!(v, Value::Array(_) | Value::Object(_))),
                _ => false,
            },
            Comparison::Lt | Comparison::Lte | Comparison::Gt | Comparison::Gte => {
                matches!(value, Value::Number(_) | Value::String(_))
            }
            Comparison::Contains | Comparison::StartsWith | Comparison::EndsWith => {
                value.is_string()
            }
        };
        if ok {
            Ok(())
        } else {
            Err(invalid(
                format!("{field}.{}", self.key()),
                format!("unexpected {} operand", json_kind(value)),
            ))
        }
    }
}

/// Row predicate evaluated by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Field {
        field: String,
        op: Comparison,
        value: Value,
    },
    /// Follows `foreign_key` to a row of `target` and tests that row.
    Related {
        foreign_key: String,
        target: Entity,
        filter: Box<Filter>,
    },
}

impl Filter {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Filter {
        Filter::Field {
            field: field.into(),
            op: Comparison::Equals,
            value: value.into(),
        }
    }

    /// Conjunction that keeps `All` out of the tree.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (left, right) => Filter::And(vec![left, right]),
        }
    }

    /// Parse a Prisma-style `where` object.
    pub fn from_json(value: &Value) -> Result<Filter, ArgumentError> {
        let Some(obj) = value.as_object() else {
            return Err(invalid(
                "where",
                format!("expected an object, got {}", json_kind(value)),
            ));
        };

        let mut parts = Vec::new();
        for (key, v) in obj {
            match key.as_str() {
                "AND" => parts.push(Filter::And(parse_filter_list("AND", v)?)),
                "OR" => parts.push(Filter::Or(parse_filter_list("OR", v)?)),
                "NOT" => parts.extend(
                    parse_filter_list("NOT", v)?
                        .into_iter()
                        .map(|f| Filter::Not(Box::new(f))),
                ),
                field => parts.extend(parse_field_condition(field, v)?),
            }
        }

        Ok(match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        })
    }
}

fn parse_filter_list(key: &str, value: &Value) -> Result<Vec<Filter>, ArgumentError> {
    match value {
        Value::Array(items) => items.iter().map(Filter::from_json).collect(),
        Value::Object(_) => Ok(vec![Filter::from_json(value)?]),
        other => Err(invalid(
            key,
            format!("expected an object or array, got {}", json_kind(other)),
        )),
    }
}

fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<Filter>, ArgumentError> {
    let Some(ops) = value.as_object() else {
        if value.is_array() {
            return Err(invalid(field, "use `in` to match a list of values"));
        }
        return Ok(vec![Filter::field_equals(field, value.clone())]);
    };

    let mut out = Vec::with_capacity(ops.len());
    for (key, operand) in ops {
        let Some(op) = Comparison::from_key(key) else {
            return Err(invalid(
                format!("{field}.{key}"),
                "unsupported filter operator",
            ));
        };
        // `not` may wrap a nested condition object.
        if op == Comparison::NotEquals && operand.is_object() {
            let inner = parse_field_condition(field, operand)?;
            out.push(Filter::Not(Box::new(Filter::And(inner))));
            continue;
        }
        op.check_operand(field, operand)?;
        out.push(Filter::Field {
            field: field.to_string(),
            op,
            value: operand.clone(),
        });
    }
    Ok(out)
}

// ============================================================================
// Aggregates
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    pub const ALL: [AggregateFn; 5] = [
        AggregateFn::Count,
        AggregateFn::Sum,
        AggregateFn::Avg,
        AggregateFn::Min,
        AggregateFn::Max,
    ];

    /// Output key, e.g. `_sum`.
    pub fn key(self) -> &'static str {
        match self {
            AggregateFn::Count => "_count",
            AggregateFn::Sum => "_sum",
            AggregateFn::Avg => "_avg",
            AggregateFn::Min => "_min",
            AggregateFn::Max => "_max",
        }
    }

    /// Accepts both `_sum` and the bare `sum` spelling models often emit.
    pub fn from_key(key: &str) -> Option<AggregateFn> {
        let bare = key.strip_prefix('_').unwrap_or(key);
        Some(match bare {
            "count" => AggregateFn::Count,
            "sum" => AggregateFn::Sum,
            "avg" => AggregateFn::Avg,
            "min" => AggregateFn::Min,
            "max" => AggregateFn::Max,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountSelection {
    /// `_count: true`: a bare row count.
    Rows,
    /// `_count: { _all: true, field: true }`: row count and/or non-null counts.
    Fields { all: bool, fields: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateSelection {
    pub count: Option<CountSelection>,
    pub sum: Vec<String>,
    pub avg: Vec<String>,
    pub min: Vec<String>,
    pub max: Vec<String>,
}

impl AggregateSelection {
    pub fn is_empty(&self) -> bool {
        self.count.is_none()
            && self.sum.is_empty()
            && self.avg.is_empty()
            && self.min.is_empty()
            && self.max.is_empty()
    }

    pub fn fields_for(&self, func: AggregateFn) -> &[String] {
        match func {
            AggregateFn::Count => &[],
            AggregateFn::Sum => &self.sum,
            AggregateFn::Avg => &self.avg,
            AggregateFn::Min => &self.min,
            AggregateFn::Max => &self.max,
        }
    }

    /// Consume `key` if it is an aggregate key; returns whether it was.
    fn take(&mut self, key: &str, value: &Value) -> Result<bool, ArgumentError> {
        let Some(func) = AggregateFn::from_key(key) else {
            return Ok(false);
        };
        match func {
            AggregateFn::Count => self.count = Some(parse_count_selection(key, value)?),
            AggregateFn::Sum => self.sum = parse_field_selection(key, value)?,
            AggregateFn::Avg => self.avg = parse_field_selection(key, value)?,
            AggregateFn::Min => self.min = parse_field_selection(key, value)?,
            AggregateFn::Max => self.max = parse_field_selection(key, value)?,
        }
        Ok(true)
    }
}

fn parse_count_selection(key: &str, value: &Value) -> Result<CountSelection, ArgumentError> {
    match value {
        Value::Bool(true) => Ok(CountSelection::Rows),
        Value::Object(obj) => {
            let mut all = false;
            let mut fields = Vec::new();
            for (name, flag) in obj {
                match flag {
                    Value::Bool(true) if name == "_all" => all = true,
                    Value::Bool(true) => fields.push(name.clone()),
                    Value::Bool(false) => {}
                    other => {
                        return Err(invalid(
                            format!("{key}.{name}"),
                            format!("expected true/false, got {}", json_kind(other)),
                        ))
                    }
                }
            }
            if !all && fields.is_empty() {
                return Err(invalid(key, "selects nothing to count"));
            }
            Ok(CountSelection::Fields { all, fields })
        }
        other => Err(invalid(
            key,
            format!("expected true or an object, got {}", json_kind(other)),
        )),
    }
}

/// `{ field: true, other: false }` → `["field"]`.
fn parse_field_selection(key: &str, value: &Value) -> Result<Vec<String>, ArgumentError> {
    let Some(obj) = value.as_object() else {
        return Err(invalid(
            key,
            format!("expected an object of fields, got {}", json_kind(value)),
        ));
    };
    let mut fields = Vec::new();
    for (name, flag) in obj {
        match flag {
            Value::Bool(true) => fields.push(name.clone()),
            Value::Bool(false) => {}
            other => {
                return Err(invalid(
                    format!("{key}.{name}"),
                    format!("expected true/false, got {}", json_kind(other)),
                ))
            }
        }
    }
    if fields.is_empty() {
        return Err(invalid(key, "selects no fields"));
    }
    Ok(fields)
}

// ============================================================================
// Ordering and paging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn parse(key: &str, value: &Value) -> Result<SortDirection, ArgumentError> {
        match value.as_str().map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("asc") => Ok(SortDirection::Asc),
            Some("desc") => Ok(SortDirection::Desc),
            _ => Err(invalid(key, "expected \"asc\" or \"desc\"")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    Field(String),
    /// Group-by only: order by a computed aggregate. `_count._all` is
    /// represented as `Aggregate { func: Count, field: None }`.
    Aggregate {
        func: AggregateFn,
        field: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub key: OrderKey,
    pub direction: SortDirection,
}

fn parse_order_by(value: &Value, allow_aggregates: bool) -> Result<Vec<OrderBy>, ArgumentError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![value],
        other => {
            return Err(invalid(
                "orderBy",
                format!("expected an object or array, got {}", json_kind(other)),
            ))
        }
    };

    let mut out = Vec::new();
    for item in items {
        let Some(obj) = item.as_object() else {
            return Err(invalid("orderBy", "entries must be objects"));
        };
        for (key, dir) in obj {
            match AggregateFn::from_key(key).filter(|_| key.starts_with('_')) {
                Some(func) if allow_aggregates => {
                    let Some(fields) = dir.as_object() else {
                        return Err(invalid(
                            format!("orderBy.{key}"),
                            "expected an object of field directions",
                        ));
                    };
                    for (field, dir) in fields {
                        let field = (field != "_all").then(|| field.clone());
                        if field.is_none() && func != AggregateFn::Count {
                            return Err(invalid(
                                format!("orderBy.{key}"),
                                "`_all` is only valid under `_count`",
                            ));
                        }
                        out.push(OrderBy {
                            key: OrderKey::Aggregate { func, field },
                            direction: SortDirection::parse(&format!("orderBy.{key}"), dir)?,
                        });
                    }
                }
                Some(_) => {
                    return Err(invalid(
                        format!("orderBy.{key}"),
                        "aggregate ordering is only supported for groupBy",
                    ))
                }
                None => out.push(OrderBy {
                    key: OrderKey::Field(key.clone()),
                    direction: SortDirection::parse(&format!("orderBy.{key}"), dir)?,
                }),
            }
        }
    }
    Ok(out)
}

fn parse_count(key: &str, value: &Value) -> Result<usize, ArgumentError> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| invalid(key, "expected a non-negative integer"))
}

fn as_object<'a>(value: &'a Value) -> Result<Option<&'a Map<String, Value>>, ArgumentError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(obj) => Ok(Some(obj)),
        other => Err(ArgumentError::NotAnObject {
            found: json_kind(other),
        }),
    }
}

// ============================================================================
// Per-operation arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FindManyArgs {
    pub filter: Filter,
    pub order_by: Vec<OrderBy>,
    pub skip: usize,
    pub take: Option<usize>,
    /// Projection; `None` returns every field.
    pub select: Option<Vec<String>>,
}

impl Default for FindManyArgs {
    fn default() -> Self {
        Self {
            filter: Filter::All,
            order_by: Vec::new(),
            skip: 0,
            take: None,
            select: None,
        }
    }
}

impl FindManyArgs {
    pub fn from_json(value: &Value) -> Result<Self, ArgumentError> {
        let mut args = FindManyArgs::default();
        let Some(obj) = as_object(value)? else {
            return Ok(args);
        };
        for (key, v) in obj {
            match key.as_str() {
                "where" => args.filter = Filter::from_json(v)?,
                "orderBy" => args.order_by = parse_order_by(v, false)?,
                "skip" => args.skip = parse_count("skip", v)?,
                "take" => args.take = Some(parse_count("take", v)?),
                "select" => args.select = Some(parse_field_selection("select", v)?),
                _ => {
                    return Err(ArgumentError::UnknownKey {
                        operation: "list",
                        key: key.clone(),
                    })
                }
            }
        }
        Ok(args)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateArgs {
    pub filter: Filter,
    pub order_by: Vec<OrderBy>,
    pub skip: usize,
    pub take: Option<usize>,
    pub aggregates: AggregateSelection,
}

impl AggregateArgs {
    pub fn from_json(value: &Value) -> Result<Self, ArgumentError> {
        let obj = as_object(value)?.ok_or(ArgumentError::NotAnObject { found: "null" })?;
        let mut args = AggregateArgs {
            filter: Filter::All,
            order_by: Vec::new(),
            skip: 0,
            take: None,
            aggregates: AggregateSelection::default(),
        };
        for (key, v) in obj {
            if args.aggregates.take(key, v)? {
                continue;
            }
            match key.as_str() {
                "where" => args.filter = Filter::from_json(v)?,
                "orderBy" => args.order_by = parse_order_by(v, false)?,
                "skip" => args.skip = parse_count("skip", v)?,
                "take" => args.take = Some(parse_count("take", v)?),
                _ => {
                    return Err(ArgumentError::UnknownKey {
                        operation: "aggregate",
                        key: key.clone(),
                    })
                }
            }
        }
        if args.aggregates.is_empty() {
            return Err(ArgumentError::Missing {
                operation: "aggregate",
                key: "_count/_sum/_avg/_min/_max",
            });
        }
        Ok(args)
    }
}

/// `having: { subtotal: { _sum: { gt: 1000 } } }`
#[derive(Debug, Clone, PartialEq)]
pub struct HavingCondition {
    pub func: AggregateFn,
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

fn parse_having(value: &Value) -> Result<Vec<HavingCondition>, ArgumentError> {
    let Some(obj) = value.as_object() else {
        return Err(invalid("having", "expected an object"));
    };
    let mut out = Vec::new();
    for (field, by_func) in obj {
        let Some(by_func) = by_func.as_object() else {
            return Err(invalid(format!("having.{field}"), "expected an object"));
        };
        for (func_key, ops) in by_func {
            let Some(func) = AggregateFn::from_key(func_key) else {
                return Err(invalid(
                    format!("having.{field}.{func_key}"),
                    "expected an aggregate such as `_sum`",
                ));
            };
            let Some(ops) = ops.as_object() else {
                return Err(invalid(
                    format!("having.{field}.{func_key}"),
                    "expected an object of comparisons",
                ));
            };
            for (op_key, operand) in ops {
                let op = Comparison::from_key(op_key)
                    .filter(|op| {
                        matches!(
                            op,
                            Comparison::Equals
                                | Comparison::NotEquals
                                | Comparison::Lt
                                | Comparison::Lte
                                | Comparison::Gt
                                | Comparison::Gte
                        )
                    })
                    .ok_or_else(|| {
                        invalid(
                            format!("having.{field}.{func_key}.{op_key}"),
                            "unsupported comparison",
                        )
                    })?;
                if !operand.is_number() {
                    return Err(invalid(
                        format!("having.{field}.{func_key}.{op_key}"),
                        "expected a number",
                    ));
                }
                out.push(HavingCondition {
                    func,
                    field: field.clone(),
                    op,
                    value: operand.clone(),
                });
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupByArgs {
    pub by: Vec<String>,
    pub filter: Filter,
    pub having: Vec<HavingCondition>,
    pub order_by: Vec<OrderBy>,
    pub skip: usize,
    pub take: Option<usize>,
    pub aggregates: AggregateSelection,
}

impl GroupByArgs {
    pub fn from_json(value: &Value) -> Result<Self, ArgumentError> {
        let obj = as_object(value)?.ok_or(ArgumentError::NotAnObject { found: "null" })?;
        let mut by: Option<Vec<String>> = None;
        let mut args = GroupByArgs {
            by: Vec::new(),
            filter: Filter::All,
            having: Vec::new(),
            order_by: Vec::new(),
            skip: 0,
            take: None,
            aggregates: AggregateSelection::default(),
        };
        for (key, v) in obj {
            if args.aggregates.take(key, v)? {
                continue;
            }
            match key.as_str() {
                "by" => by = Some(parse_by(v)?),
                "where" => args.filter = Filter::from_json(v)?,
                "having" => args.having = parse_having(v)?,
                "orderBy" => args.order_by = parse_order_by(v, true)?,
                "skip" => args.skip = parse_count("skip", v)?,
                "take" => args.take = Some(parse_count("take", v)?),
                _ => {
                    return Err(ArgumentError::UnknownKey {
                        operation: "groupBy",
                        key: key.clone(),
                    })
                }
            }
        }
        args.by = by.ok_or(ArgumentError::Missing {
            operation: "groupBy",
            key: "by",
        })?;
        Ok(args)
    }
}

fn parse_by(value: &Value) -> Result<Vec<String>, ArgumentError> {
    let fields: Vec<String> = match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid("by", "expected field names"))
            })
            .collect::<Result<_, _>>()?,
        other => {
            return Err(invalid(
                "by",
                format!("expected a field name or array, got {}", json_kind(other)),
            ))
        }
    };
    if fields.is_empty() {
        return Err(invalid("by", "must name at least one field"));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn where_scalar_and_operator_forms() {
        let f = Filter::from_json(&json!({
            "category": "Outdoor",
            "quantity": { "gte": 2 }
        }))
        .unwrap();
        let Filter::And(parts) = f else {
            panic!("expected conjunction");
        };
        assert_eq!(parts.len(), 2);
        assert!(parts.contains(&Filter::field_equals("category", "Outdoor")));
        assert!(parts.contains(&Filter::Field {
            field: "quantity".into(),
            op: Comparison::Gte,
            value: json!(2),
        }));
    }

    #[test]
    fn not_array_negates_each_entry() {
        let f = Filter::from_json(&json!({ "NOT": [{ "region": "A" }, { "region": "B" }] })).unwrap();
        let Filter::And(parts) = f else {
            panic!("expected conjunction");
        };
        assert!(parts.iter().all(|p| matches!(p, Filter::Not(_))));
    }

    #[test]
    fn in_requires_an_array() {
        let err = Filter::from_json(&json!({ "region": { "in": "Washington" } })).unwrap_err();
        assert!(matches!(err, ArgumentError::Invalid { .. }));
    }

    #[test]
    fn and_skips_match_all() {
        let f = Filter::All.and(Filter::field_equals("region", "X"));
        assert_eq!(f, Filter::field_equals("region", "X"));
    }

    #[test]
    fn group_by_accepts_bare_aggregate_keys() {
        let args = GroupByArgs::from_json(&json!({
            "by": ["category"],
            "sum": { "subtotal": true }
        }))
        .unwrap();
        assert_eq!(args.by, vec!["category"]);
        assert_eq!(args.aggregates.sum, vec!["subtotal"]);
    }

    #[test]
    fn group_by_requires_by() {
        let err = GroupByArgs::from_json(&json!({ "_sum": { "subtotal": true } })).unwrap_err();
        assert_eq!(
            err,
            ArgumentError::Missing {
                operation: "groupBy",
                key: "by"
            }
        );
    }

    #[test]
    fn group_by_order_by_aggregate() {
        let args = GroupByArgs::from_json(&json!({
            "by": "category",
            "_sum": { "subtotal": true },
            "orderBy": { "_sum": { "subtotal": "desc" } },
            "take": 2
        }))
        .unwrap();
        assert_eq!(
            args.order_by,
            vec![OrderBy {
                key: OrderKey::Aggregate {
                    func: AggregateFn::Sum,
                    field: Some("subtotal".into())
                },
                direction: SortDirection::Desc,
            }]
        );
        assert_eq!(args.take, Some(2));
    }

    #[test]
    fn aggregate_needs_at_least_one_aggregate() {
        let err = AggregateArgs::from_json(&json!({ "where": {} })).unwrap_err();
        assert!(matches!(err, ArgumentError::Missing { .. }));
    }

    #[test]
    fn count_true_and_count_fields() {
        let args = AggregateArgs::from_json(&json!({ "_count": true })).unwrap();
        assert_eq!(args.aggregates.count, Some(CountSelection::Rows));

        let args = AggregateArgs::from_json(&json!({ "_count": { "_all": true, "region": true } })).unwrap();
        assert_eq!(
            args.aggregates.count,
            Some(CountSelection::Fields {
                all: true,
                fields: vec!["region".into()]
            })
        );
    }

    #[test]
    fn list_rejects_unknown_keys_and_negative_take() {
        assert!(matches!(
            FindManyArgs::from_json(&json!({ "include": { "items": true } })),
            Err(ArgumentError::UnknownKey { .. })
        ));
        assert!(FindManyArgs::from_json(&json!({ "take": -5 })).is_err());
        assert_eq!(FindManyArgs::from_json(&Value::Null).unwrap(), FindManyArgs::default());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        assert_eq!(
            GroupByArgs::from_json(&json!(["category"])).unwrap_err(),
            ArgumentError::NotAnObject { found: "array" }
        );
    }

    #[test]
    fn having_parses_aggregate_comparisons() {
        let args = GroupByArgs::from_json(&json!({
            "by": ["region"],
            "_sum": { "subtotal": true },
            "having": { "subtotal": { "_sum": { "gt": 1000 } } }
        }))
        .unwrap();
        assert_eq!(args.having.len(), 1);
        assert_eq!(args.having[0].func, AggregateFn::Sum);
        assert_eq!(args.having[0].op, Comparison::Gt);
    }
}
