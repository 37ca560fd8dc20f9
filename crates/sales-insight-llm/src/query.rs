//! Structured queries: the contract between synthesis and execution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::synthesis::SynthesisError;

/// A query as produced by the model.
///
/// `target_entity` and `operation` are kept as the strings the model wrote;
/// they are resolved against the schema by the executor, which rejects
/// unknown names before touching the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    #[serde(alias = "model")]
    pub target_entity: String,
    #[serde(alias = "api")]
    pub operation: String,
    pub arguments: Value,
}

fn envelope_field<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    alias: &str,
) -> Result<&'a Value, SynthesisError> {
    obj.get(key)
        .or_else(|| obj.get(alias))
        .ok_or_else(|| SynthesisError::SchemaViolation {
            detail: format!("missing `{key}`"),
        })
}

fn envelope_string(obj: &Map<String, Value>, key: &str, alias: &str) -> Result<String, SynthesisError> {
    match envelope_field(obj, key, alias)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(SynthesisError::SchemaViolation {
            detail: format!("`{key}` must be a string, got {other}"),
        }),
    }
}

impl StructuredQuery {
    pub fn new(target_entity: impl Into<String>, operation: impl Into<String>, arguments: Value) -> Self {
        Self {
            target_entity: target_entity.into(),
            operation: operation.into(),
            arguments,
        }
    }

    /// Validate the envelope of a parsed model response.
    ///
    /// Only the envelope is checked: an object with string `targetEntity`
    /// and `operation` (or the `model`/`api` spellings) and an `arguments`
    /// key holding any JSON value.
    pub fn from_value(value: Value) -> Result<Self, SynthesisError> {
        let Value::Object(obj) = value else {
            return Err(SynthesisError::SchemaViolation {
                detail: "expected a JSON object".to_string(),
            });
        };
        let target_entity = envelope_string(&obj, "targetEntity", "model")?;
        let operation = envelope_string(&obj, "operation", "api")?;
        let arguments = obj
            .get("arguments")
            .cloned()
            .ok_or_else(|| SynthesisError::SchemaViolation {
                detail: "missing `arguments`".to_string(),
            })?;
        Ok(Self {
            target_entity,
            operation,
            arguments,
        })
    }
}

/// Supported verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Aggregate,
    GroupBy,
}

impl Operation {
    /// `findMany` is the Prisma spelling of `list`.
    pub fn parse(name: &str) -> Option<Operation> {
        match name {
            "list" | "findMany" => Some(Operation::List),
            "aggregate" => Some(Operation::Aggregate),
            "groupBy" => Some(Operation::GroupBy),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Aggregate => "aggregate",
            Operation::GroupBy => "groupBy",
        }
    }
}
