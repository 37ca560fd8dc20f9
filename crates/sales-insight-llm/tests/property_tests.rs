//! Property-based tests for the model-output handling
//!
//! Uses proptest for:
//! 1. Fenced-block extraction (single, none, multiple)
//! 2. Structured-query envelope validation
//! 3. JSON payload recovery from prose

use proptest::prelude::*;
use sales_insight_llm::snippet::{extract_code_snippet, parse_json_payload};
use sales_insight_llm::{StructuredQuery, SynthesisError};
use serde_json::{json, Value};

// ============================================================================
// Strategies
// ============================================================================

/// Prose around a block. Never contains a backtick.
fn prose_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z .,:\n]{0,30}"
}

/// Optional language tag: anything on the opening fence line that does not
/// start an inline block.
fn tag_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("json".to_string()),
        Just("JSON".to_string()),
        Just("js".to_string()),
        Just("c#".to_string()),
        Just(" json".to_string()),
        Just("json title=x".to_string()),
        "[a-z#+ =.\\-]{1,12}",
    ]
}

/// Block content: multi-line, no backticks, ends on a non-newline.
fn body_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9{}\":, \n]{0,40}[a-z]"
}

/// Arbitrary JSON values, nested a few levels.
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn fenced(tag: &str, body: &str) -> String {
    format!("```{tag}\n{body}\n```")
}

// ============================================================================
// Snippet extraction
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn single_block_yields_its_content(
        before in prose_strategy(),
        tag in tag_strategy(),
        body in body_strategy(),
        after in prose_strategy(),
    ) {
        let text = format!("{before}{}{after}", fenced(&tag, &body));
        prop_assert_eq!(extract_code_snippet(&text), body.as_str());
    }

    #[test]
    fn text_without_fence_is_unchanged(text in "[^`]{0,80}") {
        prop_assert_eq!(extract_code_snippet(&text), text.as_str());
    }

    #[test]
    fn only_the_first_block_is_taken(
        first in body_strategy(),
        second in body_strategy(),
        between in prose_strategy(),
        tag in tag_strategy(),
    ) {
        let text = format!("{}{between}{}", fenced(&tag, &first), fenced("json", &second));
        prop_assert_eq!(extract_code_snippet(&text), first.as_str());
    }

    #[test]
    fn json_survives_prose_and_fences(
        value in json_strategy(),
        before in prose_strategy(),
        after in prose_strategy(),
    ) {
        let object = json!({ "payload": value });
        let text = format!("{before}{}{after}", fenced("json", &format!("{object:#}")));
        let (parsed, _) = parse_json_payload(&text).unwrap();
        prop_assert_eq!(parsed, object);
    }
}

// ============================================================================
// Envelope validation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn any_arguments_are_accepted(
        entity in "[A-Za-z]{1,16}",
        operation in "[A-Za-z]{1,12}",
        arguments in json_strategy(),
    ) {
        let query = StructuredQuery::from_value(json!({
            "targetEntity": entity.clone(),
            "operation": operation.clone(),
            "arguments": arguments.clone(),
        }))
        .unwrap();
        prop_assert_eq!(query, StructuredQuery::new(entity, operation, arguments));
    }

    #[test]
    fn missing_or_mistyped_envelope_is_rejected(
        arguments in json_strategy(),
        drop in 0usize..3,
        bad in prop_oneof![Just(json!(1)), Just(json!(null)), Just(json!(["Order"])), Just(json!({}))],
    ) {
        let mut obj = json!({
            "targetEntity": "Order",
            "operation": "findMany",
            "arguments": arguments,
        });
        let key = ["targetEntity", "operation", "arguments"][drop];
        let map = obj.as_object_mut().unwrap();
        map.remove(key);
        let missing = StructuredQuery::from_value(Value::Object(map.clone()));
        prop_assert!(
            matches!(missing, Err(SynthesisError::SchemaViolation { .. })),
            "missing `{}` was accepted",
            key
        );

        if key != "arguments" {
            map.insert(key.to_string(), bad);
            let mistyped = StructuredQuery::from_value(Value::Object(map.clone()));
            prop_assert!(
                matches!(mistyped, Err(SynthesisError::SchemaViolation { .. })),
                "mistyped `{}` was accepted",
                key
            );
        }
    }
}
