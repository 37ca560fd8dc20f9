//! Prompt templates.
//!
//! The schema text below is hand-maintained and versioned. It is *not*
//! generated from `sales_insight_store::schema`; the tests at the bottom of
//! this file fail when the two drift apart. Bump [`SCHEMA_PROMPT_VERSION`]
//! whenever the text changes.

pub const SCHEMA_PROMPT_VERSION: &str = "sales-schema/3";

pub const QUERY_SYSTEM_PROMPT: &str = "You are a senior developer who knows Prisma ORM very well.";

pub const CHART_SYSTEM_PROMPT: &str = "You are a senior developer who knows Chart.js very well.";

/// Queryable models and the reporting view, in Prisma schema syntax.
pub const SCHEMA_DESCRIPTION: &str = r#"model Product {
    id         String
    name       String
    category   String
    price      Float
}

model Order {
    id         String
    createdAt  DateTime
    updatedAt  DateTime
    region     String
}

model OrderItem {
    id         String
    quantity   Int
    productId  String
    orderId    String
}

view OrderItemDetail {
    id         String
    createdAt  DateTime
    updatedAt  DateTime
    product    String
    category   String
    region     String
    unitPrice  Float
    quantity   Int
    subtotal   Float
}"#;

const AGGREGATION_NOTES: &str = r#"`OrderItem.productId` references `Product.id` and `OrderItem.orderId` references `Order.id`.
The "OrderItemDetail" view contains order items with more fields joined from "Order" and "Product" (`subtotal` is `unitPrice * quantity`). Use it for aggregations.

When you do aggregation, use "_sum", "_avg", "_min", "_max" to aggregate numeric fields, use "_count" to count the number of rows.
An aggregation can be written like:

```
{
  "by": ["field"],
  "_sum": {
    "metricField": true
  }
}
```

Filters go in "where", e.g. { "where": { "category": "Outdoor", "quantity": { "gte": 2 } } }.
Sorting goes in "orderBy", e.g. { "orderBy": { "price": "desc" } }, and "take" limits the number of rows."#;

/// Prompt asking for a structured query answering `question`.
pub fn render_query_prompt(question: &str) -> String {
    format!(
        r#"Given the following Prisma schema:

```
{SCHEMA_DESCRIPTION}
```

{AGGREGATION_NOTES}

Using Prisma APIs including "findMany", "aggregate", and "groupBy", compute a Prisma query for the following question:
"{question}"

However, don't return the Prisma function call, instead, transform it into a JSON object like the following:

```
{{
    "targetEntity": "Order",
    "operation": "findMany",
    "arguments": {{ ... }}
}}
```

The "targetEntity" field contains the name of the model or view to query, like "Order", "OrderItemDetail".
The "operation" field contains the Prisma API to use: "findMany", "aggregate" or "groupBy".
The "arguments" field contains the arguments to pass to the Prisma API, like {{ "by": ["category"] }}.

Return only the JSON object. Don't provide any other text.
"#
    )
}

/// Prompt asking for a Chart.js configuration rendering `data_json`.
///
/// `omitted_rows` > 0 tells the model the data was truncated.
pub fn render_chart_prompt(data_json: &str, omitted_rows: usize) -> String {
    let note = if omitted_rows > 0 {
        format!("\n({omitted_rows} more rows were omitted from the data above.)\n")
    } else {
        String::new()
    };
    format!(
        r#"Generate a chart using Chart.js syntax for the following JSON data:

```
{data_json}
```
{note}
Choose the chart type and configuration that you feel is most appropriate for the data.

Return only the Chart.js input object converted to JSON format.
Make sure keys and string values are double quoted.
Don't call the Chart.js constructor. Don't output anything else.
"#
    )
}

fn truncate_preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

/// Follow-up prompt after a response that could not be used.
pub fn render_repair_prompt(original_prompt: &str, invalid_response: &str, error: &str) -> String {
    let preview = truncate_preview(invalid_response, 2_000);
    format!(
        r#"{original_prompt}

---
Your previous response could not be used: {error}
Return ONLY a valid JSON object of the requested shape.
Do NOT include markdown or any non-JSON text.

Invalid response (truncated):
{preview}
"#
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedEntity {
    pub name: String,
    pub is_view: bool,
    /// `(field, type)` in declaration order.
    pub fields: Vec<(String, String)>,
}

/// Parse [`SCHEMA_DESCRIPTION`] back into entities and fields.
pub fn described_entities() -> Vec<DescribedEntity> {
    let mut out = Vec::new();
    let mut current: Option<DescribedEntity> = None;

    for line in SCHEMA_DESCRIPTION.lines().map(str::trim) {
        if line == "}" {
            out.extend(current.take());
            continue;
        }
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some(kw @ ("model" | "view")), Some(name), Some("{")) => {
                current = Some(DescribedEntity {
                    name: name.to_string(),
                    is_view: kw == "view",
                    fields: Vec::new(),
                });
            }
            (Some(field), Some(ty), _) => {
                if let Some(entity) = current.as_mut() {
                    entity.fields.push((field.to_string(), ty.to_string()));
                }
            }
            _ => {}
        }
    }
    out
}
