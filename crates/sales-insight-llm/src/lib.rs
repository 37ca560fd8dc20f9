//! Sales Insight: natural-language questions → query, data and chart
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      INSIGHT PIPELINE                          │
//! ├────────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  subject id ──► SubjectDirectory ──► AccessContext             │
//! │                                           │                    │
//! │  question                                 │                    │
//! │     │                                     │                    │
//! │     ▼                                     │                    │
//! │  ┌──────────────────┐  prompt   ┌─────────┴────────┐           │
//! │  │ QuerySynthesizer │──────────►│   LLMProvider    │           │
//! │  │ (snippet, parse) │◄──────────│ (OpenAI,         │           │
//! │  └────────┬─────────┘   text    │  Anthropic,      │           │
//! │           │ StructuredQuery     │  Local, Mock)    │           │
//! │           ▼                     └────────▲─────────┘           │
//! │  ┌──────────────────┐                    │                     │
//! │  │  QueryExecutor   │──► SalesStore      │ prompt / text       │
//! │  │ (scope AND where)│◄── ResultSet       │                     │
//! │  └────────┬─────────┘                    │                     │
//! │           ▼                              │                     │
//! │  ┌──────────────────┐                    │                     │
//! │  │ ChartSynthesizer │────────────────────┘                     │
//! │  └────────┬─────────┘                                          │
//! │           ▼                                                    │
//! │  PipelineResult = { query, data, chart } | { error }           │
//! │                                                                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each run is a strict sequence of two model calls around one store call.
//! Any stage failure ends the run; callers of [`InsightPipeline::run`] get a
//! single opaque error message, while [`InsightPipeline::run_detailed`]
//! keeps the failure kind.

pub mod chart;
pub mod config;
pub mod executor;
pub mod llm;
pub mod mock;
pub mod pipeline;
pub mod prompts;
pub mod query;
pub mod snippet;
pub mod synthesis;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use chart::ChartSynthesizer;
pub use config::PipelineConfig;
pub use executor::{ExecutionError, QueryExecutor};
pub use llm::{CompletionRequest, CompletionResponse, LLMError, LLMProvider, Message, Role};
pub use mock::{MockModel, MockReply};
pub use pipeline::{FailureKind, InsightPipeline, PipelineError};
pub use query::{Operation, StructuredQuery};
pub use snippet::extract_code_snippet;
pub use synthesis::{QuerySynthesizer, SynthesisError};

#[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
pub use llm::providers::{LLMConfig, Provider, UnifiedClient};

/// Rows returned by the store, in store order.
pub type ResultSet = Vec<sales_insight_store::Record>;

// ============================================================================
// Chart specification
// ============================================================================

/// A Chart.js configuration as produced by the model.
///
/// Not validated: the object is handed to the renderer as-is. The accessors
/// read the conventional `type` / `data.labels` / `data.datasets` paths and
/// return nothing when they are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartSpec(pub Value);

impl ChartSpec {
    pub fn chart_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Labels rendered as strings; numeric labels are formatted.
    pub fn labels(&self) -> Vec<String> {
        self.0
            .pointer("/data/labels")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .map(|l| match l {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn datasets(&self) -> &[Value] {
        self.0
            .pointer("/data/datasets")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ============================================================================
// Pipeline results
// ============================================================================

/// A successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Insight {
    pub query: StructuredQuery,
    pub data: ResultSet,
    pub chart: ChartSpec,
}

/// What the caller receives: `{query, data, chart}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineResult {
    Success {
        query: StructuredQuery,
        data: ResultSet,
        chart: ChartSpec,
    },
    Failure {
        #[serde(rename = "error")]
        message: String,
    },
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Success { .. })
    }
}
