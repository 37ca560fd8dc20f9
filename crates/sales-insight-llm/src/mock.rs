//! Offline language model.
//!
//! [`MockModel`] replays scripted replies in order and records every request
//! it receives. In demo mode it answers the query prompt with a grouped
//! subtotal query and the chart prompt with a matching bar chart, which is
//! enough to run the whole pipeline against the demo data without a
//! provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LLMError, LLMProvider, ModelInfo, Usage,
};
use crate::prompts::CHART_SYSTEM_PROMPT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Text(String),
    /// Fail the call as if the provider returned an error.
    Error(String),
}

pub struct MockModel {
    script: Mutex<VecDeque<MockReply>>,
    demo: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

/// Canned answer to "total sales by product category".
pub fn demo_query() -> Value {
    json!({
        "model": "OrderItemDetail",
        "api": "groupBy",
        "arguments": {
            "by": ["category"],
            "_sum": { "subtotal": true }
        }
    })
}

/// Bar chart of the category subtotals over the demo data.
pub fn demo_chart() -> Value {
    json!({
        "type": "bar",
        "data": {
            "labels": ["Electronics", "Furniture", "Outdoor"],
            "datasets": [{
                "label": "Subtotal",
                "data": [2597, 4697, 307],
                "backgroundColor": [
                    "rgba(75, 192, 192, 0.2)",
                    "rgba(153, 102, 255, 0.2)",
                    "rgba(255, 159, 64, 0.2)"
                ],
                "borderColor": [
                    "rgba(75, 192, 192, 1)",
                    "rgba(153, 102, 255, 1)",
                    "rgba(255, 159, 64, 1)"
                ],
                "borderWidth": 1
            }]
        },
        "options": {
            "scales": {
                "yAxes": [{ "ticks": { "beginAtZero": true } }]
            }
        }
    })
}

impl MockModel {
    fn build(replies: impl IntoIterator<Item = MockReply>, demo: bool) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            demo,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every prompt with the canned demo query or chart.
    pub fn demo() -> Self {
        Self::build([], true)
    }

    /// Replies with `replies` in order, then fails.
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(replies.into_iter().map(|s| MockReply::Text(s.into())), false)
    }

    pub fn with_replies(replies: Vec<MockReply>) -> Self {
        Self::build(replies, false)
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    fn demo_reply(request: &CompletionRequest) -> String {
        if request.system_prompt() == Some(CHART_SYSTEM_PROMPT) {
            format!("```json\n{:#}\n```", demo_chart())
        } else {
            format!(
                "Here is the query for your question:\n\n```json\n{:#}\n```\n",
                demo_query()
            )
        }
    }
}

#[async_trait]
impl LLMProvider for MockModel {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().pop_front();
        let reply = match scripted {
            Some(reply) => reply,
            None if self.demo => MockReply::Text(Self::demo_reply(&request)),
            None => MockReply::Error("mock model has no scripted reply left".to_string()),
        };
        self.requests.lock().push(request);

        match reply {
            MockReply::Text(content) => Ok(CompletionResponse {
                content,
                finish_reason: FinishReason::Stop,
                usage: Usage::default(),
                model: "mock".to_string(),
            }),
            MockReply::Error(message) => Err(LLMError::Api(message)),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "mock".to_string(),
            max_tokens: usize::MAX,
        }
    }
}
