//! Pipeline orchestration: synthesis → execution → chart synthesis.

use std::sync::Arc;

use sales_insight_store::{AccessContext, InMemoryStore, SalesStore, SubjectDirectory, SubjectLookupError};

use crate::chart::ChartSynthesizer;
use crate::config::PipelineConfig;
use crate::executor::{ExecutionError, QueryExecutor};
use crate::llm::LLMProvider;
use crate::synthesis::{QuerySynthesizer, SynthesisError};
use crate::{Insight, PipelineResult};

/// Why a run failed. Kept for logs; callers of [`InsightPipeline::run`] only
/// see an opaque message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    EmptyQuestion,
    UnknownSubject,
    ModelUnavailable,
    MalformedOutput,
    SchemaViolation,
    InvalidQuery,
    StoreRejected,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::EmptyQuestion => "empty_question",
            FailureKind::UnknownSubject => "unknown_subject",
            FailureKind::ModelUnavailable => "model_unavailable",
            FailureKind::MalformedOutput => "malformed_output",
            FailureKind::SchemaViolation => "schema_violation",
            FailureKind::InvalidQuery => "invalid_query",
            FailureKind::StoreRejected => "store_rejected",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    SubjectLookup(#[from] SubjectLookupError),

    #[error("query synthesis failed: {0}")]
    Synthesis(#[source] SynthesisError),

    #[error("query execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("chart synthesis failed: {0}")]
    Chart(#[source] SynthesisError),
}

fn synthesis_kind(err: &SynthesisError) -> FailureKind {
    match err {
        SynthesisError::MalformedOutput { .. } => FailureKind::MalformedOutput,
        SynthesisError::SchemaViolation { .. } => FailureKind::SchemaViolation,
        SynthesisError::Model(_) => FailureKind::ModelUnavailable,
    }
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::EmptyQuestion => FailureKind::EmptyQuestion,
            PipelineError::SubjectLookup(_) => FailureKind::UnknownSubject,
            PipelineError::Synthesis(e) | PipelineError::Chart(e) => synthesis_kind(e),
            PipelineError::Execution(ExecutionError::InvalidQuery { .. }) => FailureKind::InvalidQuery,
            PipelineError::Execution(ExecutionError::StoreRejected(_)) => FailureKind::StoreRejected,
        }
    }

    /// Stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::EmptyQuestion => "request",
            PipelineError::SubjectLookup(_) => "identity",
            PipelineError::Synthesis(_) => "query",
            PipelineError::Execution(_) => "execute",
            PipelineError::Chart(_) => "chart",
        }
    }

    /// Message safe to return to the caller. Never carries model output,
    /// store internals or the subject id.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            FailureKind::EmptyQuestion => "Please enter a question.",
            FailureKind::UnknownSubject => "You are not allowed to run queries.",
            FailureKind::ModelUnavailable => "The language model is unavailable. Please try again later.",
            FailureKind::MalformedOutput | FailureKind::SchemaViolation => {
                "Could not understand the generated answer. Please rephrase your question."
            }
            FailureKind::InvalidQuery | FailureKind::StoreRejected => {
                "The generated query could not be run. Please rephrase your question."
            }
        }
    }

    /// Full internal detail, for logs only.
    pub fn detail(&self) -> String {
        match self {
            PipelineError::Execution(e) => e.detail(),
            other => other.to_string(),
        }
    }
}

/// Answers questions about sales data with a query, its result and a chart.
///
/// Holds no per-request state; one instance serves concurrent runs.
pub struct InsightPipeline {
    synthesizer: QuerySynthesizer,
    executor: QueryExecutor,
    charts: ChartSynthesizer,
    subjects: Arc<dyn SubjectDirectory>,
}

impl InsightPipeline {
    pub fn new(
        model: Arc<dyn LLMProvider>,
        store: Arc<dyn SalesStore>,
        subjects: Arc<dyn SubjectDirectory>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            synthesizer: QuerySynthesizer::new(model.clone(), config.clone()),
            executor: QueryExecutor::new(store),
            charts: ChartSynthesizer::new(model, config),
            subjects,
        }
    }

    /// Pipeline over an in-memory store that also resolves subjects.
    pub fn with_store(model: Arc<dyn LLMProvider>, store: Arc<InMemoryStore>, config: PipelineConfig) -> Self {
        Self::new(model, store.clone(), store, config)
    }

    /// Run a question for `subject_id`, collapsing any failure into an
    /// opaque message.
    pub async fn run(&self, question: &str, subject_id: &str) -> PipelineResult {
        self.run_detailed(question, subject_id).await.into()
    }

    /// Like [`run`](Self::run) but keeps the failure kind.
    pub async fn run_detailed(&self, question: &str, subject_id: &str) -> Result<Insight, PipelineError> {
        let outcome = self.resolve_and_run(question, subject_id).await;
        if let Err(err) = &outcome {
            tracing::warn!(
                kind = err.kind().as_str(),
                stage = err.stage(),
                detail = %err.detail(),
                "insight request failed"
            );
        }
        outcome
    }

    async fn resolve_and_run(&self, question: &str, subject_id: &str) -> Result<Insight, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }
        let ctx = self.subjects.lookup_subject(subject_id)?;
        self.run_stages(question, &ctx).await
    }

    /// Run a question for an already-resolved caller.
    pub async fn run_scoped(&self, question: &str, ctx: &AccessContext) -> Result<Insight, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }
        self.run_stages(question, ctx).await
    }

    async fn run_stages(&self, question: &str, ctx: &AccessContext) -> Result<Insight, PipelineError> {
        let query = self
            .synthesizer
            .synthesize(question, ctx)
            .await
            .map_err(PipelineError::Synthesis)?;
        let data = self.executor.execute(&query, ctx)?;
        let chart = self
            .charts
            .synthesize(&data)
            .await
            .map_err(PipelineError::Chart)?;
        Ok(Insight { query, data, chart })
    }
}

impl From<Result<Insight, PipelineError>> for PipelineResult {
    fn from(outcome: Result<Insight, PipelineError>) -> Self {
        match outcome {
            Ok(Insight { query, data, chart }) => PipelineResult::Success { query, data, chart },
            Err(err) => PipelineResult::Failure {
                message: err.user_message().to_string(),
            },
        }
    }
}
