//! Chart synthesis: result set → Chart.js configuration.

use std::sync::Arc;

use serde_json::Value;

use crate::config::PipelineConfig;
use crate::llm::LLMProvider;
use crate::prompts::{render_chart_prompt, CHART_SYSTEM_PROMPT};
use crate::synthesis::{complete_json, SynthesisError};
use crate::{ChartSpec, ResultSet};

pub struct ChartSynthesizer {
    model: Arc<dyn LLMProvider>,
    config: PipelineConfig,
}

impl ChartSynthesizer {
    pub fn new(model: Arc<dyn LLMProvider>, config: PipelineConfig) -> Self {
        Self { model, config }
    }

    /// Ask the model for a chart rendering `data`.
    ///
    /// The parsed object is passed through as-is; nothing checks that it is
    /// renderable.
    pub async fn synthesize(&self, data: &ResultSet) -> Result<ChartSpec, SynthesisError> {
        let shown = data.len().min(self.config.chart_max_rows);
        let omitted = data.len() - shown;
        let rows: Vec<Value> = data[..shown]
            .iter()
            .cloned()
            .map(Value::Object)
            .collect();
        let data_json = format!("{:#}", Value::Array(rows));
        let prompt = render_chart_prompt(&data_json, omitted);

        let chart = complete_json(
            self.model.as_ref(),
            "chart",
            CHART_SYSTEM_PROMPT,
            &prompt,
            &self.config,
            |value| Ok(ChartSpec(value)),
        )
        .await?;

        tracing::info!(
            rows = data.len(),
            omitted,
            chart_type = chart.chart_type().unwrap_or("?"),
            "synthesized chart"
        );
        Ok(chart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockModel;
    use serde_json::json;

    fn rows(n: usize) -> ResultSet {
        (0..n)
            .map(|i| {
                let mut record = sales_insight_store::Record::new();
                record.insert("n".to_string(), json!(i));
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn passes_chart_through_opaquely() {
        let model = Arc::new(MockModel::scripted([
            "```json\n{\"type\":\"doughnut\",\"data\":{\"labels\":[\"a\"],\"datasets\":[]},\"extra\":[1]}\n```",
        ]));
        let charts = ChartSynthesizer::new(model.clone(), PipelineConfig::default());
        let chart = charts.synthesize(&rows(1)).await.unwrap();
        assert_eq!(chart.chart_type(), Some("doughnut"));
        assert_eq!(chart.labels(), vec!["a".to_string()]);
        assert_eq!(chart.0["extra"], json!([1]));

        let request = &model.requests()[0];
        assert_eq!(request.system_prompt(), Some(CHART_SYSTEM_PROMPT));
        assert!(request.last_user_prompt().unwrap().contains("\"n\": 0"));
    }

    #[tokio::test]
    async fn unparsable_chart_is_malformed() {
        let model = Arc::new(MockModel::scripted(["new Chart(ctx, { type: 'bar' })"]));
        let charts = ChartSynthesizer::new(model, PipelineConfig::default());
        let err = charts.synthesize(&rows(2)).await.unwrap_err();
        assert!(matches!(err, SynthesisError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn large_result_sets_are_truncated_in_the_prompt() {
        let model = Arc::new(MockModel::scripted(["{\"type\":\"line\"}"]));
        let config = PipelineConfig {
            chart_max_rows: 3,
            ..Default::default()
        };
        let charts = ChartSynthesizer::new(model.clone(), config);
        charts.synthesize(&rows(10)).await.unwrap();

        let prompt = model.requests()[0].last_user_prompt().unwrap().to_string();
        assert!(prompt.contains("\"n\": 2"));
        assert!(!prompt.contains("\"n\": 3"));
        assert!(prompt.contains("7 more rows were omitted"));
    }
}
