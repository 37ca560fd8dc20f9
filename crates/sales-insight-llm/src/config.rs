//! Pipeline tuning knobs.

use anyhow::{anyhow, Result};

pub const REPAIR_ATTEMPTS_ENV: &str = "SALES_INSIGHT_REPAIR_ATTEMPTS";
pub const CHART_MAX_ROWS_ENV: &str = "SALES_INSIGHT_CHART_MAX_ROWS";
pub const MAX_TOKENS_ENV: &str = "SALES_INSIGHT_LLM_MAX_TOKENS";

pub const DEFAULT_CHART_MAX_ROWS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Extra model round-trips allowed after a malformed or schema-violating
    /// response. `0` means a bad response fails the request.
    pub repair_attempts: usize,
    /// Rows of the result set embedded in the chart prompt.
    pub chart_max_rows: usize,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repair_attempts: 0,
            chart_max_rows: DEFAULT_CHART_MAX_ROWS,
            max_tokens: None,
            temperature: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            repair_attempts: env_usize(REPAIR_ATTEMPTS_ENV, 0, 0, 5)?,
            chart_max_rows: env_usize(CHART_MAX_ROWS_ENV, DEFAULT_CHART_MAX_ROWS, 1, 10_000)?,
            max_tokens: env_opt_usize(MAX_TOKENS_ENV, 16, 32_768)?,
            temperature: None,
        })
    }
}

/// Read an integer env var, clamped to `[min, max]`. Unset or blank → `default`.
pub fn env_usize(name: &str, default: usize, min: usize, max: usize) -> Result<usize> {
    Ok(env_opt_usize(name, min, max)?.unwrap_or(default))
}

fn env_opt_usize(name: &str, min: usize, max: usize) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                return Ok(None);
            }
            let parsed = v
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid {name}={v:?} (expected integer)"))?;
            Ok(Some(parsed.clamp(min, max)))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(anyhow!("failed to read {name}: {e}")),
    }
}
