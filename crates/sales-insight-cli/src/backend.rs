//! Language-model backend selection.
//!
//! Precedence: an explicit `--llm-*` flag, then the provider environment
//! variables (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `LOCAL_LLM_URL`).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Args;
use sales_insight_llm::{LLMProvider, MockModel};

#[derive(Args, Debug, Clone, Default)]
pub struct LlmArgs {
    /// Use the built-in mock model (canned category-sales query and chart).
    ///
    /// Choose at most one backend: `--llm-mock`, `--llm-openai`, `--llm-anthropic` or `--llm-local <url>`.
    #[arg(long, global = true)]
    pub llm_mock: bool,

    /// Use the OpenAI API (`OPENAI_API_KEY`, optional `OPENAI_BASE_URL`).
    #[arg(long, global = true)]
    pub llm_openai: bool,

    /// Use the Anthropic API (`ANTHROPIC_API_KEY`).
    #[arg(long, global = true)]
    pub llm_anthropic: bool,

    /// Use an OpenAI-compatible server at this base URL (vLLM, Ollama, ...).
    #[arg(long, global = true, value_name = "URL")]
    pub llm_local: Option<String>,

    /// Model name; defaults depend on the backend.
    #[arg(long, global = true)]
    pub llm_model: Option<String>,

    /// Provider request timeout in seconds.
    #[arg(long, global = true)]
    pub llm_timeout_secs: Option<u64>,
}

impl LlmArgs {
    fn check_exclusive(&self) -> Result<()> {
        let chosen = (self.llm_mock as usize)
            + (self.llm_openai as usize)
            + (self.llm_anthropic as usize)
            + (self.llm_local.is_some() as usize);
        if chosen > 1 {
            return Err(anyhow!(
                "choose at most one LLM backend: `--llm-mock`, `--llm-openai`, `--llm-anthropic`, or `--llm-local <url>`"
            ));
        }
        Ok(())
    }
}

pub fn build_model(args: &LlmArgs) -> Result<Arc<dyn LLMProvider>> {
    args.check_exclusive()?;
    if args.llm_mock {
        tracing::info!("using mock language model");
        return Ok(Arc::new(MockModel::demo()));
    }
    http_model(args)
}

#[cfg(any(feature = "llm-openai", feature = "llm-anthropic", feature = "llm-local"))]
fn http_model(args: &LlmArgs) -> Result<Arc<dyn LLMProvider>> {
    use sales_insight_llm::llm::providers::{
        DEFAULT_ANTHROPIC_MODEL, DEFAULT_LOCAL_MODEL, DEFAULT_OPENAI_MODEL,
    };
    use sales_insight_llm::{LLMConfig, UnifiedClient};

    let env_required = |name: &str| {
        std::env::var(name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("{name} must be set"))
    };
    let model = |default: &str| args.llm_model.clone().unwrap_or_else(|| default.to_string());

    let mut config = if args.llm_openai {
        let mut config = LLMConfig::openai(&env_required("OPENAI_API_KEY")?, &model(DEFAULT_OPENAI_MODEL));
        config.base_url = env_required("OPENAI_BASE_URL").ok();
        config
    } else if args.llm_anthropic {
        LLMConfig::anthropic(&env_required("ANTHROPIC_API_KEY")?, &model(DEFAULT_ANTHROPIC_MODEL))
    } else if let Some(url) = &args.llm_local {
        LLMConfig::local(url, &model(DEFAULT_LOCAL_MODEL))
    } else {
        let mut config = LLMConfig::from_env()?;
        if let Some(name) = &args.llm_model {
            config.model = name.clone();
        }
        config
    };
    if let Some(secs) = args.llm_timeout_secs {
        config = config.with_timeout_secs(secs);
    }

    tracing::info!(provider = ?config.provider, model = %config.model, "using language model");
    Ok(Arc::new(UnifiedClient::from_config(config)?))
}

#[cfg(not(any(feature = "llm-openai", feature = "llm-anthropic", feature = "llm-local")))]
fn http_model(_args: &LlmArgs) -> Result<Arc<dyn LLMProvider>> {
    Err(anyhow!(
        "no HTTP LLM backend compiled in; rebuild with `llm-openai`, `llm-anthropic` or `llm-local`, or pass `--llm-mock`"
    ))
}
