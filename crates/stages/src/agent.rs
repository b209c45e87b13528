//! LLM Agent stage (§4.5.5), grounded on
//! `original_source/voicetype/pipeline/stages/llm_agent.py`.

use std::collections::HashSet;
use std::time::Duration;

use pipeline::{IconState, PipelineContext, PipelineValue, Resource, Stage, StageFactory, StageType};
use serde::Deserialize;

use crate::backends::{AgentBackend, AgentRequest, HttpAgentBackend};

#[derive(Debug, Deserialize)]
struct LlmAgentConfig {
    provider: String,
    system_prompt: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    trigger_keywords: Vec<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_fallback_on_error")]
    fallback_on_error: bool,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_fallback_on_error() -> bool {
    true
}

pub struct LlmAgent {
    system_prompt: String,
    trigger_keywords: Vec<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    fallback_on_error: bool,
    backend: Box<dyn AgentBackend>,
}

impl Stage for LlmAgent {
    fn execute(&mut self, input: PipelineValue, ctx: &mut PipelineContext) -> anyhow::Result<PipelineValue> {
        let Some(text) = input.into_optional_string() else {
            tracing::info!("no text to process (input is none)");
            return Ok(PipelineValue::OptionalString(None));
        };

        if !self.trigger_keywords.is_empty() {
            let lower = text.to_lowercase();
            let found = self.trigger_keywords.iter().any(|k| lower.contains(&k.to_lowercase()));
            if !found {
                tracing::debug!(trigger_keywords = ?self.trigger_keywords, "no trigger keyword found, skipping LLM processing");
                return Ok(PipelineValue::OptionalString(Some(text)));
            }
        }

        let prior_icon = ctx.icon.get();
        ctx.icon.set(IconState::Processing);
        tracing::debug!(text = %text, "processing text through LLM");

        let result = self.backend.run(AgentRequest {
            system_prompt: &self.system_prompt,
            input: &text,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        });

        ctx.icon.set(prior_icon);

        match result {
            Ok(output) if !output.is_empty() => {
                tracing::info!("LLM processing complete");
                Ok(PipelineValue::OptionalString(Some(output)))
            }
            Ok(_) => {
                tracing::warn!("LLM returned empty response");
                Ok(PipelineValue::OptionalString(if self.fallback_on_error { Some(text) } else { None }))
            }
            Err(e) => {
                tracing::error!(error = %e, "error during LLM processing");
                Ok(PipelineValue::OptionalString(if self.fallback_on_error { Some(text) } else { None }))
            }
        }
    }
}

pub struct LlmAgentFactory;

impl StageFactory for LlmAgentFactory {
    fn input_type(&self) -> StageType {
        StageType::OptionalString
    }

    fn output_type(&self) -> StageType {
        StageType::OptionalString
    }

    fn required_resources(&self) -> HashSet<Resource> {
        HashSet::new()
    }

    fn create(&self, config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>> {
        let config: LlmAgentConfig = serde_json::from_value(serde_json::Value::Object(config))?;
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/v1/chat/completions".to_string());
        let backend = HttpAgentBackend::new(
            endpoint,
            config.provider.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_seconds),
        );
        Ok(Box::new(LlmAgent {
            system_prompt: config.system_prompt,
            trigger_keywords: config.trigger_keywords,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            fallback_on_error: config.fallback_on_error,
            backend: Box::new(backend),
        }))
    }
}
