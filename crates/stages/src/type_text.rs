//! Type Text stage (§4.5.3), grounded on
//! `original_source/voicetype/pipeline/stages/type_text.py`, delegating
//! the actual injection to the `keyboard` crate's dispatcher.

use std::collections::HashSet;
use std::time::Duration;

use keyboard::{build_backend, select_backend, KeyboardBackend};
use pipeline::{IconState, PipelineContext, PipelineValue, Resource, Stage, StageFactory, StageType};
use platform::PlatformInfo;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TypeTextConfig {
    #[serde(default = "default_char_delay")]
    char_delay: f64,
    #[serde(default = "default_keyboard_backend")]
    keyboard_backend: String,
}

fn default_char_delay() -> f64 {
    0.001
}

fn default_keyboard_backend() -> String {
    "auto".to_string()
}

pub struct TypeText {
    backend: Box<dyn KeyboardBackend>,
}

impl Stage for TypeText {
    fn execute(&mut self, input: PipelineValue, ctx: &mut PipelineContext) -> anyhow::Result<PipelineValue> {
        let Some(text) = input.into_optional_string() else {
            tracing::info!("no text to type (input is none)");
            return Ok(PipelineValue::Unit);
        };

        tracing::debug!(text = %text, "typing text");
        self.backend.type_text(&text)?;
        ctx.icon.set(IconState::Idle);
        tracing::debug!("typing complete");
        Ok(PipelineValue::Unit)
    }
}

pub struct TypeTextFactory {
    platform_info: PlatformInfo,
}

impl TypeTextFactory {
    pub fn new(platform_info: PlatformInfo) -> Self {
        Self { platform_info }
    }
}

impl StageFactory for TypeTextFactory {
    fn input_type(&self) -> StageType {
        StageType::OptionalString
    }

    fn output_type(&self) -> StageType {
        StageType::Unit
    }

    fn required_resources(&self) -> HashSet<Resource> {
        [Resource::Keyboard].into_iter().collect()
    }

    fn create(&self, config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>> {
        let config: TypeTextConfig = serde_json::from_value(serde_json::Value::Object(config))?;
        let override_choice = if config.keyboard_backend == "auto" {
            None
        } else {
            Some(config.keyboard_backend.as_str())
        };
        let choice = select_backend(&self.platform_info, override_choice);
        let backend = build_backend(choice, Duration::from_secs_f64(config.char_delay));
        Ok(Box::new(TypeText { backend }))
    }
}
