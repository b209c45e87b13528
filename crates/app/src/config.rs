//! Application configuration file (spec §6): a TOML document at a
//! user-controlled path naming stage defaults/instances and the
//! pipelines bound to them.

use std::collections::HashMap;
use std::path::Path;

use pipeline::{RawPipelineConfig, StageConfigEntry};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
}

/// Raw shape of one `stage_configs.<Name>` entry before resolution:
/// `class`/`stage_class` select the instantiated class; every other key
/// becomes stage config, exactly as spec §6 and
/// [`pipeline::manager::resolve_stage`] expect.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStageConfigEntry {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub stage_class: Option<String>,
    #[serde(flatten)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl From<RawStageConfigEntry> for StageConfigEntry {
    fn from(raw: RawStageConfigEntry) -> Self {
        StageConfigEntry {
            class: raw.class,
            stage_class: raw.stage_class,
            config: raw.config,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineEntry {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub hotkey: String,
    pub stages: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl From<RawPipelineEntry> for RawPipelineConfig {
    fn from(raw: RawPipelineEntry) -> Self {
        RawPipelineConfig {
            name: raw.name,
            enabled: raw.enabled,
            hotkey: raw.hotkey,
            stages: raw.stages,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub stage_configs: HashMap<String, RawStageConfigEntry>,
    #[serde(default)]
    pub pipelines: Vec<RawPipelineEntry>,
    /// Worker pool size (spec §5 "configurable, default 4").
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Shutdown budget in seconds (spec §4.4 `shutdown(timeout)`).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_max_workers() -> usize {
    4
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn stage_configs(&self) -> HashMap<String, StageConfigEntry> {
        self.stage_configs
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone().into()))
            .collect()
    }

    pub fn pipeline_configs(&self) -> Vec<RawPipelineConfig> {
        self.pipelines.iter().cloned().map(Into::into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_pipeline_config() {
        let toml_str = r#"
            [[pipelines]]
            name = "basic"
            hotkey = "<pause>"
            stages = ["RecordAudio", "Transcribe", "TypeText"]
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pipelines.len(), 1);
        assert!(config.pipelines[0].enabled);
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn parses_named_stage_instance_with_class_key() {
        let toml_str = r#"
            [stage_configs.FastCorrect]
            class = "RegexCorrector"
            case_sensitive = true
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let entry = &config.stage_configs["FastCorrect"];
        assert_eq!(entry.class.as_deref(), Some("RegexCorrector"));
        assert_eq!(entry.config.get("case_sensitive"), Some(&serde_json::json!(true)));
    }
}
