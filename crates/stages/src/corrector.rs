//! Regex Corrector stage (§4.5.4), grounded on
//! `original_source/voicetype/pipeline/stages/correct_typos.py`.

use std::collections::HashSet;

use pipeline::{PipelineContext, PipelineValue, Resource, Stage, StageFactory, StageType};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CorrectorConfig {
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default = "default_whole_word_only")]
    whole_word_only: bool,
    #[serde(default)]
    corrections: Vec<Vec<String>>,
}

fn default_whole_word_only() -> bool {
    true
}

struct CompiledRule {
    pattern: Regex,
    replacement: String,
}

fn parse_overrides(overrides: &str, typo: &str, case_sensitive: &mut bool, whole_word_only: &mut bool) {
    for pair in overrides.split(',') {
        let pair = pair.trim();
        let Some((key, value)) = pair.split_once('=') else {
            tracing::warn!(typo, pair, "invalid override format, expected key=value, skipping");
            continue;
        };
        let value = value.trim().eq_ignore_ascii_case("true");
        match key.trim() {
            "case_sensitive" => *case_sensitive = value,
            "whole_word_only" => *whole_word_only = value,
            other => tracing::warn!(typo, option = other, "unknown override option, skipping"),
        }
    }
}

fn compile_corrections(config: &CorrectorConfig) -> Vec<CompiledRule> {
    let mut rules = Vec::new();
    for entry in &config.corrections {
        if entry.len() < 2 {
            tracing::warn!(?entry, "invalid correction entry, expected [typo, correction, overrides?], skipping");
            continue;
        }
        let typo = &entry[0];
        let replacement = entry[1].clone();
        let mut case_sensitive = config.case_sensitive;
        let mut whole_word_only = config.whole_word_only;
        if let Some(overrides) = entry.get(2) {
            parse_overrides(overrides, typo, &mut case_sensitive, &mut whole_word_only);
        }

        let escaped = regex::escape(typo);
        let pattern_str = if whole_word_only {
            format!(r"\b{escaped}\b")
        } else {
            escaped
        };
        match RegexBuilder::new(&pattern_str).case_insensitive(!case_sensitive).build() {
            Ok(pattern) => rules.push(CompiledRule { pattern, replacement }),
            Err(e) => tracing::warn!(typo, error = %e, "failed to compile correction pattern, skipping"),
        }
    }
    tracing::debug!(count = rules.len(), "loaded typo correction(s)");
    rules
}

pub struct RegexCorrector {
    rules: Vec<CompiledRule>,
}

impl Stage for RegexCorrector {
    fn execute(&mut self, input: PipelineValue, _ctx: &mut PipelineContext) -> anyhow::Result<PipelineValue> {
        let Some(text) = input.into_optional_string() else {
            tracing::debug!("no input to correct");
            return Ok(PipelineValue::OptionalString(None));
        };

        if self.rules.is_empty() {
            tracing::debug!("no corrections configured, passing through unchanged");
            return Ok(PipelineValue::OptionalString(Some(text)));
        }

        let mut result = text;
        let mut matched = 0usize;
        for rule in &self.rules {
            if rule.pattern.is_match(&result) {
                result = rule.pattern.replace_all(&result, rule.replacement.as_str()).into_owned();
                matched += 1;
            }
        }

        if matched > 0 {
            tracing::info!(matched, "applied typo correction(s)");
        } else {
            tracing::debug!("no corrections needed");
        }

        Ok(PipelineValue::OptionalString(Some(result)))
    }
}

pub struct RegexCorrectorFactory;

impl StageFactory for RegexCorrectorFactory {
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
        let config: CorrectorConfig = serde_json::from_value(serde_json::Value::Object(config))?;
        let rules = compile_corrections(&config);
        Ok(Box::new(RegexCorrector { rules }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::{CancelFlag, IconController};

    fn ctx() -> PipelineContext {
        PipelineContext::new(IconController::default(), None, CancelFlag::new())
    }

    fn stage_from(config: serde_json::Value) -> Box<dyn Stage> {
        RegexCorrectorFactory.create(config.as_object().unwrap().clone()).unwrap()
    }

    #[test]
    fn empty_corrections_is_identity() {
        let mut stage = stage_from(serde_json::json!({}));
        let out = stage
            .execute(PipelineValue::OptionalString(Some("hello world".to_string())), &mut ctx())
            .unwrap();
        assert_eq!(out.into_optional_string(), Some("hello world".to_string()));
    }

    #[test]
    fn none_input_passes_through_as_none() {
        let mut stage = stage_from(serde_json::json!({}));
        let out = stage.execute(PipelineValue::OptionalString(None), &mut ctx()).unwrap();
        assert!(out.into_optional_string().is_none());
    }

    #[test]
    fn whole_word_match_is_case_insensitive_by_default() {
        let mut stage = stage_from(serde_json::json!({
            "corrections": [["machinelearning", "machine learning"]],
        }));
        let out = stage
            .execute(PipelineValue::OptionalString(Some("I study MachineLearning".to_string())), &mut ctx())
            .unwrap();
        assert_eq!(out.into_optional_string(), Some("I study machine learning".to_string()));
    }

    #[test]
    fn per_rule_case_sensitive_override_is_respected() {
        let mut stage = stage_from(serde_json::json!({
            "corrections": [["Python", "python", "case_sensitive=true"]],
        }));
        let out = stage
            .execute(PipelineValue::OptionalString(Some("python and Python".to_string())), &mut ctx())
            .unwrap();
        assert_eq!(out.into_optional_string(), Some("python and python".to_string()));
    }

    #[test]
    fn whole_word_only_does_not_match_inside_a_longer_word() {
        let mut stage = stage_from(serde_json::json!({
            "corrections": [["cat", "dog"]],
        }));
        let out = stage
            .execute(PipelineValue::OptionalString(Some("concatenate".to_string())), &mut ctx())
            .unwrap();
        assert_eq!(out.into_optional_string(), Some("concatenate".to_string()));
    }
}
