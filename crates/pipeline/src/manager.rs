//! Pipeline manager: parses declared pipelines, resolves stage references,
//! detects hotkey conflicts, dispatches by name or hotkey (spec §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ManagerError, PipelineError};
use crate::executor::PipelineExecutor;
use crate::registry::StageRegistry;
use crate::resource::RunId;
use crate::stage::TriggerEvent;

/// One stage reference inside a pipeline's `stages` list, as it appears
/// in the raw config before resolution.
#[derive(Debug, Clone)]
pub struct RawStageRef {
    pub name: String,
}

/// A named instance entry under `stage_configs.<Name>`: either a direct
/// class default (`class_key` is `None`) or a named instance selecting a
/// class explicitly.
#[derive(Debug, Clone, Default)]
pub struct StageConfigEntry {
    pub class: Option<String>,
    pub stage_class: Option<String>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct RawPipelineConfig {
    pub name: String,
    pub enabled: bool,
    pub hotkey: String,
    pub stages: Vec<String>,
}

/// A single resolved stage reference: the class to instantiate plus its
/// config, after applying the §4.3 resolution rules.
#[derive(Debug, Clone)]
pub struct ResolvedStage {
    pub stage_class: String,
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// An immutable, validated pipeline, ready to run (spec §3 `PipelineDefinition`).
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    pub enabled: bool,
    pub hotkey: String,
    pub stages: Vec<ResolvedStage>,
}

impl PipelineDefinition {
    pub fn stage_class_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.stage_class.clone()).collect()
    }
}

/// Resolves one stage reference per spec §4.3's three-branch rule.
/// Rejects a `stage_configs` entry that sets both `class` and
/// `stage_class` (spec §9 open-question resolution).
fn resolve_stage(
    pipeline_name: &str,
    stage_ref: &str,
    stage_configs: &HashMap<String, StageConfigEntry>,
) -> Result<ResolvedStage, ManagerError> {
    let Some(entry) = stage_configs.get(stage_ref) else {
        // Branch 3: bare class reference, empty config.
        return Ok(ResolvedStage {
            stage_class: stage_ref.to_string(),
            config: serde_json::Map::new(),
        });
    };

    if entry.class.is_some() && entry.stage_class.is_some() {
        return Err(ManagerError::AmbiguousStageClassKey {
            pipeline: pipeline_name.to_string(),
            stage_ref: stage_ref.to_string(),
        });
    }

    match entry.class.clone().or_else(|| entry.stage_class.clone()) {
        // Branch 1: the instance carries an explicit class key.
        Some(class) => Ok(ResolvedStage {
            stage_class: class,
            config: entry.config.clone(),
        }),
        // Branch 2: the name itself is the class, merged with its default config.
        None => Ok(ResolvedStage {
            stage_class: stage_ref.to_string(),
            config: entry.config.clone(),
        }),
    }
}

pub struct PipelineManager {
    registry: Arc<StageRegistry>,
    executor: PipelineExecutor,
    pipelines: HashMap<String, PipelineDefinition>,
    hotkey_to_pipeline: HashMap<String, String>,
}

impl PipelineManager {
    pub fn new(registry: Arc<StageRegistry>, executor: PipelineExecutor) -> Self {
        Self {
            registry,
            executor,
            pipelines: HashMap::new(),
            hotkey_to_pipeline: HashMap::new(),
        }
    }

    /// Builds `name -> PipelineDefinition` and `hotkey -> name` maps.
    /// Fails loudly (and leaves no partial state) on any violation.
    pub fn load(
        &mut self,
        pipeline_configs: &[RawPipelineConfig],
        stage_configs: &HashMap<String, StageConfigEntry>,
    ) -> Result<(), ManagerError> {
        let mut pipelines = HashMap::new();
        let mut hotkey_to_pipeline: HashMap<String, String> = HashMap::new();

        for cfg in pipeline_configs {
            if pipelines.contains_key(&cfg.name) {
                return Err(ManagerError::DuplicatePipelineName(cfg.name.clone()));
            }

            let resolved: Vec<ResolvedStage> = cfg
                .stages
                .iter()
                .map(|s| resolve_stage(&cfg.name, s, stage_configs))
                .collect::<Result<_, _>>()?;

            let stage_class_names: Vec<String> =
                resolved.iter().map(|s| s.stage_class.clone()).collect();
            self.registry.validate(&stage_class_names)?;

            if cfg.enabled {
                if let Some(existing) = hotkey_to_pipeline.get(&cfg.hotkey) {
                    return Err(ManagerError::DuplicateHotkey {
                        hotkey: cfg.hotkey.clone(),
                        first: existing.clone(),
                        second: cfg.name.clone(),
                    });
                }
                hotkey_to_pipeline.insert(cfg.hotkey.clone(), cfg.name.clone());
            }

            pipelines.insert(
                cfg.name.clone(),
                PipelineDefinition {
                    name: cfg.name.clone(),
                    enabled: cfg.enabled,
                    hotkey: cfg.hotkey.clone(),
                    stages: resolved,
                },
            );
        }

        self.pipelines = pipelines;
        self.hotkey_to_pipeline = hotkey_to_pipeline;
        Ok(())
    }

    pub fn get_pipeline_by_name(&self, name: &str) -> Option<&PipelineDefinition> {
        self.pipelines.get(name)
    }

    pub fn get_pipeline_by_hotkey(&self, hotkey: &str) -> Option<&PipelineDefinition> {
        self.hotkey_to_pipeline
            .get(hotkey)
            .and_then(|name| self.pipelines.get(name))
    }

    pub fn list_pipelines(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.pipelines.values()
    }

    pub fn list_enabled_pipelines(&self) -> impl Iterator<Item = &PipelineDefinition> {
        self.pipelines.values().filter(|p| p.enabled)
    }

    pub fn trigger_by_name(
        &self,
        name: &str,
        trigger_event: Option<TriggerEvent>,
    ) -> Result<Option<RunId>, PipelineError> {
        let Some(def) = self.pipelines.get(name) else {
            tracing::error!(pipeline = name, "trigger_by_name: unknown pipeline");
            return Ok(None);
        };
        if !def.enabled {
            tracing::warn!(pipeline = name, "trigger_by_name: pipeline disabled");
            return Ok(None);
        }
        self.executor.execute(&self.registry, def, trigger_event)
    }

    pub fn trigger_by_hotkey(
        &self,
        hotkey: &str,
        trigger_event: Option<TriggerEvent>,
    ) -> Result<Option<RunId>, PipelineError> {
        let Some(name) = self.hotkey_to_pipeline.get(hotkey).cloned() else {
            tracing::debug!(hotkey, "trigger_by_hotkey: no pipeline bound");
            return Ok(None);
        };
        self.trigger_by_name(&name, trigger_event)
    }

    pub fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.executor.shutdown(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use crate::value::PipelineValue;
    use std::collections::HashSet;

    struct NoopFactory {
        input: crate::value::StageType,
        output: crate::value::StageType,
    }
    impl crate::registry::StageFactory for NoopFactory {
        fn input_type(&self) -> crate::value::StageType {
            self.input
        }
        fn output_type(&self) -> crate::value::StageType {
            self.output
        }
        fn required_resources(&self) -> HashSet<Resource> {
            HashSet::new()
        }
        fn create(
            &self,
            _config: serde_json::Map<String, serde_json::Value>,
        ) -> anyhow::Result<Box<dyn crate::stage::Stage>> {
            struct S(crate::value::StageType);
            impl crate::stage::Stage for S {
                fn execute(
                    &mut self,
                    _input: PipelineValue,
                    _ctx: &mut crate::stage::PipelineContext,
                ) -> anyhow::Result<PipelineValue> {
                    Ok(match self.0 {
                        crate::value::StageType::Unit => PipelineValue::Unit,
                        crate::value::StageType::OptionalPath => PipelineValue::OptionalPath(None),
                        crate::value::StageType::OptionalString => PipelineValue::OptionalString(None),
                    })
                }
            }
            Ok(Box::new(S(self.output)))
        }
    }

    fn registry() -> Arc<StageRegistry> {
        use crate::value::StageType;
        let mut reg = StageRegistry::new();
        reg.register(
            "RecordAudio",
            StageType::Unit,
            StageType::OptionalPath,
            [Resource::AudioInput].into_iter().collect(),
            Box::new(NoopFactory {
                input: StageType::Unit,
                output: StageType::OptionalPath,
            }),
        )
        .unwrap();
        reg.register(
            "Transcribe",
            StageType::OptionalPath,
            StageType::OptionalString,
            HashSet::new(),
            Box::new(NoopFactory {
                input: StageType::OptionalPath,
                output: StageType::OptionalString,
            }),
        )
        .unwrap();
        reg.register(
            "TypeText",
            StageType::OptionalString,
            StageType::Unit,
            [Resource::Keyboard].into_iter().collect(),
            Box::new(NoopFactory {
                input: StageType::OptionalString,
                output: StageType::Unit,
            }),
        )
        .unwrap();
        Arc::new(reg)
    }

    fn manager() -> PipelineManager {
        let reg = registry();
        let executor = PipelineExecutor::new(4);
        PipelineManager::new(reg, executor)
    }

    #[test]
    fn resolves_bare_name_as_class() {
        let mut m = manager();
        let cfg = RawPipelineConfig {
            name: "basic".into(),
            enabled: true,
            hotkey: "<pause>".into(),
            stages: vec!["RecordAudio".into(), "Transcribe".into(), "TypeText".into()],
        };
        m.load(&[cfg], &HashMap::new()).unwrap();
        let def = m.get_pipeline_by_name("basic").unwrap();
        assert_eq!(
            def.stage_class_names(),
            vec!["RecordAudio", "Transcribe", "TypeText"]
        );
    }

    #[test]
    fn resolves_named_instance_with_class_key() {
        let mut m = manager();
        let mut stage_configs = HashMap::new();
        stage_configs.insert(
            "PushToTalkRecord".to_string(),
            StageConfigEntry {
                class: Some("RecordAudio".to_string()),
                stage_class: None,
                config: serde_json::Map::new(),
            },
        );
        let cfg = RawPipelineConfig {
            name: "basic".into(),
            enabled: true,
            hotkey: "<pause>".into(),
            stages: vec![
                "PushToTalkRecord".into(),
                "Transcribe".into(),
                "TypeText".into(),
            ],
        };
        m.load(&[cfg], &stage_configs).unwrap();
        let def = m.get_pipeline_by_name("basic").unwrap();
        assert_eq!(def.stage_class_names()[0], "RecordAudio");
    }

    #[test]
    fn resolves_direct_class_default_config() {
        let mut m = manager();
        let mut stage_configs = HashMap::new();
        stage_configs.insert(
            "RecordAudio".to_string(),
            StageConfigEntry {
                class: None,
                stage_class: None,
                config: serde_json::json!({"max_duration": 30}).as_object().unwrap().clone(),
            },
        );
        let cfg = RawPipelineConfig {
            name: "basic".into(),
            enabled: true,
            hotkey: "<pause>".into(),
            stages: vec!["RecordAudio".into(), "Transcribe".into(), "TypeText".into()],
        };
        m.load(&[cfg], &stage_configs).unwrap();
        let def = m.get_pipeline_by_name("basic").unwrap();
        assert_eq!(def.stages[0].config["max_duration"], 30);
    }

    #[test]
    fn rejects_both_class_keys_present() {
        let mut m = manager();
        let mut stage_configs = HashMap::new();
        stage_configs.insert(
            "Weird".to_string(),
            StageConfigEntry {
                class: Some("RecordAudio".to_string()),
                stage_class: Some("RecordAudio".to_string()),
                config: serde_json::Map::new(),
            },
        );
        let cfg = RawPipelineConfig {
            name: "basic".into(),
            enabled: true,
            hotkey: "<pause>".into(),
            stages: vec!["Weird".into()],
        };
        let err = m.load(&[cfg], &stage_configs).unwrap_err();
        assert!(matches!(err, ManagerError::AmbiguousStageClassKey { .. }));
    }

    #[test]
    fn duplicate_enabled_hotkey_fails_to_load() {
        let mut m = manager();
        let p1 = RawPipelineConfig {
            name: "p1".into(),
            enabled: true,
            hotkey: "<pause>".into(),
            stages: vec!["RecordAudio".into()],
        };
        let p2 = RawPipelineConfig {
            name: "p2".into(),
            enabled: true,
            hotkey: "<pause>".into(),
            stages: vec!["RecordAudio".into()],
        };
        let err = m.load(&[p1, p2], &HashMap::new()).unwrap_err();
        assert!(matches!(err, ManagerError::DuplicateHotkey { .. }));
    }

    #[test]
    fn disabled_pipeline_does_not_contribute_to_hotkey_map() {
        let mut m = manager();
        let p1 = RawPipelineConfig {
            name: "p1".into(),
            enabled: false,
            hotkey: "<pause>".into(),
            stages: vec!["RecordAudio".into()],
        };
        let p2 = RawPipelineConfig {
            name: "p2".into(),
            enabled: true,
            hotkey: "<pause>".into(),
            stages: vec!["RecordAudio".into()],
        };
        m.load(&[p1, p2], &HashMap::new()).unwrap();
        assert_eq!(m.get_pipeline_by_hotkey("<pause>").unwrap().name, "p2");
    }

    #[test]
    fn trigger_by_name_returns_none_for_disabled() {
        let mut m = manager();
        let p1 = RawPipelineConfig {
            name: "p1".into(),
            enabled: false,
            hotkey: "<pause>".into(),
            stages: vec!["RecordAudio".into()],
        };
        m.load(&[p1], &HashMap::new()).unwrap();
        assert!(m.trigger_by_name("p1", None).unwrap().is_none());
    }
}
