//! Typed stage registry (spec §4.2).

use std::collections::{HashMap, HashSet};

use crate::error::RegistryError;
use crate::resource::Resource;
use crate::stage::Stage;
use crate::value::StageType;

/// A factory knows how to build one stage class from its config mapping
/// and declares the type/resource identity the registry checks against.
pub trait StageFactory: Send + Sync {
    fn input_type(&self) -> StageType;
    fn output_type(&self) -> StageType;
    fn required_resources(&self) -> HashSet<Resource>;
    fn create(&self, config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>>;
}

/// Everything the registry knows about a stage class, immutable once
/// registered.
pub struct StageDefinition {
    pub name: String,
    pub input_type: StageType,
    pub output_type: StageType,
    pub required_resources: HashSet<Resource>,
    factory: Box<dyn StageFactory>,
}

impl StageDefinition {
    pub fn create(&self, config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>> {
        self.factory.create(config)
    }
}

/// Holds typed stage definitions keyed by stage-class name; validates
/// pipelines against them. Registration is monotonic and happens before
/// any pipeline is loaded (spec §4.2 invariants).
#[derive(Default)]
pub struct StageRegistry {
    definitions: HashMap<String, StageDefinition>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        input_type: StageType,
        output_type: StageType,
        required_resources: HashSet<Resource>,
        factory: Box<dyn StageFactory>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.definitions.contains_key(&name) {
            return Err(RegistryError::DuplicateStageClass(name));
        }
        if factory.input_type() != input_type {
            return Err(RegistryError::FactoryInputTypeMismatch {
                name,
                declared: factory.input_type(),
                expected: input_type,
            });
        }
        if factory.output_type() != output_type {
            return Err(RegistryError::FactoryOutputTypeMismatch {
                name,
                declared: factory.output_type(),
                expected: output_type,
            });
        }
        self.definitions.insert(
            name.clone(),
            StageDefinition {
                name,
                input_type,
                output_type,
                required_resources,
                factory,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&StageDefinition, RegistryError> {
        self.definitions
            .get(name)
            .ok_or_else(|| RegistryError::UnknownStageClass(name.to_string()))
    }

    /// Fails if empty, if any name is unknown, or if adjacent stages'
    /// output/input types differ. Pure function of the registry and the
    /// input list.
    pub fn validate(&self, ordered_stage_class_names: &[String]) -> Result<(), RegistryError> {
        if ordered_stage_class_names.is_empty() {
            return Err(RegistryError::EmptyPipeline);
        }
        let defs: Vec<&StageDefinition> = ordered_stage_class_names
            .iter()
            .map(|n| self.lookup(n))
            .collect::<Result<_, _>>()?;
        for (i, pair) in defs.windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            if a.output_type != b.input_type {
                return Err(RegistryError::TypeMismatch {
                    index: i,
                    class: a.name.clone(),
                    output: a.output_type,
                    next_index: i + 1,
                    next_class: b.name.clone(),
                    input: b.input_type,
                });
            }
        }
        Ok(())
    }

    /// Union of every named stage's declared required resources
    /// (spec §4.1 `required_resources`).
    pub fn required_resources(&self, stage_class_names: &[String]) -> Result<HashSet<Resource>, RegistryError> {
        let mut out = HashSet::new();
        for name in stage_class_names {
            out.extend(self.lookup(name)?.required_resources.iter().copied());
        }
        Ok(out)
    }
}
