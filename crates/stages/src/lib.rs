//! The five canonical stage classes (§4.5) and the external backends
//! they delegate to. `register_builtin_stages` is the single entry
//! point the application wires into a fresh `StageRegistry` at startup.

pub mod agent;
pub mod backends;
pub mod corrector;
pub mod record;
pub mod transcribe;
pub mod type_text;

use std::sync::Arc;

use pipeline::{RegistryError, StageRegistry, StageType};

use crate::agent::LlmAgentFactory;
use crate::backends::{AudioSource, CpalAudioSource};
use crate::corrector::RegexCorrectorFactory;
use crate::record::RecordAudioFactory;
use crate::transcribe::TranscribeFactory;
use crate::type_text::TypeTextFactory;

/// Collaborators injected into stage factories at registration time,
/// standing in for the metadata bag the source passed stages at
/// construction (e.g. `metadata["speech_processor"]`).
pub struct StageDependencies {
    pub audio_source: Arc<dyn AudioSource>,
    pub platform_info: platform::PlatformInfo,
}

impl Default for StageDependencies {
    fn default() -> Self {
        Self {
            audio_source: Arc::new(CpalAudioSource),
            platform_info: platform::PlatformDetector::detect(),
        }
    }
}

/// Registers `RecordAudio`, `Transcribe`, `TypeText`, `RegexCorrector`,
/// and `LLMAgent` under those exact names.
pub fn register_builtin_stages(registry: &mut StageRegistry, deps: StageDependencies) -> Result<(), RegistryError> {
    registry.register(
        "RecordAudio",
        StageType::Unit,
        StageType::OptionalPath,
        [pipeline::Resource::AudioInput].into_iter().collect(),
        Box::new(RecordAudioFactory::new(deps.audio_source)),
    )?;
    registry.register(
        "Transcribe",
        StageType::OptionalPath,
        StageType::OptionalString,
        std::collections::HashSet::new(),
        Box::new(TranscribeFactory),
    )?;
    registry.register(
        "TypeText",
        StageType::OptionalString,
        StageType::Unit,
        [pipeline::Resource::Keyboard].into_iter().collect(),
        Box::new(TypeTextFactory::new(deps.platform_info)),
    )?;
    registry.register(
        "RegexCorrector",
        StageType::OptionalString,
        StageType::OptionalString,
        std::collections::HashSet::new(),
        Box::new(RegexCorrectorFactory),
    )?;
    registry.register(
        "LLMAgent",
        StageType::OptionalString,
        StageType::OptionalString,
        std::collections::HashSet::new(),
        Box::new(LlmAgentFactory),
    )?;
    Ok(())
}
