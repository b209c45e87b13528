//! Integration tests exercising registry + manager + executor + arbiter
//! together, mirroring the end-to-end scenarios of spec §8.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::manager::{PipelineManager, RawPipelineConfig};
use crate::registry::{StageFactory, StageRegistry};
use crate::resource::Resource;
use crate::stage::{PipelineContext, Stage};
use crate::value::{PipelineValue, StageType};
use crate::PipelineExecutor;

struct RecordAudioStub;
impl Stage for RecordAudioStub {
    fn execute(&mut self, _input: PipelineValue, ctx: &mut PipelineContext) -> anyhow::Result<PipelineValue> {
        let duration = ctx
            .trigger_event
            .as_ref()
            .map(|t| t.wait_for_completion(Duration::from_secs(60)))
            .unwrap_or(true);
        if !duration {
            return Ok(PipelineValue::OptionalPath(None));
        }
        Ok(PipelineValue::OptionalPath(Some("/tmp/fake-recording.wav".into())))
    }
}

struct RecordAudioFactory;
impl StageFactory for RecordAudioFactory {
    fn input_type(&self) -> StageType {
        StageType::Unit
    }
    fn output_type(&self) -> StageType {
        StageType::OptionalPath
    }
    fn required_resources(&self) -> HashSet<Resource> {
        [Resource::AudioInput].into_iter().collect()
    }
    fn create(&self, _config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(RecordAudioStub))
    }
}

struct TranscribeStub;
impl Stage for TranscribeStub {
    fn execute(&mut self, input: PipelineValue, _ctx: &mut PipelineContext) -> anyhow::Result<PipelineValue> {
        match input.as_optional_path() {
            Some(_) => Ok(PipelineValue::OptionalString(Some("hello world".to_string()))),
            None => Ok(PipelineValue::OptionalString(None)),
        }
    }
}

struct TranscribeFactory;
impl StageFactory for TranscribeFactory {
    fn input_type(&self) -> StageType {
        StageType::OptionalPath
    }
    fn output_type(&self) -> StageType {
        StageType::OptionalString
    }
    fn required_resources(&self) -> HashSet<Resource> {
        HashSet::new()
    }
    fn create(&self, _config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(TranscribeStub))
    }
}

static TYPED_TEXT: Mutex<Vec<String>> = Mutex::new(Vec::new());

struct TypeTextStub;
impl Stage for TypeTextStub {
    fn execute(&mut self, input: PipelineValue, _ctx: &mut PipelineContext) -> anyhow::Result<PipelineValue> {
        if let Some(text) = input.into_optional_string() {
            TYPED_TEXT.lock().unwrap().push(text);
        }
        Ok(PipelineValue::Unit)
    }
}

struct TypeTextFactory;
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
    fn create(&self, _config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>> {
        Ok(Box::new(TypeTextStub))
    }
}

fn stub_registry() -> Arc<StageRegistry> {
    let mut reg = StageRegistry::new();
    reg.register(
        "RecordAudio",
        StageType::Unit,
        StageType::OptionalPath,
        [Resource::AudioInput].into_iter().collect(),
        Box::new(RecordAudioFactory),
    )
    .unwrap();
    reg.register(
        "Transcribe",
        StageType::OptionalPath,
        StageType::OptionalString,
        HashSet::new(),
        Box::new(TranscribeFactory),
    )
    .unwrap();
    reg.register(
        "TypeText",
        StageType::OptionalString,
        StageType::Unit,
        [Resource::Keyboard].into_iter().collect(),
        Box::new(TypeTextFactory),
    )
    .unwrap();
    Arc::new(reg)
}

/// Scenario 1, "Basic push-to-talk" (spec §8): record -> transcribe ->
/// type, ending with a single injected string and no resources held.
#[test]
fn basic_push_to_talk() {
    TYPED_TEXT.lock().unwrap().clear();
    let registry = stub_registry();
    let executor = PipelineExecutor::new(4);
    let mut manager = PipelineManager::new(Arc::clone(&registry), executor);

    manager
        .load(
            &[RawPipelineConfig {
                name: "basic".into(),
                enabled: true,
                hotkey: "<pause>".into(),
                stages: vec!["RecordAudio".into(), "Transcribe".into(), "TypeText".into()],
            }],
            &HashMap::new(),
        )
        .unwrap();

    let trigger = crate::stage::TriggerEvent::hotkey("<pause>");
    trigger.latch().complete();

    let run_id = manager
        .trigger_by_hotkey("<pause>", Some(trigger))
        .unwrap()
        .expect("dispatch should succeed");

    manager.shutdown(Duration::from_secs(2)).unwrap();

    assert_eq!(*TYPED_TEXT.lock().unwrap(), vec!["hello world".to_string()]);
    let _ = run_id;
}

/// Scenario 3, "Hotkey conflict at load" (spec §8).
#[test]
fn hotkey_conflict_at_load_is_rejected() {
    let registry = stub_registry();
    let executor = PipelineExecutor::new(4);
    let mut manager = PipelineManager::new(registry, executor);

    let result = manager.load(
        &[
            RawPipelineConfig {
                name: "p1".into(),
                enabled: true,
                hotkey: "<pause>".into(),
                stages: vec!["RecordAudio".into()],
            },
            RawPipelineConfig {
                name: "p2".into(),
                enabled: true,
                hotkey: "<pause>".into(),
                stages: vec!["RecordAudio".into()],
            },
        ],
        &HashMap::new(),
    );
    assert!(result.is_err());
}

/// Scenario 5, "Same-resource refusal" (spec §8): triggering a second
/// pipeline that needs an already-held resource is refused at dispatch,
/// not queued.
#[test]
fn same_resource_refusal() {
    let registry = stub_registry();
    let executor = PipelineExecutor::new(4);

    let held = executor
        .arbiter()
        .acquire(uuid::Uuid::new_v4(), &[Resource::Keyboard].into_iter().collect());
    assert!(held);

    let mut manager = PipelineManager::new(Arc::clone(&registry), executor);
    manager
        .load(
            &[RawPipelineConfig {
                name: "types".into(),
                enabled: true,
                hotkey: "<f9>".into(),
                stages: vec!["TypeText".into()],
            }],
            &HashMap::new(),
        )
        .unwrap();

    let run_id = manager.trigger_by_name("types", None).unwrap();
    assert!(run_id.is_none());
}
