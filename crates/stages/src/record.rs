//! Record Audio stage (§4.5.1), grounded on
//! `original_source/voicetype/pipeline/stages/record_audio.py`.

use std::collections::HashSet;
use std::time::Duration;

use pipeline::{IconState, PipelineContext, PipelineValue, Resource, Stage, StageFactory, StageType};
use serde::Deserialize;

use crate::backends::AudioSource;

#[derive(Debug, Deserialize)]
struct RecordAudioConfig {
    #[serde(default = "default_max_duration")]
    max_duration: f64,
    #[serde(default = "default_minimum_duration")]
    minimum_duration: f64,
    #[serde(default)]
    device_name: Option<String>,
}

fn default_max_duration() -> f64 {
    60.0
}

fn default_minimum_duration() -> f64 {
    0.25
}

pub struct RecordAudio {
    config: RecordAudioConfig,
    source: std::sync::Arc<dyn AudioSource>,
    current_recording: Option<std::path::PathBuf>,
}

impl Stage for RecordAudio {
    fn execute(&mut self, _input: PipelineValue, ctx: &mut PipelineContext) -> anyhow::Result<PipelineValue> {
        let handle = self.source.begin_capture(self.config.device_name.as_deref())?;
        ctx.icon.set(IconState::Recording);
        tracing::debug!("recording started");

        let max_duration = Duration::from_secs_f64(self.config.max_duration);
        match &ctx.trigger_event {
            Some(trigger) => {
                trigger.wait_for_completion(max_duration);
            }
            None => {
                let start = std::time::Instant::now();
                while !ctx.cancel_requested() && start.elapsed() < max_duration {
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        }

        let (path, duration) = handle.stop()?;
        tracing::debug!(duration_s = duration.as_secs_f64(), "recording stopped");
        self.current_recording = Some(path.clone());

        if duration.as_secs_f64() < self.config.minimum_duration {
            tracing::info!(
                duration_s = duration.as_secs_f64(),
                minimum_s = self.config.minimum_duration,
                "recording too short, filtering out"
            );
            return Ok(PipelineValue::OptionalPath(None));
        }

        Ok(PipelineValue::OptionalPath(Some(path)))
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        if let Some(path) = self.current_recording.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "cleaned up temp recording"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to clean up temp recording"),
            }
        }
        Ok(())
    }
}

pub struct RecordAudioFactory {
    source: std::sync::Arc<dyn AudioSource>,
}

impl RecordAudioFactory {
    pub fn new(source: std::sync::Arc<dyn AudioSource>) -> Self {
        Self { source }
    }
}

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

    fn create(&self, config: serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Box<dyn Stage>> {
        let config: RecordAudioConfig = serde_json::from_value(serde_json::Value::Object(config))?;
        Ok(Box::new(RecordAudio {
            config,
            source: self.source.clone(),
            current_recording: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{AudioSourceError, CaptureHandle};
    use pipeline::{CancelFlag, IconController, TriggerEvent};
    use std::path::PathBuf;
    use std::sync::Arc;

    struct StubHandle {
        path: PathBuf,
        duration: Duration,
    }
    impl CaptureHandle for StubHandle {
        fn stop(self: Box<Self>) -> Result<(PathBuf, Duration), AudioSourceError> {
            std::fs::write(&self.path, b"stub-wav-bytes").unwrap();
            Ok((self.path, self.duration))
        }
    }

    struct StubSource(Duration);
    impl AudioSource for StubSource {
        fn begin_capture(&self, _device_name: Option<&str>) -> Result<Box<dyn CaptureHandle>, AudioSourceError> {
            Ok(Box::new(StubHandle {
                path: std::env::temp_dir().join(format!("stages-test-{}.wav", uuid::Uuid::new_v4())),
                duration: self.0,
            }))
        }
    }

    fn context_with_completed_trigger() -> PipelineContext {
        let trigger = TriggerEvent::programmatic();
        PipelineContext::new(IconController::default(), Some(trigger), CancelFlag::new())
    }

    #[test]
    fn long_enough_recording_returns_path_and_cleanup_deletes_it() {
        let factory = RecordAudioFactory::new(Arc::new(StubSource(Duration::from_secs(1))));
        let mut stage = factory.create(serde_json::Map::new()).unwrap();
        let mut ctx = context_with_completed_trigger();

        let out = stage.execute(PipelineValue::Unit, &mut ctx).unwrap();
        let path = out.as_optional_path().cloned().expect("expected Some(path)");
        assert!(path.exists());

        stage.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn too_short_recording_returns_none_but_still_cleans_up() {
        let factory = RecordAudioFactory::new(Arc::new(StubSource(Duration::from_millis(10))));
        let mut config = serde_json::Map::new();
        config.insert("minimum_duration".to_string(), serde_json::json!(0.25));
        let mut stage = factory.create(config).unwrap();
        let mut ctx = context_with_completed_trigger();

        let out = stage.execute(PipelineValue::Unit, &mut ctx).unwrap();
        assert!(out.as_optional_path().is_none());

        stage.cleanup().unwrap();
    }

    #[test]
    fn declares_audio_input_resource() {
        let factory = RecordAudioFactory::new(Arc::new(StubSource(Duration::from_secs(1))));
        assert_eq!(factory.required_resources(), [Resource::AudioInput].into_iter().collect());
        assert_eq!(factory.input_type(), StageType::Unit);
        assert_eq!(factory.output_type(), StageType::OptionalPath);
    }
}
