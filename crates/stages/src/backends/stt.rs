//! Speech-to-text backends for the Transcribe stage (§4.5.2): a local
//! `whisper-rs` model and a LiteLLM-compatible hosted HTTP endpoint.
//! The local path is grounded on `mark10112-voice-to-text`'s
//! `stt::engine::WhisperEngine`; the hosted path follows the same
//! multipart-upload shape `DovieW-tangerine-voice`'s OpenAI provider
//! uses, generalized to any LiteLLM-fronted model.

use std::path::Path;

use thiserror::Error;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

#[derive(Debug, Error)]
pub enum SttBackendError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("whisper context initialisation failed: {0}")]
    ContextInit(String),
    #[error("transcription error: {0}")]
    Transcription(String),
    #[error("request to transcription endpoint failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transcription endpoint returned an error: {0}")]
    EndpointError(String),
    #[error("failed to read audio file: {0}")]
    Io(#[from] std::io::Error),
}

/// Object-safe speech-to-text interface; both providers named in
/// §4.5.2 implement it.
pub trait SttBackend: Send + Sync {
    fn transcribe(&self, audio_path: &Path) -> Result<String, SttBackendError>;
}

/// Local `whisper-rs`-backed engine (provider = `local`).
///
/// A new `WhisperState` is created per call, so one loaded context can be
/// shared across concurrent transcribe runs without locking.
pub struct LocalWhisperBackend {
    ctx: WhisperContext,
    language: Option<String>,
    n_threads: i32,
    history: Option<String>,
}

// SAFETY: `WhisperContext` wraps a raw `whisper.cpp` context pointer and
// is not `Send`/`Sync` on its own. The model weights it points to are
// read-only after `new_with_params`, and every call into this backend
// happens from the single worker thread that owns a given pipeline run
// (see `pipeline::executor::run_worker`), never concurrently.
unsafe impl Send for LocalWhisperBackend {}
unsafe impl Sync for LocalWhisperBackend {}

impl LocalWhisperBackend {
    pub fn load(
        model_path: impl AsRef<Path>,
        language: Option<String>,
        n_threads: i32,
        history: Option<String>,
    ) -> Result<Self, SttBackendError> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(SttBackendError::ModelNotFound(path.display().to_string()));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| SttBackendError::ModelNotFound(path.display().to_string()))?;
        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| SttBackendError::ContextInit(e.to_string()))?;
        Ok(Self { ctx, language, n_threads, history })
    }
}

impl SttBackend for LocalWhisperBackend {
    fn transcribe(&self, audio_path: &Path) -> Result<String, SttBackendError> {
        let mut reader = hound::WavReader::open(audio_path)?;
        let samples: Vec<f32> = reader
            .samples::<f32>()
            .map(|s| s.unwrap_or(0.0))
            .collect();

        let mut fp = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        let lang: Option<&str> = self.language.as_deref().filter(|l| *l != "auto");
        fp.set_language(lang);
        fp.set_n_threads(self.n_threads);
        fp.set_print_progress(false);
        fp.set_print_realtime(false);
        if let Some(history) = &self.history {
            fp.set_initial_prompt(history);
        }

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SttBackendError::ContextInit(e.to_string()))?;
        state
            .full(fp, &samples)
            .map_err(|e| SttBackendError::Transcription(e.to_string()))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|e| SttBackendError::Transcription(e.to_string()))?;
        let mut text = String::new();
        for i in 0..n_segments {
            text.push_str(
                &state
                    .full_get_segment_text(i)
                    .map_err(|e| SttBackendError::Transcription(format!("segment {i}: {e}")))?,
            );
        }
        Ok(text.trim().to_string())
    }
}

/// Hosted LiteLLM-compatible transcription endpoint (provider = `litellm`).
pub struct LiteLlmSttBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    language: Option<String>,
    history: Option<String>,
}

impl LiteLlmSttBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        language: Option<String>,
        history: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::blocking::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("failed to build HTTP client"),
            endpoint: endpoint.into(),
            api_key,
            language,
            history,
        }
    }
}

impl SttBackend for LiteLlmSttBackend {
    fn transcribe(&self, audio_path: &Path) -> Result<String, SttBackendError> {
        let bytes = std::fs::read(audio_path)?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let mut form = reqwest::blocking::multipart::Form::new()
            .part("file", reqwest::blocking::multipart::Part::bytes(bytes).file_name(file_name));
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        if let Some(history) = &self.history {
            form = form.text("prompt", history.clone());
        }

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(SttBackendError::EndpointError(format!("{status}: {body}")));
        }

        #[derive(serde::Deserialize)]
        struct TranscriptionResponse {
            text: String,
        }
        let parsed: TranscriptionResponse = response.json()?;
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBackend(&'static str);
    impl SttBackend for StubBackend {
        fn transcribe(&self, _audio_path: &Path) -> Result<String, SttBackendError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn stub_backend_returns_configured_text() {
        let backend = StubBackend("hello world");
        assert_eq!(backend.transcribe(Path::new("/tmp/x.wav")).unwrap(), "hello world");
    }

    #[test]
    fn local_backend_missing_model_is_model_not_found() {
        let err = LocalWhisperBackend::load("/nonexistent/model.bin", None, 4, None).unwrap_err();
        assert!(matches!(err, SttBackendError::ModelNotFound(_)));
    }
}
