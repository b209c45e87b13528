//! External collaborators the canonical stages (§4.5) delegate to: a
//! microphone source, a speech-to-text engine, and an LLM agent
//! endpoint. Each is a trait so tests can substitute a stub without
//! touching real hardware or the network.

pub mod agent_backend;
pub mod audio_source;
pub mod stt;

pub use agent_backend::{AgentBackend, AgentBackendError, AgentRequest};
pub use audio_source::{AudioSource, AudioSourceError, CaptureHandle};
pub use stt::{SttBackend, SttBackendError};
