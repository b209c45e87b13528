//! Microphone capture backing the Record Audio stage (§4.5.1), grounded
//! on `mark10112-voice-to-text`'s `audio::capture` module: the same
//! cpal host/device/stream lifecycle, adapted to write straight to a
//! temporary WAV file instead of forwarding chunks over a channel.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hound::{WavSpec, WavWriter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioSourceError {
    #[error("no input device named {0:?} found")]
    DeviceNotFound(Option<String>),
    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to enumerate input devices: {0}")]
    DevicesError(#[from] cpal::DevicesError),
    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

/// A microphone, abstracted so `RecordAudio` can be tested without
/// hardware.
pub trait AudioSource: Send + Sync {
    fn begin_capture(&self, device_name: Option<&str>) -> Result<Box<dyn CaptureHandle>, AudioSourceError>;
}

/// An in-progress recording. Consuming `stop` finalizes the underlying
/// file and reports how long the capture ran.
pub trait CaptureHandle: Send {
    fn stop(self: Box<Self>) -> Result<(PathBuf, Duration), AudioSourceError>;
}

/// Default `AudioSource`: the system default (or named) input device via
/// `cpal`, writing 32-bit float PCM to a temp WAV file via `hound`.
#[derive(Default)]
pub struct CpalAudioSource;

impl AudioSource for CpalAudioSource {
    fn begin_capture(&self, device_name: Option<&str>) -> Result<Box<dyn CaptureHandle>, AudioSourceError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| AudioSourceError::DeviceNotFound(Some(name.to_string())))?,
            None => host
                .default_input_device()
                .ok_or(AudioSourceError::DeviceNotFound(None))?,
        };

        let supported = device.default_input_config()?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config: cpal::StreamConfig = supported.into();

        let path = std::env::temp_dir().join(format!("voice-pipeline-{}.wav", uuid::Uuid::new_v4()));
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = WavWriter::create(&path, spec)?;
        let writer = Arc::new(Mutex::new(Some(writer)));
        let frame_count = Arc::new(Mutex::new(0u64));

        let writer_cb = Arc::clone(&writer);
        let frame_count_cb = Arc::clone(&frame_count);
        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut guard) = writer_cb.lock() {
                    if let Some(w) = guard.as_mut() {
                        for &sample in data {
                            let _ = w.write_sample(sample);
                        }
                    }
                }
                if let Ok(mut count) = frame_count_cb.lock() {
                    *count += data.len() as u64 / channels.max(1) as u64;
                }
            },
            |err: cpal::StreamError| {
                tracing::error!(error = %err, "cpal stream error during recording");
            },
            None,
        )?;
        stream.play()?;

        Ok(Box::new(CpalCaptureHandle {
            stream,
            writer,
            frame_count,
            sample_rate,
            path,
        }))
    }
}

struct CpalCaptureHandle {
    stream: cpal::Stream,
    writer: Arc<Mutex<Option<WavWriter<std::io::BufWriter<std::fs::File>>>>>,
    frame_count: Arc<Mutex<u64>>,
    sample_rate: u32,
    path: PathBuf,
}

// `cpal::Stream` is not declared `Send` on every platform's backend, but
// it never leaves the worker thread that creates and drops it — a
// `RecordAudio` run owns its handle start to finish on one thread. The
// bound only exists because `Stage: Send` is a static requirement of the
// trait object, not because this value is ever moved across threads.
unsafe impl Send for CpalCaptureHandle {}

impl CaptureHandle for CpalCaptureHandle {
    fn stop(self: Box<Self>) -> Result<(PathBuf, Duration), AudioSourceError> {
        drop(self.stream);
        if let Some(w) = self.writer.lock().unwrap().take() {
            w.finalize()?;
        }
        let frames = *self.frame_count.lock().unwrap();
        let duration = Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64);
        Ok((self.path, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubHandle {
        path: PathBuf,
        duration: Duration,
    }

    impl CaptureHandle for StubHandle {
        fn stop(self: Box<Self>) -> Result<(PathBuf, Duration), AudioSourceError> {
            Ok((self.path, self.duration))
        }
    }

    struct StubAudioSource;
    impl AudioSource for StubAudioSource {
        fn begin_capture(&self, _device_name: Option<&str>) -> Result<Box<dyn CaptureHandle>, AudioSourceError> {
            Ok(Box::new(StubHandle {
                path: PathBuf::from("/tmp/stub.wav"),
                duration: Duration::from_millis(500),
            }))
        }
    }

    #[test]
    fn stub_source_reports_requested_duration() {
        let source = StubAudioSource;
        let handle = source.begin_capture(None).unwrap();
        let (path, duration) = handle.stop().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/stub.wav"));
        assert_eq!(duration, Duration::from_millis(500));
    }
}
