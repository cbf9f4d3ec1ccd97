//! Audio playback to system speakers via cpal, with live mouth envelope.

use super::DecodedAudio;
use super::envelope::MouthEnvelope;
use super::envelope::peak_amplitude;
use crate::config::AudioConfig;
use crate::error::{CompanionError, Result};
use crate::runtime::RuntimeEvent;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info};

/// Continuously-queryable mouth aperture, shared with the avatar viewer.
///
/// Stores the latest openness as f32 bits; reads never block the audio
/// callback.
#[derive(Debug, Clone, Default)]
pub struct MouthHandle(Arc<AtomicU32>);

impl MouthHandle {
    /// Latest mouth openness in `0.0..=1.0`.
    #[must_use]
    pub fn openness(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Plays one decoded utterance to completion.
#[async_trait::async_trait]
pub trait UtterancePlayer: Send + Sync {
    /// Play the audio, resolving when playback finishes naturally.
    async fn play(&self, audio: DecodedAudio) -> Result<()>;
}

/// cpal-backed implementation of [`UtterancePlayer`].
pub struct CpalPlayer {
    device: cpal::Device,
    mouth: MouthHandle,
    smoothing: f32,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
}

impl CpalPlayer {
    /// Create a new playback instance against the configured (or default)
    /// output device.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching output device is available.
    pub fn new(
        config: &AudioConfig,
        runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| CompanionError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    CompanionError::Audio(format!("output device '{name}' not found"))
                })?
        } else {
            host.default_output_device()
                .ok_or_else(|| CompanionError::Audio("no default output device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        Ok(Self {
            device,
            mouth: MouthHandle::default(),
            smoothing: config.mouth_smoothing,
            runtime_tx,
        })
    }

    /// Handle the avatar viewer polls for the mouth blend shape.
    #[must_use]
    pub fn mouth(&self) -> MouthHandle {
        self.mouth.clone()
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| CompanionError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait::async_trait]
impl UtterancePlayer for CpalPlayer {
    async fn play(&self, audio: DecodedAudio) -> Result<()> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let device = self.device.clone();
        let mouth = self.mouth.clone();
        let smoothing = self.smoothing;
        let runtime_tx = self.runtime_tx.clone();

        tokio::task::spawn_blocking(move || {
            play_blocking(&device, &audio, &mouth, smoothing, runtime_tx.as_ref())
        })
        .await
        .map_err(|e| CompanionError::Audio(format!("playback task panicked: {e}")))??;

        Ok(())
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

fn play_blocking(
    device: &cpal::Device,
    audio: &DecodedAudio,
    mouth: &MouthHandle,
    smoothing: f32,
    runtime_tx: Option<&broadcast::Sender<RuntimeEvent>>,
) -> Result<()> {
    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: audio.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples: audio.samples.clone(),
        position: 0,
        finished: false,
    }));

    let buffer_clone = Arc::clone(&buffer);
    let mouth_cb = mouth.clone();
    let level_tx = runtime_tx.cloned();
    let mut envelope = MouthEnvelope::new(smoothing);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer_clone.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };

                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
                drop(buf);

                let openness = envelope.update(peak_amplitude(data));
                mouth_cb.store(openness);
                if let Some(tx) = &level_tx {
                    let _ = tx.send(RuntimeEvent::MouthLevel { openness });
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| CompanionError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| CompanionError::Audio(format!("failed to start output stream: {e}")))?;

    // Wait for playback to finish.
    loop {
        std::thread::sleep(std::time::Duration::from_millis(10));
        let buf = buffer
            .lock()
            .map_err(|e| CompanionError::Audio(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            break;
        }
    }

    drop(stream);

    // Shut the mouth once the utterance ends.
    mouth.store(0.0);
    if let Some(tx) = runtime_tx {
        let _ = tx.send(RuntimeEvent::MouthLevel { openness: 0.0 });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn mouth_handle_roundtrips_openness() {
        let handle = MouthHandle::default();
        assert_eq!(handle.openness(), 0.0);
        handle.store(0.73);
        assert!((handle.openness() - 0.73).abs() < f32::EPSILON);
        handle.store(0.0);
        assert_eq!(handle.openness(), 0.0);
    }

    #[test]
    fn mouth_handle_clones_share_state() {
        let a = MouthHandle::default();
        let b = a.clone();
        a.store(0.4);
        assert!((b.openness() - 0.4).abs() < f32::EPSILON);
    }
}
