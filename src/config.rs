//! Configuration types for the companion pipeline.

use crate::error::{CompanionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the companion pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Streaming reply endpoint settings.
    pub chat: ChatConfig,
    /// Speech synthesis endpoint settings.
    pub tts: TtsConfig,
    /// Audio playback settings.
    pub audio: AudioConfig,
    /// Character / user display names.
    pub character: CharacterConfig,
}

/// Streaming reply endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of the streaming chat endpoint.
    pub api_url: String,
    /// Seconds of stream inactivity before the turn is aborted.
    pub stall_timeout_secs: u64,
    /// Minimum buffered code points before the segmenter runs.
    pub min_segment_chars: usize,
    /// Maximum code points in a single speakable segment.
    pub max_segment_chars: usize,
    /// Capacity of the recently-spoken segment cache.
    pub dedup_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_owned(),
            stall_timeout_secs: 15,
            min_segment_chars: 15,
            max_segment_chars: 50,
            dedup_capacity: 100,
        }
    }
}

/// Speech synthesis endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Base URL of the TTS endpoint.
    pub api_url: String,
    /// Voice preset identifier sent with every request.
    pub voice_id: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Sample rate used for the silent fallback clip.
    pub fallback_sample_rate: u32,
    /// Duration of the silent fallback clip in milliseconds.
    pub fallback_silence_ms: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_owned(),
            voice_id: "default".to_owned(),
            request_timeout_secs: 30,
            fallback_sample_rate: 24_000,
            fallback_silence_ms: 300,
        }
    }
}

/// Audio playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// One-pole smoothing factor for the mouth envelope.
    ///
    /// Lower values slow the mouth response; 0.3 tracks speech
    /// amplitude without per-frame jitter.
    pub mouth_smoothing: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: None,
            mouth_smoothing: 0.3,
        }
    }
}

/// Character and user display names carried on transcript entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    /// Name shown for assistant entries and sent to the reply endpoint.
    pub character_name: String,
    /// Name shown for user entries.
    pub your_name: String,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            character_name: "AI".to_owned(),
            your_name: "User".to_owned(),
        }
    }
}

impl CompanionConfig {
    /// Load configuration from a TOML file. Missing fields fall back to
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| CompanionError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Save configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| CompanionError::Config(format!("serialize config: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}
