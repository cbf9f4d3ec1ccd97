//! Speech synthesis endpoint client.
//!
//! The companion backend exposes a plain HTTP TTS endpoint: one request
//! per segment, raw audio bytes back (usually mp3, sometimes wav). The
//! endpoint may legitimately return zero-length or undecodable bytes;
//! empty bodies are reported as synthesis failures here, undecodable
//! bytes are the decode chain's problem.

use crate::config::TtsConfig;
use crate::emotion::Emotion;
use crate::error::{CompanionError, Result};
use std::io::Read;
use std::time::Duration;
use tracing::debug;

/// Synthesizer for one speakable segment.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with the given emotion style, returning raw
    /// encoded audio bytes.
    async fn synthesize(&self, text: &str, emotion: Emotion) -> Result<Vec<u8>>;
}

/// HTTP implementation of [`SpeechSynthesizer`].
pub struct HttpSynthesizer {
    agent: ureq::Agent,
    config: TtsConfig,
}

impl HttpSynthesizer {
    #[must_use]
    pub fn new(config: &TtsConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build();
        Self {
            agent,
            config: config.clone(),
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_url.trim_end_matches('/');
        format!("{base}/api/speech/tts/generate/")
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, emotion: Emotion) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "text": text,
            "voice_id": self.config.voice_id,
            "emotion": emotion.tts_style(),
        });
        let body_str = serde_json::to_string(&body)
            .map_err(|e| CompanionError::Synthesis(format!("request serialization failed: {e}")))?;

        let url = self.endpoint();
        let agent = self.agent.clone();

        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let response = agent
                .post(&url)
                .set("Content-Type", "application/json")
                .set("Accept", "*/*")
                .send_string(&body_str)
                .map_err(|e| CompanionError::Synthesis(format!("TTS request failed: {e}")))?;

            let mut bytes = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut bytes)
                .map_err(|e| CompanionError::Synthesis(format!("TTS body read failed: {e}")))?;
            Ok(bytes)
        })
        .await
        .map_err(|e| CompanionError::Synthesis(format!("TTS task panicked: {e}")))??;

        if bytes.is_empty() {
            return Err(CompanionError::Synthesis("TTS returned empty audio".to_owned()));
        }

        debug!("synthesized {} bytes for {} chars", bytes.len(), text.chars().count());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_text_voice_and_emotion_style() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/speech/tts/generate/"))
            .and(body_json_string(
                r#"{"emotion":"neutral","text":"好的。","voice_id":"v1"}"#,
            ))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xFB, 0x30, 0xC0]))
            .mount(&server)
            .await;

        let config = TtsConfig {
            api_url: server.uri(),
            voice_id: "v1".to_owned(),
            ..TtsConfig::default()
        };
        let synth = HttpSynthesizer::new(&config);

        // Relaxed maps onto the neutral TTS style.
        let bytes = synth.synthesize("好的。", Emotion::Relaxed).await.unwrap();
        assert_eq!(bytes, vec![0xFF, 0xFB, 0x30, 0xC0]);
    }

    #[tokio::test]
    async fn empty_body_is_a_synthesis_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::new()))
            .mount(&server)
            .await;

        let config = TtsConfig {
            api_url: server.uri(),
            ..TtsConfig::default()
        };
        let synth = HttpSynthesizer::new(&config);

        let err = synth.synthesize("好的。", Emotion::Neutral).await.unwrap_err();
        assert!(matches!(err, CompanionError::Synthesis(_)));
    }
}
