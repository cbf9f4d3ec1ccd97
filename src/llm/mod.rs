//! Streaming reply endpoint client.
//!
//! The companion backend streams replies via Server-Sent Events (SSE).
//! Each `data:` line carries a JSON frame with a text delta and an
//! optional emotion label; `data: [DONE]` terminates the stream. Frame
//! boundaries are transport artifacts and never coincide with speakable
//! segment boundaries.

use crate::config::{CharacterConfig, ChatConfig};
use crate::emotion::Emotion;
use crate::error::{CompanionError, Result};
use crate::pipeline::messages::ReplyFrame;
use crate::transcript::{Role, TranscriptEntry};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Source of streaming reply frames for one turn.
///
/// Implemented over HTTP in production and by scripted mocks in tests.
#[async_trait::async_trait]
pub trait ReplySource: Send + Sync {
    /// Open the reply stream for `query`, with the prior transcript as
    /// context. Frames are delivered over `tx`; the final frame carries
    /// `is_final = true`. Dropping `tx` without a final frame signals a
    /// mid-stream failure.
    async fn open(
        &self,
        query: &str,
        history: Vec<TranscriptEntry>,
        tx: mpsc::Sender<ReplyFrame>,
    ) -> Result<()>;
}

/// HTTP SSE implementation of [`ReplySource`].
pub struct HttpReplySource {
    agent: ureq::Agent,
    config: ChatConfig,
    character: CharacterConfig,
}

impl HttpReplySource {
    #[must_use]
    pub fn new(config: &ChatConfig, character: &CharacterConfig) -> Self {
        // Per-read timeout doubles as the stream inactivity bound so a
        // stalled connection cannot pin the blocking reader thread.
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(config.stall_timeout_secs))
            .build();
        Self {
            agent,
            config: config.clone(),
            character: character.clone(),
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_url.trim_end_matches('/');
        format!("{base}/api/v1/chat/stream")
    }
}

#[async_trait::async_trait]
impl ReplySource for HttpReplySource {
    async fn open(
        &self,
        query: &str,
        history: Vec<TranscriptEntry>,
        tx: mpsc::Sender<ReplyFrame>,
    ) -> Result<()> {
        let messages: Vec<serde_json::Value> = history
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "role": match entry.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": entry.content,
                    "user_name": entry.speaker_name,
                })
            })
            .collect();

        let body = serde_json::json!({
            "query": query,
            "you_name": self.character.your_name,
            "messages": messages,
        });
        let body_str = serde_json::to_string(&body)
            .map_err(|e| CompanionError::Stream(format!("request serialization failed: {e}")))?;

        let url = self.endpoint();
        let agent = self.agent.clone();

        info!("opening reply stream: {url}");
        let response = tokio::task::spawn_blocking(move || {
            agent
                .post(&url)
                .set("Content-Type", "application/json")
                .set("Accept", "text/event-stream")
                .send_string(&body_str)
        })
        .await
        .map_err(|e| CompanionError::Stream(format!("request task panicked: {e}")))?
        .map_err(|e| CompanionError::Stream(format!("stream request failed: {e}")))?;

        // Detached blocking reader; the orchestrator owns the receiving
        // side and applies its own inactivity timeout.
        tokio::task::spawn_blocking(move || read_sse_frames(response, &tx));

        Ok(())
    }
}

/// Read SSE lines from the response body and forward frames until the
/// `[DONE]` sentinel, EOF, or a read error.
fn read_sse_frames(response: ureq::Response, tx: &mpsc::Sender<ReplyFrame>) {
    let reader = std::io::BufReader::new(response.into_reader());

    for line in std::io::BufRead::lines(reader) {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                // Dropping tx without a final frame marks the failure.
                warn!("reply stream read error: {e}");
                return;
            }
        };
        if line.is_empty() {
            continue;
        }
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            break;
        }

        let frame = match parse_frame(data) {
            Some(f) => f,
            None => {
                debug!("skipping unparseable stream frame: {data}");
                continue;
            }
        };
        if tx.blocking_send(frame).is_err() {
            // Receiver gone (turn failed or cancelled); stop reading.
            return;
        }
    }

    let _ = tx.blocking_send(ReplyFrame::end());
}

fn parse_frame(data: &str) -> Option<ReplyFrame> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    let text = value["text"].as_str().unwrap_or_default().to_owned();
    let emotion = value["emotion"]["type"].as_str().and_then(Emotion::parse);
    Some(ReplyFrame {
        text,
        emotion,
        is_final: false,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::{CharacterConfig, ChatConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body() -> String {
        concat!(
            "data: {\"text\":\"你好\"}\n\n",
            "data: {\"text\":\"，今天\",\"emotion\":{\"type\":\"happy\",\"intensity\":0.5}}\n\n",
            ": keep-alive comment\n\n",
            "data: {\"text\":\"天气真好。\"}\n\n",
            "data: [DONE]\n\n",
        )
        .to_owned()
    }

    #[tokio::test]
    async fn streams_frames_until_done_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(), "text/event-stream"))
            .mount(&server)
            .await;

        let config = ChatConfig {
            api_url: server.uri(),
            ..ChatConfig::default()
        };
        let source = HttpReplySource::new(&config, &CharacterConfig::default());

        let (tx, mut rx) = mpsc::channel(16);
        source.open("你好", Vec::new(), tx).await.unwrap();

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            let done = frame.is_final;
            frames.push(frame);
            if done {
                break;
            }
        }

        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].text, "你好");
        assert_eq!(frames[1].emotion, Some(Emotion::Happy));
        assert_eq!(frames[2].text, "天气真好。");
        assert!(frames[3].is_final);
    }

    #[tokio::test]
    async fn connection_failure_is_a_stream_error() {
        let config = ChatConfig {
            // Nothing listens here.
            api_url: "http://127.0.0.1:1".to_owned(),
            ..ChatConfig::default()
        };
        let source = HttpReplySource::new(&config, &CharacterConfig::default());

        let (tx, _rx) = mpsc::channel(16);
        let err = source.open("hi", Vec::new(), tx).await.unwrap_err();
        assert!(matches!(err, CompanionError::Stream(_)));
    }

    #[test]
    fn parse_frame_tolerates_unknown_emotions() {
        let frame = parse_frame(r#"{"text":"ok","emotion":{"type":"rage"}}"#).unwrap();
        assert_eq!(frame.text, "ok");
        assert_eq!(frame.emotion, None);
    }
}
