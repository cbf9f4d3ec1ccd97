//! Tomo: incremental text-to-speech synchronization for a streaming
//! virtual companion.
//!
//! The crate turns a token-streamed LLM reply into lip-synced speech
//! while the reply is still arriving:
//! Reply stream → segmentation → dedup → sequenced TTS playback
//!
//! # Architecture
//!
//! The pipeline is built from independent stages connected by async channels:
//! - **Reply stream**: SSE frames from the chat backend via `ureq`
//! - **Segmentation**: Splits the rolling reply buffer into speakable chunks
//! - **Dedup**: Drops repeated chunks within a turn
//! - **Sequencer**: Prefetches synthesis, plays strictly in order
//! - **Audio playback**: Decodes and plays via `symphonia` and `cpal`,
//!   driving a mouth-openness envelope for the avatar

pub mod audio;
pub mod avatar;
pub mod config;
pub mod dedup;
pub mod emotion;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod runtime;
pub mod segment;
pub mod transcript;
pub mod tts;

pub use avatar::{AvatarSurface, NullAvatar};
pub use config::CompanionConfig;
pub use emotion::Emotion;
pub use error::{CompanionError, Result};
pub use llm::{HttpReplySource, ReplySource};
pub use pipeline::messages::{ReplyFrame, TextSegment, TurnStatus, UtteranceOutcome};
pub use pipeline::orchestrator::ChatOrchestrator;
pub use pipeline::sequencer::SpeechSequencer;
pub use runtime::RuntimeEvent;
pub use tts::{HttpSynthesizer, SpeechSynthesizer};
