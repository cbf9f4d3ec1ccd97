//! Runtime events emitted by the pipeline for UI and observability.
//!
//! Kept lightweight so stages can emit without blocking audio paths.
//! Any number of surfaces (terminal, avatar viewer, remote relay) can
//! subscribe to the same broadcast channel; the pipeline does not know
//! which, if any, exist.

use crate::emotion::Emotion;
use uuid::Uuid;

/// Events that describe what the pipeline is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A turn was accepted; the user entry is already in the transcript.
    TurnStarted { turn_id: Uuid, user_text: String },
    /// Cumulative assistant reply text (drives the typewriter transcript
    /// view and the subtitle view).
    AssistantTranscript { text: String },
    /// The stream switched to a new emotion label.
    EmotionChanged { emotion: Emotion },
    /// An utterance began playing.
    UtteranceStarted { sequence: u64, emotion: Emotion },
    /// An utterance finished playing (or was skipped).
    UtteranceFinished { sequence: u64 },
    /// Best-effort mouth aperture in `0.0..=1.0` while speech plays.
    ///
    /// Intended for driving the avatar's mouth blend shape.
    MouthLevel { openness: f32 },
    /// The turn completed; all utterances are done.
    TurnCompleted { turn_id: Uuid },
    /// The turn failed; an apology entry replaced any partial reply.
    TurnFailed { turn_id: Uuid },
}
