//! Message and state types passed between pipeline stages.

use crate::emotion::Emotion;
use uuid::Uuid;

/// One frame from the streaming reply endpoint.
///
/// Frame boundaries are transport artifacts; a frame can carry half a
/// word or three sentences, and its optional emotion label applies to
/// the text from this frame onward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    /// Text delta (may be empty on pure control frames).
    pub text: String,
    /// Emotion label accompanying this delta, if the stream sent one.
    pub emotion: Option<Emotion>,
    /// Whether this is the terminal frame of the reply.
    pub is_final: bool,
}

impl ReplyFrame {
    /// A plain text delta.
    #[must_use]
    pub fn delta(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            emotion: None,
            is_final: false,
        }
    }

    /// The terminal frame.
    #[must_use]
    pub fn end() -> Self {
        Self {
            text: String::new(),
            emotion: None,
            is_final: true,
        }
    }
}

/// A speakable chunk of the reply, ready for synthesis.
///
/// Immutable once created; `sequence` is strictly increasing per turn
/// and defines the required playback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub sequence: u64,
    pub text: String,
    pub emotion: Emotion,
}

/// Lifecycle of one utterance inside the speech sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceState {
    Queued,
    Synthesizing,
    Playing,
    Done,
    SynthesisFailed,
}

/// Terminal result reported back to the orchestrator per utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceOutcome {
    /// Audio played to completion.
    Played,
    /// Synthesis failed; the chunk was skipped without blocking the rest
    /// of the reply.
    Skipped,
}

/// Lifecycle of a chat turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnStatus {
    #[default]
    Idle,
    AwaitingStream,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

impl TurnStatus {
    /// Whether a new turn must be rejected right now.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            TurnStatus::AwaitingStream | TurnStatus::Streaming | TurnStatus::Finalizing
        )
    }
}

/// The single live turn, owned exclusively by the orchestrator task.
#[derive(Debug)]
pub struct ChatTurn {
    pub id: Uuid,
    pub user_text: String,
    /// Full reply text received so far (drives the transcript).
    pub accumulated_reply: String,
    /// Rolling buffer of text not yet segmented into speech.
    pub leftover_tail: String,
    /// Current emotion label for newly flushed segments.
    pub emotion: Emotion,
    pub status: TurnStatus,
}

impl ChatTurn {
    #[must_use]
    pub fn new(user_text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_text: user_text.to_owned(),
            accumulated_reply: String::new(),
            leftover_tail: String::new(),
            emotion: Emotion::Neutral,
            status: TurnStatus::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_covers_exactly_the_in_flight_states() {
        assert!(TurnStatus::AwaitingStream.is_busy());
        assert!(TurnStatus::Streaming.is_busy());
        assert!(TurnStatus::Finalizing.is_busy());
        assert!(!TurnStatus::Idle.is_busy());
        assert!(!TurnStatus::Completed.is_busy());
        assert!(!TurnStatus::Failed.is_busy());
    }
}
