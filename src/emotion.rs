//! Emotion labels carried on transcript entries and utterances.
//!
//! The reply stream can attach an emotion label to any delta. The same
//! label drives both the avatar's facial expression and the `emotion`
//! parameter of the TTS request, so the two never diverge for a given
//! spoken segment.

use serde::{Deserialize, Serialize};

/// Fixed set of emotion labels understood by the avatar and the TTS
/// endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
    Relaxed,
}

impl Emotion {
    /// All known labels.
    pub const ALL: &'static [Emotion] = &[
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Fearful,
        Emotion::Disgusted,
        Emotion::Surprised,
        Emotion::Relaxed,
    ];

    /// Wire label used by both the stream frames and the TTS request.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
            Emotion::Surprised => "surprised",
            Emotion::Relaxed => "relaxed",
        }
    }

    /// Parse a wire label. Unknown labels return `None` so a misbehaving
    /// stream cannot corrupt the tracker.
    #[must_use]
    pub fn parse(s: &str) -> Option<Emotion> {
        Emotion::ALL.iter().copied().find(|e| e.as_str() == s)
    }

    /// Style name sent to the TTS endpoint. `relaxed` has no dedicated
    /// voice style and maps to `neutral`.
    #[must_use]
    pub fn tts_style(self) -> &'static str {
        match self {
            Emotion::Relaxed => "neutral",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the last emotion label seen on the reply stream.
///
/// [`observe`](EmotionTracker::observe) returns `true` exactly once per
/// distinct new label. The orchestrator reads [`current`](EmotionTracker::current)
/// *before* observing so it can flush buffered text under the old label.
#[derive(Debug, Default)]
pub struct EmotionTracker {
    current: Emotion,
}

impl EmotionTracker {
    #[must_use]
    pub fn new(initial: Emotion) -> Self {
        Self { current: initial }
    }

    /// The label the tracker currently holds.
    #[must_use]
    pub fn current(&self) -> Emotion {
        self.current
    }

    /// Adopt `new`, returning `true` if it differs from the current label.
    pub fn observe(&mut self, new: Emotion) -> bool {
        if new == self.current {
            return false;
        }
        self.current = new;
        true
    }
}
