//! Conversation transcript projection.
//!
//! The transcript is the ordered list of entries the UI renders. While a
//! reply streams in, the assistant entry for the turn is mutated in place
//! with the cumulative text; it is never duplicated. The typed-subtitle
//! view is driven off the same cumulative text via
//! [`RuntimeEvent::AssistantTranscript`](crate::runtime::RuntimeEvent).

use serde::{Deserialize, Serialize};

/// Fixed apology shown when the reply stream cannot be obtained at all.
pub const APOLOGY_TEXT: &str = "抱歉，我暂时无法回应。请稍后再试。";

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One rendered line of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    /// Display name (user's name or the character's name).
    pub speaker_name: String,
}

/// Ordered transcript owned by the orchestrator.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: &str, speaker_name: &str) {
        self.entries.push(TranscriptEntry {
            role: Role::User,
            content: content.to_owned(),
            speaker_name: speaker_name.to_owned(),
        });
    }

    /// Project the cumulative reply text into the assistant entry for the
    /// current turn: update the trailing assistant entry in place, or
    /// create it if the turn has none yet.
    pub fn project_assistant(&mut self, content: &str, speaker_name: &str) {
        if let Some(last) = self.entries.last_mut()
            && last.role == Role::Assistant
        {
            last.content = content.to_owned();
            return;
        }
        self.entries.push(TranscriptEntry {
            role: Role::Assistant,
            content: content.to_owned(),
            speaker_name: speaker_name.to_owned(),
        });
    }

    /// Replace any partial reply with the fixed apology. Used when the
    /// stream fails; no partial text is kept.
    pub fn apologize(&mut self, speaker_name: &str) {
        self.project_assistant(APOLOGY_TEXT, speaker_name);
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Snapshot of all entries before the in-flight user message, used as
    /// context for the reply request.
    #[must_use]
    pub fn prior_context(&self) -> Vec<TranscriptEntry> {
        match self.entries.split_last() {
            Some((last, rest)) if last.role == Role::User => rest.to_vec(),
            _ => self.entries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn assistant_entry_is_mutated_in_place() {
        let mut t = Transcript::new();
        t.push_user("你好", "User");
        t.project_assistant("你", "AI");
        t.project_assistant("你好，", "AI");
        t.project_assistant("你好，今天天气真好。", "AI");

        assert_eq!(t.entries().len(), 2);
        assert_eq!(t.entries()[1].content, "你好，今天天气真好。");
        assert_eq!(t.entries()[1].speaker_name, "AI");
    }

    #[test]
    fn apology_replaces_partial_reply() {
        let mut t = Transcript::new();
        t.push_user("hi", "User");
        t.project_assistant("partial tex", "AI");
        t.apologize("AI");

        assert_eq!(t.entries().len(), 2);
        assert_eq!(t.entries()[1].content, APOLOGY_TEXT);
    }

    #[test]
    fn prior_context_excludes_in_flight_user_message() {
        let mut t = Transcript::new();
        t.push_user("第一句", "User");
        t.project_assistant("回答一。", "AI");
        t.push_user("第二句", "User");

        let ctx = t.prior_context();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[1].role, Role::Assistant);
    }

    #[test]
    fn consecutive_turns_each_get_their_own_assistant_entry() {
        let mut t = Transcript::new();
        t.push_user("one", "User");
        t.project_assistant("answer one", "AI");
        t.push_user("two", "User");
        t.project_assistant("answer two", "AI");

        assert_eq!(t.entries().len(), 4);
        assert_eq!(t.entries()[1].content, "answer one");
        assert_eq!(t.entries()[3].content, "answer two");
    }
}
