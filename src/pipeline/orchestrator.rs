//! Chat turn orchestration.
//!
//! One turn at a time: accept the user's text, open the reply stream,
//! segment the accumulating reply into speakable chunks, and hand them
//! to the [`SpeechSequencer`] in order. The turn lock is the
//! [`TurnStatus`]; a second `start_turn` while a turn is in flight is
//! rejected synchronously, before any state is touched.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CompanionConfig;
use crate::dedup::DedupGuard;
use crate::emotion::{Emotion, EmotionTracker};
use crate::error::{CompanionError, Result};
use crate::llm::ReplySource;
use crate::pipeline::messages::{ChatTurn, ReplyFrame, TextSegment, TurnStatus, UtteranceOutcome};
use crate::pipeline::sequencer::SpeechSequencer;
use crate::runtime::RuntimeEvent;
use crate::segment::{
    self, SegmentRules, ends_with_terminal, segment_buffer, strip_stage_directions,
};
use crate::transcript::{APOLOGY_TEXT, Transcript, TranscriptEntry};

/// Drives chat turns end to end. Cheap to clone-by-Arc internally; one
/// instance per companion session.
pub struct ChatOrchestrator {
    config: CompanionConfig,
    source: Arc<dyn ReplySource>,
    sequencer: Arc<SpeechSequencer>,
    transcript: Arc<Mutex<Transcript>>,
    status: Arc<Mutex<TurnStatus>>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    cancel: CancellationToken,
}

/// Everything the turn task needs, cloned out of the orchestrator so the
/// caller keeps full use of `self` while the turn runs.
struct TurnContext {
    config: CompanionConfig,
    source: Arc<dyn ReplySource>,
    sequencer: Arc<SpeechSequencer>,
    transcript: Arc<Mutex<Transcript>>,
    status: Arc<Mutex<TurnStatus>>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    cancel: CancellationToken,
}

impl ChatOrchestrator {
    pub fn new(
        config: CompanionConfig,
        source: Arc<dyn ReplySource>,
        sequencer: Arc<SpeechSequencer>,
        runtime_tx: broadcast::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            config,
            source,
            sequencer,
            transcript: Arc::new(Mutex::new(Transcript::new())),
            status: Arc::new(Mutex::new(TurnStatus::Idle)),
            runtime_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to runtime events (transcript updates, utterance
    /// boundaries, mouth levels).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime_tx.subscribe()
    }

    /// Current turn status.
    #[must_use]
    pub fn status(&self) -> TurnStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the transcript as currently rendered.
    #[must_use]
    pub fn transcript_snapshot(&self) -> Vec<TranscriptEntry> {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
            .to_vec()
    }

    /// Cancel the in-flight turn (if any) and stop accepting frames.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Start a chat turn for `user_text`.
    ///
    /// Rejects synchronously with [`CompanionError::TurnBusy`] while a
    /// turn is in flight and with [`CompanionError::EmptyInput`] for
    /// blank input; neither rejection mutates any state. On success the
    /// user entry is already in the transcript and the returned handle
    /// resolves when the turn reaches `Completed` or `Failed`.
    pub fn start_turn(&self, user_text: &str) -> Result<JoinHandle<()>> {
        let trimmed = user_text.trim();
        if trimmed.is_empty() {
            return Err(CompanionError::EmptyInput);
        }
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if status.is_busy() {
                return Err(CompanionError::TurnBusy);
            }
            *status = TurnStatus::AwaitingStream;
        }

        let mut turn = ChatTurn::new(trimmed);
        turn.status = TurnStatus::AwaitingStream;
        info!(turn_id = %turn.id, "starting chat turn");

        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_user(trimmed, &self.config.character.your_name);
        let _ = self.runtime_tx.send(RuntimeEvent::TurnStarted {
            turn_id: turn.id,
            user_text: trimmed.to_owned(),
        });

        let ctx = TurnContext {
            config: self.config.clone(),
            source: Arc::clone(&self.source),
            sequencer: Arc::clone(&self.sequencer),
            transcript: Arc::clone(&self.transcript),
            status: Arc::clone(&self.status),
            runtime_tx: self.runtime_tx.clone(),
            cancel: self.cancel.clone(),
        };
        Ok(tokio::spawn(run_turn(ctx, turn)))
    }
}

async fn run_turn(ctx: TurnContext, mut turn: ChatTurn) {
    let history = ctx
        .transcript
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .prior_context();

    let (tx, mut rx) = mpsc::channel::<ReplyFrame>(64);
    if let Err(e) = ctx.source.open(&turn.user_text, history, tx).await {
        error!(turn_id = %turn.id, "failed to open reply stream: {e}");
        fail_turn(&ctx, &mut turn);
        return;
    }
    set_status(&ctx, &mut turn, TurnStatus::Streaming);

    let rules = SegmentRules {
        min_chars: ctx.config.chat.min_segment_chars,
        max_chars: ctx.config.chat.max_segment_chars,
    };
    let mut tracker = EmotionTracker::new(Emotion::Neutral);
    let mut dedup = DedupGuard::new(ctx.config.chat.dedup_capacity);
    let mut next_sequence: u64 = 0;
    let mut completions: Vec<oneshot::Receiver<UtteranceOutcome>> = Vec::new();
    let stall = Duration::from_secs(ctx.config.chat.stall_timeout_secs);

    loop {
        let frame = tokio::select! {
            () = ctx.cancel.cancelled() => {
                info!(turn_id = %turn.id, "turn cancelled");
                set_status(&ctx, &mut turn, TurnStatus::Failed);
                return;
            }
            recv = tokio::time::timeout(stall, rx.recv()) => match recv {
                Err(_) => {
                    warn!(turn_id = %turn.id, "reply stream stalled for {}s", stall.as_secs());
                    fail_turn(&ctx, &mut turn);
                    return;
                }
                Ok(None) => {
                    warn!(turn_id = %turn.id, "reply stream closed without a final frame");
                    fail_turn(&ctx, &mut turn);
                    return;
                }
                Ok(Some(frame)) => frame,
            }
        };

        // An emotion switch force-flushes the buffer under the old label
        // before the new label applies to anything, so buffered text keeps
        // the expression it was generated under.
        if let Some(emotion) = frame.emotion
            && emotion != tracker.current()
        {
            let old = tracker.current();
            flush_segments(&ctx, &mut turn, old, &rules, true, &mut dedup, &mut next_sequence, &mut completions).await;
            tracker.observe(emotion);
            turn.emotion = emotion;
            debug!(turn_id = %turn.id, %emotion, "emotion changed");
            let _ = ctx.runtime_tx.send(RuntimeEvent::EmotionChanged { emotion });
        }

        if !frame.text.is_empty() {
            turn.accumulated_reply.push_str(&frame.text);
            turn.leftover_tail.push_str(&frame.text);
            ctx.transcript
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .project_assistant(&turn.accumulated_reply, &ctx.config.character.character_name);
            let _ = ctx.runtime_tx.send(RuntimeEvent::AssistantTranscript {
                text: turn.accumulated_reply.clone(),
            });
            flush_segments(&ctx, &mut turn, tracker.current(), &rules, false, &mut dedup, &mut next_sequence, &mut completions).await;
        }

        if frame.is_final {
            break;
        }
    }

    // Stream done; everything left in the buffer is speakable now.
    flush_segments(&ctx, &mut turn, tracker.current(), &rules, true, &mut dedup, &mut next_sequence, &mut completions).await;
    set_status(&ctx, &mut turn, TurnStatus::Finalizing);

    for done in completions {
        // A dropped sender just means the sequencer is gone; the turn
        // still completes.
        let _ = done.await;
    }

    set_status(&ctx, &mut turn, TurnStatus::Completed);
    info!(turn_id = %turn.id, chunks = next_sequence, "chat turn completed");
    let _ = ctx
        .runtime_tx
        .send(RuntimeEvent::TurnCompleted { turn_id: turn.id });
}

/// Run the segmenter over the rolling buffer and enqueue every chunk
/// that clears deduplication.
///
/// When `force` is false the buffer must reach the minimum length before
/// anything is dispatched, and the trailing chunk is only dispatched if
/// it ends on terminal punctuation; when `force` is true the whole
/// buffer goes out (emotion change, stream end).
#[allow(clippy::too_many_arguments)]
async fn flush_segments(
    ctx: &TurnContext,
    turn: &mut ChatTurn,
    label: Emotion,
    rules: &SegmentRules,
    force: bool,
    dedup: &mut DedupGuard,
    next_sequence: &mut u64,
    completions: &mut Vec<oneshot::Receiver<UtteranceOutcome>>,
) {
    let cleaned = segment::strip_placeholder_artifacts(&turn.leftover_tail);
    if cleaned.is_empty() {
        turn.leftover_tail.clear();
        return;
    }
    if !force && cleaned.chars().count() < rules.min_chars {
        turn.leftover_tail = cleaned;
        return;
    }

    let run = segment_buffer(&cleaned, rules);
    let mut ready = run.finals;
    let mut tail = run.remainder;
    if (force || ends_with_terminal(&tail)) && !tail.trim().is_empty() {
        ready.push(std::mem::take(&mut tail));
    }
    turn.leftover_tail = tail;

    for text in ready {
        if !dedup.accept(&text) {
            debug!(turn_id = %turn.id, "dropping duplicate chunk: {text}");
            continue;
        }
        let spoken = strip_stage_directions(&text);
        if spoken.trim().is_empty() {
            continue;
        }
        let segment = TextSegment {
            sequence: *next_sequence,
            text: spoken,
            emotion: label,
        };
        *next_sequence += 1;
        match ctx.sequencer.enqueue(segment).await {
            Ok(done) => completions.push(done),
            Err(e) => warn!(turn_id = %turn.id, "failed to enqueue chunk: {e}"),
        }
    }
}

/// Fail the turn: replace any partial reply with the fixed apology,
/// release the turn lock, and tell subscribers.
fn fail_turn(ctx: &TurnContext, turn: &mut ChatTurn) {
    ctx.transcript
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .apologize(&ctx.config.character.character_name);
    let _ = ctx.runtime_tx.send(RuntimeEvent::AssistantTranscript {
        text: APOLOGY_TEXT.to_owned(),
    });
    set_status(ctx, turn, TurnStatus::Failed);
    let _ = ctx
        .runtime_tx
        .send(RuntimeEvent::TurnFailed { turn_id: turn.id });
}

fn set_status(ctx: &TurnContext, turn: &mut ChatTurn, status: TurnStatus) {
    turn.status = status;
    *ctx.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
}
