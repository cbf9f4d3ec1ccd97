//! Ordered speech playback with prefetched synthesis.
//!
//! Synthesis for each segment starts the moment it is enqueued, but
//! playback strictly follows sequence order: chunk N+1 never starts
//! before chunk N has finished, however fast its synthesis came back.
//! A failed synthesis is skipped with a warning instead of stalling the
//! rest of the reply.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::audio::decode::decode_with_fallback;
use crate::audio::playback::UtterancePlayer;
use crate::avatar::AvatarSurface;
use crate::config::TtsConfig;
use crate::emotion::Emotion;
use crate::error::{CompanionError, Result};
use crate::pipeline::messages::{TextSegment, UtteranceOutcome, UtteranceState};
use crate::runtime::RuntimeEvent;
use crate::tts::SpeechSynthesizer;

/// Backpressure bound on the playback queue. A long reply segments into
/// far fewer chunks than this; hitting the bound just delays enqueue.
const QUEUE_DEPTH: usize = 32;

struct QueuedUtterance {
    segment: TextSegment,
    synth: JoinHandle<Result<Vec<u8>>>,
    done_tx: oneshot::Sender<UtteranceOutcome>,
}

/// Bounded FIFO between segmentation and the audio device.
pub struct SpeechSequencer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    queue_tx: mpsc::Sender<QueuedUtterance>,
}

impl SpeechSequencer {
    /// Spawn the playback worker. The worker lives until the sequencer
    /// (and with it the queue sender) is dropped.
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        player: Arc<dyn UtterancePlayer>,
        avatar: Arc<dyn AvatarSurface>,
        tts: TtsConfig,
        runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(run_worker(queue_rx, player, avatar, tts, runtime_tx));
        Self {
            synthesizer,
            queue_tx,
        }
    }

    /// Enqueue a segment for synthesis and ordered playback.
    ///
    /// Synthesis is kicked off immediately on a separate task. The
    /// returned receiver resolves once the utterance has either played to
    /// completion or been skipped.
    pub async fn enqueue(&self, segment: TextSegment) -> Result<oneshot::Receiver<UtteranceOutcome>> {
        let synthesizer = Arc::clone(&self.synthesizer);
        let text = segment.text.clone();
        let emotion = segment.emotion;
        let synth = tokio::spawn(async move { synthesizer.synthesize(&text, emotion).await });

        let (done_tx, done_rx) = oneshot::channel();
        self.queue_tx
            .send(QueuedUtterance {
                segment,
                synth,
                done_tx,
            })
            .await
            .map_err(|_| CompanionError::Channel("speech queue closed".to_owned()))?;
        Ok(done_rx)
    }
}

async fn run_worker(
    mut queue_rx: mpsc::Receiver<QueuedUtterance>,
    player: Arc<dyn UtterancePlayer>,
    avatar: Arc<dyn AvatarSurface>,
    tts: TtsConfig,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
) {
    while let Some(queued) = queue_rx.recv().await {
        let sequence = queued.segment.sequence;
        let mut state = UtteranceState::Synthesizing;
        debug!(sequence, ?state, "awaiting synthesis");

        let bytes = match queued.synth.await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                state = UtteranceState::SynthesisFailed;
                warn!(sequence, ?state, "synthesis failed, skipping chunk: {e}");
                let _ = queued.done_tx.send(UtteranceOutcome::Skipped);
                continue;
            }
            Err(e) => {
                state = UtteranceState::SynthesisFailed;
                warn!(sequence, ?state, "synthesis task aborted, skipping chunk: {e}");
                let _ = queued.done_tx.send(UtteranceOutcome::Skipped);
                continue;
            }
        };

        let audio = decode_with_fallback(&bytes, tts.fallback_sample_rate, tts.fallback_silence_ms);

        state = UtteranceState::Playing;
        debug!(sequence, ?state, duration_ms = audio.duration_ms(), "playing utterance");
        avatar.play_emotion(queued.segment.emotion);
        emit(
            &runtime_tx,
            RuntimeEvent::UtteranceStarted {
                sequence,
                emotion: queued.segment.emotion,
            },
        );

        if let Err(e) = player.play(audio).await {
            warn!(sequence, "playback failed: {e}");
        }

        avatar.play_emotion(Emotion::Neutral);
        emit(&runtime_tx, RuntimeEvent::UtteranceFinished { sequence });
        state = UtteranceState::Done;
        debug!(sequence, ?state, "utterance finished");
        let _ = queued.done_tx.send(UtteranceOutcome::Played);
    }
}

fn emit(tx: &Option<broadcast::Sender<RuntimeEvent>>, event: RuntimeEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}
