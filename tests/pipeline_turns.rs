#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end pipeline tests with scripted reply streams and mock
//! synthesis/playback.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use tomo::audio::DecodedAudio;
use tomo::audio::playback::UtterancePlayer;
use tomo::avatar::AvatarSurface;
use tomo::pipeline::sequencer::SpeechSequencer;
use tomo::transcript::{APOLOGY_TEXT, Role, TranscriptEntry};
use tomo::{
    ChatOrchestrator, CompanionConfig, CompanionError, Emotion, ReplyFrame, ReplySource, Result,
    RuntimeEvent, SpeechSynthesizer, TurnStatus,
};

#[derive(Clone)]
enum Step {
    Send(ReplyFrame),
    Delay(u64),
    /// Drop the sender without a final frame (mid-stream failure).
    Abort,
}

struct ScriptedSource {
    steps: Vec<Step>,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self { steps })
    }
}

#[async_trait]
impl ReplySource for ScriptedSource {
    async fn open(
        &self,
        _query: &str,
        _history: Vec<TranscriptEntry>,
        tx: mpsc::Sender<ReplyFrame>,
    ) -> Result<()> {
        let steps = self.steps.clone();
        tokio::spawn(async move {
            for step in steps {
                match step {
                    Step::Send(frame) => {
                        if tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Step::Delay(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                    Step::Abort => return,
                }
            }
        });
        Ok(())
    }
}

struct RefusingSource;

#[async_trait]
impl ReplySource for RefusingSource {
    async fn open(
        &self,
        _query: &str,
        _history: Vec<TranscriptEntry>,
        _tx: mpsc::Sender<ReplyFrame>,
    ) -> Result<()> {
        Err(CompanionError::Stream("connection refused".to_owned()))
    }
}

/// Records every synthesis call; optionally fails or sleeps on a text
/// marker to exercise skip and out-of-order completion paths.
struct MockSynthesizer {
    calls: Mutex<Vec<(String, Emotion)>>,
    fail_marker: Option<&'static str>,
    slow_marker: Option<(&'static str, u64)>,
}

impl MockSynthesizer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_marker: None,
            slow_marker: None,
        })
    }

    fn failing_on(marker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_marker: Some(marker),
            slow_marker: None,
        })
    }

    fn slow_on(marker: &'static str, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail_marker: None,
            slow_marker: Some((marker, delay_ms)),
        })
    }

    fn calls(&self) -> Vec<(String, Emotion)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, emotion: Emotion) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push((text.to_owned(), emotion));
        if let Some((marker, delay_ms)) = self.slow_marker
            && text.contains(marker)
        {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if let Some(marker) = self.fail_marker
            && text.contains(marker)
        {
            return Err(CompanionError::Synthesis("scripted failure".to_owned()));
        }
        Ok(wav_bytes())
    }
}

struct MockPlayer {
    played: Mutex<Vec<usize>>,
}

impl MockPlayer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
        })
    }

    fn play_count(&self) -> usize {
        self.played.lock().unwrap().len()
    }
}

#[async_trait]
impl UtterancePlayer for MockPlayer {
    async fn play(&self, audio: DecodedAudio) -> Result<()> {
        self.played.lock().unwrap().push(audio.samples.len());
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    }
}

struct RecordingAvatar {
    emotions: Mutex<Vec<Emotion>>,
}

impl RecordingAvatar {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            emotions: Mutex::new(Vec::new()),
        })
    }

    fn emotions(&self) -> Vec<Emotion> {
        self.emotions.lock().unwrap().clone()
    }
}

impl AvatarSurface for RecordingAvatar {
    fn play_emotion(&self, emotion: Emotion) {
        self.emotions.lock().unwrap().push(emotion);
    }
}

/// A short valid 16-bit mono wav, as a TTS backend would return.
fn wav_bytes() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 24_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..240i16 {
            writer.write_sample(i * 50).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

struct Harness {
    orchestrator: ChatOrchestrator,
    events: broadcast::Receiver<RuntimeEvent>,
    synth: Arc<MockSynthesizer>,
    player: Arc<MockPlayer>,
    avatar: Arc<RecordingAvatar>,
}

fn harness(
    config: CompanionConfig,
    source: Arc<dyn ReplySource>,
    synth: Arc<MockSynthesizer>,
) -> Harness {
    let (runtime_tx, events) = broadcast::channel(256);
    let player = MockPlayer::new();
    let avatar = RecordingAvatar::new();
    let sequencer = Arc::new(SpeechSequencer::new(
        Arc::clone(&synth) as Arc<dyn SpeechSynthesizer>,
        Arc::clone(&player) as Arc<dyn UtterancePlayer>,
        Arc::clone(&avatar) as Arc<dyn AvatarSurface>,
        config.tts.clone(),
        Some(runtime_tx.clone()),
    ));
    let orchestrator = ChatOrchestrator::new(config, source, sequencer, runtime_tx);
    Harness {
        orchestrator,
        events,
        synth,
        player,
        avatar,
    }
}

/// Segmentation thresholds small enough that every test sentence becomes
/// its own chunk.
fn tight_config() -> CompanionConfig {
    let mut config = CompanionConfig::default();
    config.chat.min_segment_chars = 5;
    config.chat.max_segment_chars = 12;
    config
}

fn drain_events(rx: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn started_sequences(events: &[RuntimeEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::UtteranceStarted { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .collect()
}

fn delta(text: &str) -> Step {
    Step::Send(ReplyFrame::delta(text))
}

fn end() -> Step {
    Step::Send(ReplyFrame::end())
}

#[tokio::test]
async fn short_reply_is_spoken_as_one_chunk_at_stream_end() {
    let source = ScriptedSource::new(vec![delta("你好，"), delta("今天天气"), delta("真好。"), end()]);
    let h = harness(CompanionConfig::default(), source, MockSynthesizer::new());

    let handle = h.orchestrator.start_turn("你好").unwrap();
    handle.await.unwrap();

    // Under the 15-char minimum nothing flushes mid-stream; the full
    // sentence goes out once on the final frame.
    assert_eq!(
        h.synth.calls(),
        vec![("你好，今天天气真好。".to_owned(), Emotion::Neutral)]
    );
    assert_eq!(h.player.play_count(), 1);
    assert_eq!(h.orchestrator.status(), TurnStatus::Completed);

    let transcript = h.orchestrator.transcript_snapshot();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[1].content, "你好，今天天气真好。");
}

#[tokio::test]
async fn emotion_change_flushes_buffer_under_old_label() {
    let mut happy_frame = ReplyFrame::delta("太棒了！我们走吧！");
    happy_frame.emotion = Some(Emotion::Happy);
    let source = ScriptedSource::new(vec![
        delta("我今天很平静。"),
        Step::Send(happy_frame),
        end(),
    ]);
    let h = harness(CompanionConfig::default(), source, MockSynthesizer::new());

    let handle = h.orchestrator.start_turn("心情怎么样").unwrap();
    handle.await.unwrap();

    // Buffered text below the minimum length still flushes on the emotion
    // switch, tagged with the label it was generated under.
    assert_eq!(
        h.synth.calls(),
        vec![
            ("我今天很平静。".to_owned(), Emotion::Neutral),
            ("太棒了！我们走吧！".to_owned(), Emotion::Happy),
        ]
    );
    let mut events = h.events;
    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        RuntimeEvent::EmotionChanged {
            emotion: Emotion::Happy
        }
    )));
    // Avatar shows each utterance's emotion, returning to neutral after.
    assert_eq!(
        h.avatar.emotions(),
        vec![
            Emotion::Neutral,
            Emotion::Neutral,
            Emotion::Happy,
            Emotion::Neutral
        ]
    );
}

#[tokio::test]
async fn failed_synthesis_skips_chunk_without_stalling_later_ones() {
    let source = ScriptedSource::new(vec![
        delta("一二三四五六七八九。"),
        delta("这句命中了坏标记。"),
        delta("后面还有一句好的。"),
        end(),
    ]);
    let h = harness(tight_config(), source, MockSynthesizer::failing_on("坏"));

    let handle = h.orchestrator.start_turn("说三句话").unwrap();
    handle.await.unwrap();

    assert_eq!(h.synth.calls().len(), 3);
    assert_eq!(h.player.play_count(), 2);
    assert_eq!(h.orchestrator.status(), TurnStatus::Completed);

    let mut events = h.events;
    let events = drain_events(&mut events);
    // The skipped chunk never starts; the reply still completes.
    assert_eq!(started_sequences(&events), vec![0, 2]);
    assert!(events
        .iter()
        .any(|e| matches!(e, RuntimeEvent::TurnCompleted { .. })));
}

#[tokio::test]
async fn slow_first_synthesis_does_not_reorder_playback() {
    let source = ScriptedSource::new(vec![
        delta("一二三四五六七八九。"),
        delta("后到的先合成完毕哦。"),
        end(),
    ]);
    // The first chunk's synthesis finishes long after the second's.
    let h = harness(tight_config(), source, MockSynthesizer::slow_on("一二三", 200));

    let handle = h.orchestrator.start_turn("顺序测试").unwrap();
    handle.await.unwrap();

    let mut events = h.events;
    let events = drain_events(&mut events);
    assert_eq!(started_sequences(&events), vec![0, 1]);

    // Finished(0) strictly precedes Started(1).
    let finished_0 = events
        .iter()
        .position(|e| matches!(e, RuntimeEvent::UtteranceFinished { sequence: 0 }))
        .unwrap();
    let started_1 = events
        .iter()
        .position(|e| matches!(e, RuntimeEvent::UtteranceStarted { sequence: 1, .. }))
        .unwrap();
    assert!(finished_0 < started_1);
}

#[tokio::test]
async fn duplicate_chunks_are_spoken_once_but_shown_in_full() {
    let source = ScriptedSource::new(vec![
        delta("一二三四五六七八九。"),
        delta("一二三四五六七八九。"),
        end(),
    ]);
    let h = harness(tight_config(), source, MockSynthesizer::new());

    let handle = h.orchestrator.start_turn("重复").unwrap();
    handle.await.unwrap();

    assert_eq!(h.synth.calls().len(), 1);
    let transcript = h.orchestrator.transcript_snapshot();
    assert_eq!(transcript[1].content, "一二三四五六七八九。一二三四五六七八九。");
}

#[tokio::test]
async fn stage_directions_shown_but_not_spoken() {
    let source = ScriptedSource::new(vec![delta("你好呀[微笑]真开心。"), end()]);
    let h = harness(tight_config(), source, MockSynthesizer::new());

    let handle = h.orchestrator.start_turn("打招呼").unwrap();
    handle.await.unwrap();

    assert_eq!(
        h.synth.calls(),
        vec![("你好呀真开心。".to_owned(), Emotion::Neutral)]
    );
    let transcript = h.orchestrator.transcript_snapshot();
    assert_eq!(transcript[1].content, "你好呀[微笑]真开心。");
}

#[tokio::test]
async fn second_turn_is_rejected_synchronously_while_busy() {
    let source = ScriptedSource::new(vec![delta("慢慢说。"), Step::Delay(150), end()]);
    let h = harness(CompanionConfig::default(), source, MockSynthesizer::new());

    let handle = h.orchestrator.start_turn("第一条").unwrap();
    let rejected = h.orchestrator.start_turn("第二条");
    assert!(matches!(rejected, Err(CompanionError::TurnBusy)));

    // The rejected turn left no trace.
    let users = h
        .orchestrator
        .transcript_snapshot()
        .iter()
        .filter(|e| e.role == Role::User)
        .count();
    assert_eq!(users, 1);

    handle.await.unwrap();
    assert_eq!(h.orchestrator.status(), TurnStatus::Completed);
    // The lock is released once the turn settles.
    let next = h.orchestrator.start_turn("第三条");
    assert!(next.is_ok());
    next.unwrap().await.unwrap();
}

#[tokio::test]
async fn blank_input_is_rejected_without_side_effects() {
    let source = ScriptedSource::new(vec![end()]);
    let h = harness(CompanionConfig::default(), source, MockSynthesizer::new());

    let result = h.orchestrator.start_turn("   \n");
    assert!(matches!(result, Err(CompanionError::EmptyInput)));
    assert!(h.orchestrator.transcript_snapshot().is_empty());
    assert_eq!(h.orchestrator.status(), TurnStatus::Idle);
}

#[tokio::test]
async fn mid_stream_close_apologizes_and_releases_the_lock() {
    let source = ScriptedSource::new(vec![delta("刚说到一半"), Step::Abort]);
    let h = harness(CompanionConfig::default(), source, MockSynthesizer::new());

    let handle = h.orchestrator.start_turn("说下去").unwrap();
    handle.await.unwrap();

    assert_eq!(h.orchestrator.status(), TurnStatus::Failed);
    let transcript = h.orchestrator.transcript_snapshot();
    // The partial reply is replaced, not kept.
    assert_eq!(transcript[1].content, APOLOGY_TEXT);

    let mut events = h.events;
    let events = drain_events(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, RuntimeEvent::TurnFailed { .. })));

    // A new turn is accepted after the failure.
    assert!(h.orchestrator.start_turn("再试一次").is_ok());
}

#[tokio::test]
async fn stalled_stream_fails_the_turn() {
    let mut config = CompanionConfig::default();
    config.chat.stall_timeout_secs = 1;
    let source = ScriptedSource::new(vec![delta("开头"), Step::Delay(5_000), end()]);
    let h = harness(config, source, MockSynthesizer::new());

    let handle = h.orchestrator.start_turn("会卡住的").unwrap();
    handle.await.unwrap();

    assert_eq!(h.orchestrator.status(), TurnStatus::Failed);
    assert_eq!(h.orchestrator.transcript_snapshot()[1].content, APOLOGY_TEXT);
}

#[tokio::test]
async fn refused_stream_apologizes_immediately() {
    let h = harness(
        CompanionConfig::default(),
        Arc::new(RefusingSource),
        MockSynthesizer::new(),
    );

    let handle = h.orchestrator.start_turn("你好").unwrap();
    handle.await.unwrap();

    assert_eq!(h.orchestrator.status(), TurnStatus::Failed);
    let transcript = h.orchestrator.transcript_snapshot();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].content, APOLOGY_TEXT);
    assert!(h.synth.calls().is_empty());
}

#[tokio::test]
async fn sequences_are_strictly_increasing_within_a_turn() {
    let source = ScriptedSource::new(vec![
        delta("一二三四五六七八九。"),
        delta("二三四五六七八九十。"),
        delta("三四五六七八九十一。"),
        end(),
    ]);
    let h = harness(tight_config(), source, MockSynthesizer::new());

    let handle = h.orchestrator.start_turn("编号").unwrap();
    handle.await.unwrap();

    let mut events = h.events;
    let events = drain_events(&mut events);
    assert_eq!(started_sequences(&events), vec![0, 1, 2]);
}
