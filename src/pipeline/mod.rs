//! Streaming-chat pipeline: turn orchestration and speech sequencing.

pub mod messages;
pub mod orchestrator;
pub mod sequencer;
