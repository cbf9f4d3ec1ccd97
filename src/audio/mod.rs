//! Audio decode, mouth-envelope extraction, and playback.

pub mod decode;
pub mod envelope;
pub mod playback;

/// Decoded audio ready for playback: mono f32 samples in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Approximate duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 * 1000.0 / self.sample_rate as f32
    }
}
