//! Mouth-aperture envelope extraction.
//!
//! Converts the instantaneous peak amplitude of playing audio into a
//! `0..=1` mouth openness value: logistic squashing, clamping near the
//! rails, then a single-pole exponential filter so the mouth does not
//! flap at per-frame noise.

/// One-pole smoothing factor that tracks speech without jitter.
pub const DEFAULT_SMOOTHING: f32 = 0.3;

/// Stateful envelope follower; one instance per playing utterance.
#[derive(Debug)]
pub struct MouthEnvelope {
    smoothing: f32,
    previous: f32,
}

impl MouthEnvelope {
    #[must_use]
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(0.01, 1.0),
            previous: 0.0,
        }
    }

    /// Feed the peak absolute amplitude of the current audio frame,
    /// returning the smoothed openness in `0..=1`.
    pub fn update(&mut self, peak: f32) -> f32 {
        // Small random drive variation keeps long steady vowels from
        // freezing the mouth at one aperture.
        let jitter = rand::random::<f32>() * 0.1 + 0.95;
        let mut v = 1.0 / (1.0 + (-45.0 * peak * jitter + 5.0).exp());

        if v < 0.1 {
            v = 0.0;
        } else if v > 0.9 {
            v = 1.0;
        }

        let eased = (v - self.previous) * self.smoothing + self.previous;
        self.previous = eased;
        (eased * 3.0).min(1.0)
    }

    /// Snap shut, e.g. when an utterance ends.
    pub fn reset(&mut self) {
        self.previous = 0.0;
    }
}

impl Default for MouthEnvelope {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

/// Peak absolute value of a sample window.
#[must_use]
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn silence_stays_closed() {
        let mut env = MouthEnvelope::default();
        for _ in 0..20 {
            assert_eq!(env.update(0.0), 0.0);
        }
    }

    #[test]
    fn loud_audio_saturates_open() {
        let mut env = MouthEnvelope::default();
        let mut last = 0.0;
        for _ in 0..50 {
            last = env.update(1.0);
        }
        assert!((last - 1.0).abs() < 0.01, "expected fully open, got {last}");
    }

    #[test]
    fn openness_rises_gradually_not_instantly() {
        let mut env = MouthEnvelope::new(0.3);
        let first = env.update(1.0);
        // One step of a 0.3 one-pole toward 1.0 is 0.3, scaled by the
        // output gain of 3 it caps at 1.0 only after several frames.
        assert!(first > 0.0);
        assert!(env.update(1.0) >= first);
    }

    #[test]
    fn reset_closes_the_mouth() {
        let mut env = MouthEnvelope::default();
        for _ in 0..10 {
            env.update(1.0);
        }
        env.reset();
        assert_eq!(env.update(0.0), 0.0);
    }

    #[test]
    fn peak_amplitude_is_rectified_max() {
        assert_eq!(peak_amplitude(&[0.1, -0.8, 0.3]), 0.8);
        assert_eq!(peak_amplitude(&[]), 0.0);
    }
}
