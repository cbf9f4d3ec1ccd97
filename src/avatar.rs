//! Avatar surface the pipeline reports expressions to.
//!
//! Dependency direction is explicit: the pipeline calls into the avatar,
//! never the reverse. Mouth aperture is not pushed here; the viewer polls
//! [`MouthHandle`](crate::audio::playback::MouthHandle) or subscribes to
//! `RuntimeEvent::MouthLevel` per animation frame.

use crate::emotion::Emotion;

/// Facial-expression sink implemented by the 3D viewer.
pub trait AvatarSurface: Send + Sync {
    /// Switch the avatar's expression to the given label. Called with the
    /// utterance's emotion when playback starts and with
    /// [`Emotion::Neutral`] when it ends.
    fn play_emotion(&self, emotion: Emotion);
}

/// No-op avatar for headless operation and tests.
#[derive(Debug, Default)]
pub struct NullAvatar;

impl AvatarSurface for NullAvatar {
    fn play_emotion(&self, _emotion: Emotion) {}
}
