//! Audio byte decoding with ordered fallback strategies.
//!
//! TTS endpoints return whatever their upstream produced: mp3, wav,
//! sometimes bytes with junk prepended, sometimes garbage. Decoding runs
//! an ordered list of strategies with a uniform signature and terminates
//! in a guaranteed-success silent clip, so an undecodable buffer can
//! never deadlock the playback chain.

use super::DecodedAudio;
use tracing::{debug, warn};

/// Why a single decode strategy failed.
#[derive(Debug)]
pub struct DecodeError {
    pub strategy: &'static str,
    pub reason: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

type DecodeResult = std::result::Result<DecodedAudio, DecodeError>;

/// Ordered decode strategies, tried front to back.
const STRATEGIES: &[(&str, fn(&[u8]) -> DecodeResult)] = &[
    ("probe", decode_probe),
    ("mp3-resync", decode_mp3_resync),
    ("wav-lenient", decode_wav),
];

/// Decode `bytes`, falling back to a silent clip of
/// `fallback_silence_ms` when every strategy fails. Never errors.
#[must_use]
pub fn decode_with_fallback(
    bytes: &[u8],
    fallback_sample_rate: u32,
    fallback_silence_ms: u32,
) -> DecodedAudio {
    for (name, strategy) in STRATEGIES {
        match strategy(bytes) {
            Ok(audio) if !audio.samples.is_empty() => {
                debug!(
                    "decoded {} bytes via {name}: {:.0} ms at {} Hz",
                    bytes.len(),
                    audio.duration_ms(),
                    audio.sample_rate
                );
                return audio;
            }
            Ok(_) => {
                warn!("decode strategy {name} produced no samples");
            }
            Err(e) => {
                debug!("decode strategy failed: {e}");
            }
        }
    }

    warn!("all decode strategies failed for {} bytes, substituting silence", bytes.len());
    silent_clip(fallback_sample_rate, fallback_silence_ms)
}

/// A short all-zero clip. Playing it still takes real time, so completion
/// signaling downstream stays intact.
#[must_use]
pub fn silent_clip(sample_rate: u32, duration_ms: u32) -> DecodedAudio {
    let n = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    DecodedAudio {
        samples: vec![0.0; n.max(1)],
        sample_rate,
    }
}

/// Byte offset of the first MP3 frame sync header, if any.
///
/// Matches the MPEG-1 Layer III sync patterns (`FF FB`, `FF F3`, `FF F2`)
/// so JSON or log noise prepended by a proxy can be skipped.
#[must_use]
pub fn find_mp3_frame_offset(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(2)
        .position(|w| w[0] == 0xFF && matches!(w[1], 0xFB | 0xF3 | 0xF2))
}

/// Primary strategy: symphonia format probe (mp3 and wav).
fn decode_probe(bytes: &[u8]) -> DecodeResult {
    decode_symphonia(bytes).map_err(|reason| DecodeError {
        strategy: "probe",
        reason,
    })
}

/// Second strategy: skip junk ahead of the first MP3 frame header and
/// probe again from there.
fn decode_mp3_resync(bytes: &[u8]) -> DecodeResult {
    let offset = find_mp3_frame_offset(bytes).ok_or_else(|| DecodeError {
        strategy: "mp3-resync",
        reason: "no MP3 frame header found".to_owned(),
    })?;
    if offset == 0 {
        // The probe already saw this exact byte stream.
        return Err(DecodeError {
            strategy: "mp3-resync",
            reason: "frame header already at offset 0".to_owned(),
        });
    }
    decode_symphonia(&bytes[offset..]).map_err(|reason| DecodeError {
        strategy: "mp3-resync",
        reason,
    })
}

/// Third strategy: lenient WAV parse via hound, which accepts some
/// headers the probe rejects.
fn decode_wav(bytes: &[u8]) -> DecodeResult {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).map_err(|e| DecodeError {
        strategy: "wav-lenient",
        reason: e.to_string(),
    })?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.unwrap_or(0.0))
            .collect(),
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max)
                .collect()
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_symphonia(bytes: &[u8]) -> std::result::Result<DecodedAudio, String> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("failed to probe audio: {e}"))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| "no default audio track".to_owned())?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| "unknown sample rate".to_owned())?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| format!("failed to create decoder: {e}"))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) => {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    break;
                }
                return Err(format!("audio read error: {e}"));
            }
            Err(e) => return Err(format!("audio read error: {e}")),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Corrupt frames are skipped, not fatal.
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(format!("audio decode error: {e}")),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;

        let required = (frames as usize).saturating_mul(channels);
        let needs_new = match sample_buf.as_ref() {
            Some(b) => b.capacity() < required,
            None => true,
        };
        if needs_new {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        } else if let Some(b) = sample_buf.as_mut() {
            b.clear();
        }

        if let Some(b) = sample_buf.as_mut() {
            b.copy_interleaved_ref(decoded);
        }
        let data = match sample_buf.as_ref() {
            Some(b) => b.samples(),
            None => &[],
        };

        if channels <= 1 {
            out.extend_from_slice(data);
        } else {
            out.extend(downmix(data, channels));
        }
    }

    Ok(DecodedAudio {
        samples: out,
        sample_rate,
    })
}

/// Average interleaved channels down to mono.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
