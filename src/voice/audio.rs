//! WAV inspection and wrapping

use std::io::Cursor;
use std::time::Duration;

use crate::{Error, Result};

/// Recordings shorter than this carry no usable speech
pub const MIN_SPEECH: Duration = Duration::from_millis(250);

/// Length of the audio in a WAV buffer, if the header can be read
#[must_use]
pub fn wav_duration(audio: &[u8]) -> Option<Duration> {
    let reader = hound::WavReader::new(Cursor::new(audio)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    let frames = u64::from(reader.duration());
    Some(Duration::from_micros(
        frames * 1_000_000 / u64::from(spec.sample_rate),
    ))
}

/// Whether a recording is too short to contain speech
///
/// Unreadable headers are not treated as short; the transcriber decides.
#[must_use]
pub fn is_too_short(audio: &[u8]) -> bool {
    if audio.is_empty() {
        return true;
    }
    wav_duration(audio).is_some_and(|d| d < MIN_SPEECH)
}

/// Wrap raw little-endian 16-bit mono PCM in a WAV container
///
/// # Errors
///
/// Returns error if the WAV writer fails
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Tts(e.to_string()))?;

        for chunk in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                .map_err(|e| Error::Tts(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Tts(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
