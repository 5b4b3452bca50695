//! WAV container encoding and decoding

use std::io::Cursor;

use super::block::Utterance;
use crate::{Error, Result};

/// Encode PCM16 audio as WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn encode(audio: &Utterance) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: audio.channels(),
        sample_rate: audio.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        let mut samples = writer.get_i16_writer(u32::try_from(audio.samples().len()).map_err(
            |_| Error::Wav("audio too long for a WAV container".to_string()),
        )?);
        for &sample in audio.samples() {
            samples.write_sample(sample);
        }
        samples.flush()?;
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Decode WAV bytes into PCM16 audio
///
/// Integer samples of other widths are rescaled to 16 bits; float samples are
/// converted from [-1, 1].
///
/// # Errors
///
/// Returns error if the bytes are not a readable WAV file
pub fn decode(bytes: &[u8]) -> Result<Utterance> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, bits) if bits <= 32 => {
            let shift = i32::from(bits) - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| rescale(v, shift)))
                .collect::<std::result::Result<_, _>>()?
        }
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .map(|s| s.map(float_to_i16))
            .collect::<std::result::Result<_, _>>()?,
        (format, bits) => {
            return Err(Error::Wav(format!(
                "unsupported sample format {format:?} at {bits} bits"
            )));
        }
    };

    Ok(Utterance::new(samples, spec.sample_rate, spec.channels))
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_i16(value: f32) -> i16 {
    (value * 32767.0).clamp(-32768.0, 32767.0) as i16
}

#[allow(clippy::cast_possible_truncation)]
fn rescale(value: i32, shift: i32) -> i16 {
    if shift >= 0 {
        (value >> shift) as i16
    } else {
        (value << -shift) as i16
    }
}

/// WAV bytes of silence
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn silent(sample_rate: u32, channels: u16, duration_ms: u32) -> Result<Vec<u8>> {
    encode(&Utterance::silent(sample_rate, channels, duration_ms))
}
