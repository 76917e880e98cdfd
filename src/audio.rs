//! Audio helpers for read-aloud: raw PCM from the speech endpoint → WAV.
//!
//! The speech API returns headerless 16-bit little-endian PCM; browsers need a
//! container to play it, so we wrap it with `hound`.

use std::io::Cursor;

use base64::Engine;
use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;

/// Sample rate of `response_format = "pcm"` speech output.
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Error)]
pub enum AudioError {
  #[error("PCM payload has odd length ({0} bytes)")]
  OddLength(usize),
  #[error("PCM payload is empty")]
  Empty,
  #[error("WAV encoding failed: {0}")]
  Wav(#[from] hound::Error),
}

/// Wrap interleaved s16le PCM into a WAV file.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, AudioError> {
  if pcm.is_empty() {
    return Err(AudioError::Empty);
  }
  if pcm.len() % 2 != 0 {
    return Err(AudioError::OddLength(pcm.len()));
  }

  let spec = WavSpec {
    channels,
    sample_rate,
    bits_per_sample: 16,
    sample_format: SampleFormat::Int,
  };

  let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
  {
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for pair in pcm.chunks_exact(2) {
      writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize()?;
  }
  Ok(cursor.into_inner())
}

pub fn wav_base64(wav: &[u8]) -> String {
  base64::engine::general_purpose::STANDARD.encode(wav)
}
