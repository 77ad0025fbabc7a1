//! WAV encoding, header checks and audio math.
//!
//! Pure functions: no I/O, no async runtime.

/// Compute RMS level of 16-bit PCM samples, normalized to 0.0–1.0.
pub fn compute_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Duration of mono PCM at `sample_rate`, in milliseconds.
pub fn pcm_duration_ms(sample_count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (sample_count as u64 * 1000) / sample_rate as u64
}

/// Write a minimal WAV file (16-bit mono PCM) from raw samples.
pub fn write_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let file_len = 36 + data_len;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_len.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

/// Format fields of a PCM WAV clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset in the buffer where raw PCM data begins.
    pub data_offset: usize,
}

/// Parse a WAV header from a byte buffer.
///
/// Used to reject synthesized clips that are not playable PCM before they
/// reach the output device. Unknown chunks (e.g. `LIST`) are skipped; a
/// `0xFFFFFFFF` streaming size is treated as "unknown" rather than skipped.
pub fn parse_wav_header(buf: &[u8]) -> Result<WavHeader, &'static str> {
    if buf.len() < 12 {
        return Err("too short for RIFF header");
    }
    if &buf[0..4] != b"RIFF" {
        return Err("missing RIFF tag");
    }
    if &buf[8..12] != b"WAVE" {
        return Err("missing WAVE tag");
    }

    let mut pos = 12;
    let mut format: Option<(u16, u32, u16)> = None;

    while pos + 8 <= buf.len() {
        let chunk_id = &buf[pos..pos + 4];
        let chunk_size =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);
        let skip = if chunk_size == 0xFFFFFFFF {
            0
        } else {
            // RIFF chunks are word aligned.
            chunk_size as usize + (chunk_size as usize & 1)
        };

        match chunk_id {
            b"fmt " => {
                if pos + 24 > buf.len() {
                    return Err("fmt chunk truncated");
                }
                let audio_format = u16::from_le_bytes([buf[pos + 8], buf[pos + 9]]);
                if audio_format != 1 {
                    return Err("not PCM format");
                }
                let channels = u16::from_le_bytes([buf[pos + 10], buf[pos + 11]]);
                let sample_rate = u32::from_le_bytes([
                    buf[pos + 12],
                    buf[pos + 13],
                    buf[pos + 14],
                    buf[pos + 15],
                ]);
                let bits = u16::from_le_bytes([buf[pos + 22], buf[pos + 23]]);
                format = Some((channels, sample_rate, bits));
                pos += 8 + if skip == 0 { 16 } else { skip };
            }
            b"data" => {
                let (channels, sample_rate, bits_per_sample) =
                    format.ok_or("data chunk before fmt chunk")?;
                return Ok(WavHeader {
                    channels,
                    sample_rate,
                    bits_per_sample,
                    data_offset: pos + 8,
                });
            }
            _ => pos += 8 + skip,
        }
    }

    Err("data chunk not found")
}
