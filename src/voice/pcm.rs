//! PCM16 sample conversion
//!
//! Converts normalized `f32` samples to signed 16-bit PCM and back. Scaling is
//! asymmetric so that both ends of the `i16` range are reachable: negative
//! samples scale by 32768, non-negative samples by 32767.

/// Scale applied to negative samples
const NEGATIVE_SCALE: f32 = 32768.0;

/// Scale applied to non-negative samples
const POSITIVE_SCALE: f32 = 32767.0;

/// Signed 16-bit PCM samples produced from one audio frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pcm16Buffer {
    samples: Vec<i16>,
}

impl Pcm16Buffer {
    /// Wrap already-encoded samples
    #[must_use]
    pub const fn from_samples(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Encoded samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian byte representation used on the wire
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        to_le_bytes(&self.samples)
    }
}

/// Encode a single normalized sample
///
/// NaN encodes as silence.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }

    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * NEGATIVE_SCALE) as i16
    } else {
        (s * POSITIVE_SCALE) as i16
    }
}

/// Encode normalized samples to PCM16
#[must_use]
pub fn encode(samples: &[f32]) -> Pcm16Buffer {
    Pcm16Buffer {
        samples: samples.iter().copied().map(encode_sample).collect(),
    }
}

/// Decode a single PCM16 sample back to the normalized range
#[must_use]
pub fn decode_sample(sample: i16) -> f32 {
    if sample < 0 {
        f32::from(sample) / NEGATIVE_SCALE
    } else {
        f32::from(sample) / POSITIVE_SCALE
    }
}

/// Decode PCM16 samples to normalized `f32`
#[must_use]
pub fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().copied().map(decode_sample).collect()
}

/// Serialize samples as little-endian bytes
#[must_use]
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Parse little-endian PCM16 bytes
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn decode_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
