//! RIFF/WAV framing for raw PCM16 payloads
//!
//! Inbound socket audio arrives as headerless PCM16. Wrapping it with the
//! canonical 44-byte header makes it decodable by any WAV reader.

/// Sample rate of inbound response audio
pub const WAV_SAMPLE_RATE: u32 = 24000;

/// Channel count of inbound response audio
pub const WAV_CHANNELS: u16 = 1;

/// Bits per sample of inbound response audio
pub const WAV_BITS_PER_SAMPLE: u16 = 16;

/// Size of the canonical header
pub const WAV_HEADER_LEN: usize = 44;

/// A complete WAV file: canonical header followed by the PCM16 payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavFile {
    bytes: Vec<u8>,
}

impl WavFile {
    /// Full file contents, header included
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the raw file bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Payload without the header
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.bytes[WAV_HEADER_LEN..]
    }

    /// Total file length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.len() == WAV_HEADER_LEN
    }

    /// Playback duration in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let bytes_per_second = u64::from(byte_rate());
        (self.payload().len() as u64 * 1000) / bytes_per_second
    }
}

const fn byte_rate() -> u32 {
    WAV_SAMPLE_RATE * WAV_CHANNELS as u32 * 2
}

const fn block_align() -> u16 {
    WAV_CHANNELS * 2
}

/// Wrap raw PCM16 bytes with a canonical WAV header
///
/// Never fails; payloads beyond `u32::MAX - 36` bytes saturate the size fields.
#[must_use]
pub fn wrap(pcm16: &[u8]) -> WavFile {
    let data_len = u32::try_from(pcm16.len()).unwrap_or(u32::MAX);
    let chunk_size = data_len.saturating_add(36);

    let mut bytes = Vec::with_capacity(WAV_HEADER_LEN + pcm16.len());
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&chunk_size.to_le_bytes());
    bytes.extend_from_slice(b"WAVE");

    // fmt subchunk
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&WAV_CHANNELS.to_le_bytes());
    bytes.extend_from_slice(&WAV_SAMPLE_RATE.to_le_bytes());
    bytes.extend_from_slice(&byte_rate().to_le_bytes());
    bytes.extend_from_slice(&block_align().to_le_bytes());
    bytes.extend_from_slice(&WAV_BITS_PER_SAMPLE.to_le_bytes());

    // data subchunk
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.extend_from_slice(pcm16);

    WavFile { bytes }
}
