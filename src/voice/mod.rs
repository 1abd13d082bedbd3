//! Voice processing module
//!
//! Handles audio capture, PCM16 conversion, WAV framing, and playback.

mod capture;
mod frame;
pub mod pcm;
mod playback;
pub mod wav;

pub use capture::{
    CaptureHandle, ChunkedFrameSource, DEFAULT_BLOCK_SIZE, FrameReceiver, FrameSender,
    FrameSource, PcmFrameSource, SAMPLE_RATE,
};
pub use frame::{AudioFrame, ChunkAccumulator, FrameBlocker, extract_mono};
pub use pcm::Pcm16Buffer;
pub use playback::{PlaybackSink, RemoteAudio, RemoteAudioWriter, SpeakerSink, decode_wav};
pub use wav::WavFile;
