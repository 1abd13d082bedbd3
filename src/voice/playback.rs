//! Audio playback to speakers
//!
//! A single playback thread owns the output stream. Mounting new audio
//! (a WAV clip or a live remote stream) always evicts the current stream
//! first, so clips never overlap or pile up.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::wav::WavFile;
use crate::{Error, Result};

/// Something that can render response audio
///
/// Implementations report failures through logging only; a clip that fails
/// to play never affects the session or later clips.
pub trait PlaybackSink: Send + Sync {
    /// Replace whatever is playing with `wav`
    fn play(&self, wav: WavFile);

    /// Replace whatever is playing with a continuous remote stream
    fn attach_stream(&self, stream: RemoteAudio);
}

/// Receiving end of a live decoded audio stream
#[derive(Debug)]
pub struct RemoteAudio {
    sample_rate: u32,
    chunks: std_mpsc::Receiver<Vec<f32>>,
}

/// Writing end of a live decoded audio stream
#[derive(Debug, Clone)]
pub struct RemoteAudioWriter {
    chunks: std_mpsc::Sender<Vec<f32>>,
}

impl RemoteAudio {
    /// Create a connected writer/stream pair
    #[must_use]
    pub fn channel(sample_rate: u32) -> (RemoteAudioWriter, Self) {
        let (tx, rx) = std_mpsc::channel();
        (
            RemoteAudioWriter { chunks: tx },
            Self {
                sample_rate,
                chunks: rx,
            },
        )
    }

    /// Rate of the decoded samples
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Take every chunk written so far without waiting
    pub fn drain(&self) -> Vec<f32> {
        let mut out = Vec::new();
        while let Ok(chunk) = self.chunks.try_recv() {
            out.extend(chunk);
        }
        out
    }
}

impl RemoteAudioWriter {
    /// Queue decoded samples; returns `false` once the stream is detached
    pub fn write(&self, samples: Vec<f32>) -> bool {
        self.chunks.send(samples).is_ok()
    }
}

enum PlaybackCommand {
    Play(WavFile),
    Attach(RemoteAudio),
    Stop,
}

/// Plays response audio on the default output device
pub struct SpeakerSink {
    commands: std_mpsc::Sender<PlaybackCommand>,
}

impl SpeakerSink {
    /// Start the playback thread
    ///
    /// The output device is opened lazily for each clip.
    ///
    /// # Errors
    ///
    /// Returns error if the playback thread cannot be spawned
    pub fn new() -> Result<Self> {
        let (commands, rx) = std_mpsc::channel();

        thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || run_playback(&rx))?;

        Ok(Self { commands })
    }

    /// Stop whatever is currently playing
    pub fn stop(&self) {
        let _ = self.commands.send(PlaybackCommand::Stop);
    }

    fn send(&self, command: PlaybackCommand) {
        if self.commands.send(command).is_err() {
            tracing::error!("playback thread is gone, dropping audio");
        }
    }
}

impl PlaybackSink for SpeakerSink {
    fn play(&self, wav: WavFile) {
        self.send(PlaybackCommand::Play(wav));
    }

    fn attach_stream(&self, stream: RemoteAudio) {
        self.send(PlaybackCommand::Attach(stream));
    }
}

/// Playback thread body; exits when the sink is dropped
fn run_playback(commands: &std_mpsc::Receiver<PlaybackCommand>) {
    let mut current: Option<Stream> = None;

    while let Ok(command) = commands.recv() {
        // Evict before mounting anything new
        if current.take().is_some() {
            tracing::debug!("evicted previous playback");
        }

        let mounted = match command {
            PlaybackCommand::Play(wav) => start_clip(&wav),
            PlaybackCommand::Attach(stream) => start_remote(stream),
            PlaybackCommand::Stop => continue,
        };

        match mounted {
            Ok(stream) => current = Some(stream),
            Err(e) => tracing::error!(error = %e, "failed to start playback"),
        }
    }

    tracing::debug!("playback thread exiting");
}

/// Decode WAV bytes to normalized mono samples
///
/// A trailing odd payload byte is ignored.
///
/// # Errors
///
/// Returns error if the bytes are not a readable 16-bit PCM WAV
pub fn decode_wav(wav: &WavFile) -> Result<(Vec<f32>, u32)> {
    let payload = wav.payload();
    let even;
    let wav = if payload.len() % 2 == 1 {
        tracing::debug!(bytes = payload.len(), "dropping trailing odd audio byte");
        even = super::wav::wrap(&payload[..payload.len() - 1]);
        &even
    } else {
        wav
    };

    let reader = hound::WavReader::new(Cursor::new(wav.as_bytes()))
        .map_err(|e| Error::Codec(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<i16>, _>>()
        .map_err(|e| Error::Codec(e.to_string()))?;

    let samples = interleaved
        .iter()
        .step_by(channels)
        .map(|&s| super::pcm::decode_sample(s))
        .collect();

    Ok((samples, spec.sample_rate))
}

fn start_clip(wav: &WavFile) -> Result<Stream> {
    let (samples, sample_rate) = decode_wav(wav)?;
    let sample_count = samples.len();

    let mut position = 0usize;
    let stream = build_output(sample_rate, move |out: &mut [f32], channels| {
        for frame in out.chunks_mut(channels) {
            let sample = samples.get(position).copied().unwrap_or(0.0);
            frame.fill(sample);
            if position < samples.len() {
                position += 1;
            }
        }
    })?;

    tracing::debug!(samples = sample_count, sample_rate, "playing clip");
    Ok(stream)
}

fn start_remote(remote: RemoteAudio) -> Result<Stream> {
    let sample_rate = remote.sample_rate;
    let mut queue: VecDeque<f32> = VecDeque::new();

    let stream = build_output(sample_rate, move |out: &mut [f32], channels| {
        queue.extend(remote.drain());
        for frame in out.chunks_mut(channels) {
            frame.fill(queue.pop_front().unwrap_or(0.0));
        }
    })?;

    tracing::debug!(sample_rate, "attached remote audio stream");
    Ok(stream)
}

/// Pick an output config for `sample_rate`, mono first, stereo as fallback
fn select_output_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let covers = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .find(|c| covers(c, 1))
        .or_else(|| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| covers(c, 2))
        })
        .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;

    Ok(supported.with_sample_rate(rate).config())
}

fn build_output<F>(sample_rate: u32, mut fill: F) -> Result<Stream>
where
    F: FnMut(&mut [f32], usize) + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

    let config = select_output_config(&device, sample_rate)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| fill(data, channels),
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;
    Ok(stream)
}
