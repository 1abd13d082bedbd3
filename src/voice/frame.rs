//! Audio frames handed from the capture thread to the coordinator

/// A block of mono, normalized samples produced by one capture callback
///
/// Frames are moved across the thread boundary; the producer keeps no
/// reference after sending.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Create a frame from owned samples
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Samples in capture order
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Consume the frame, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Rate the samples were captured at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether every sample is exactly zero
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0.0)
    }
}

/// Build a frame from the first channel of an interleaved callback buffer
///
/// Returns `None` when the callback carried no input.
#[must_use]
pub fn extract_mono(data: &[f32], channels: usize, sample_rate: u32) -> Option<AudioFrame> {
    if data.is_empty() || channels == 0 {
        return None;
    }

    let samples: Vec<f32> = if channels == 1 {
        data.to_vec()
    } else {
        data.iter().step_by(channels).copied().collect()
    };

    Some(AudioFrame::new(samples, sample_rate))
}

/// Accumulates callback samples into fixed-duration chunks
///
/// Used by the chunked capture strategy, which trades latency for fewer,
/// larger messages.
#[derive(Debug)]
pub struct ChunkAccumulator {
    pending: Vec<f32>,
    chunk_len: usize,
    sample_rate: u32,
    skip_silent: bool,
}

impl ChunkAccumulator {
    /// Create an accumulator emitting chunks of `chunk_ms` milliseconds
    #[must_use]
    pub fn new(sample_rate: u32, chunk_ms: u32, skip_silent: bool) -> Self {
        let chunk_len = (u64::from(sample_rate) * u64::from(chunk_ms) / 1000).max(1);
        let chunk_len = usize::try_from(chunk_len).unwrap_or(usize::MAX);
        Self {
            pending: Vec::with_capacity(chunk_len),
            chunk_len,
            sample_rate,
            skip_silent,
        }
    }

    /// Samples per emitted chunk
    #[must_use]
    pub const fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Feed mono samples, returning every chunk completed by this call
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut ready = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let room = self.chunk_len - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.chunk_len {
                let fresh = Vec::with_capacity(self.chunk_len);
                let chunk = std::mem::replace(&mut self.pending, fresh);
                self.emit(chunk, &mut ready);
            }
        }

        ready
    }

    /// Flush a partial chunk, if any
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let chunk = std::mem::take(&mut self.pending);
        let mut ready = Vec::with_capacity(1);
        self.emit(chunk, &mut ready);
        ready.pop()
    }

    fn emit(&self, chunk: Vec<f32>, ready: &mut Vec<AudioFrame>) {
        let frame = AudioFrame::new(chunk, self.sample_rate);
        if self.skip_silent && frame.is_silent() {
            tracing::warn!(samples = frame.len(), "dropping all-zero audio chunk");
            return;
        }
        ready.push(frame);
    }
}

/// Re-blocks a stream of frames into fixed-size sample blocks
///
/// Codecs like Opus accept only specific frame sizes, while capture callbacks
/// deliver whatever the device hands out.
#[derive(Debug)]
pub struct FrameBlocker {
    pending: Vec<f32>,
    block_len: usize,
}

impl FrameBlocker {
    /// Create a blocker emitting `block_len` samples at a time
    #[must_use]
    pub fn new(block_len: usize) -> Self {
        Self {
            pending: Vec::with_capacity(block_len * 2),
            block_len: block_len.max(1),
        }
    }

    /// Feed samples, returning every complete block
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let full = self.pending.len() / self.block_len;
        let mut blocks = Vec::with_capacity(full);
        for _ in 0..full {
            let rest = self.pending.split_off(self.block_len);
            blocks.push(std::mem::replace(&mut self.pending, rest));
        }
        blocks
    }

    /// Samples waiting for a full block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
