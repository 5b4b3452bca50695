//! Audio blocks, block sources and finished utterances

use crate::Result;

/// Shape of a PCM16 stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Frames per read quantum
    pub block_frames: usize,
}

impl StreamFormat {
    /// Duration in milliseconds of `samples` interleaved samples
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_ms(&self, samples: usize) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let frames = samples / usize::from(self.channels);
        frames as f64 * 1000.0 / f64::from(self.sample_rate)
    }

    /// Number of interleaved samples covering `ms` milliseconds, rounded up to a whole frame
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn samples_for_ms(&self, ms: u32) -> usize {
        let frames = (u64::from(self.sample_rate) * u64::from(ms)).div_ceil(1000);
        frames as usize * usize::from(self.channels)
    }

    /// Nominal duration of one block
    #[must_use]
    pub fn block_ms(&self) -> f64 {
        self.duration_ms(self.block_frames * usize::from(self.channels))
    }
}

/// One read quantum of signed 16-bit interleaved samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    samples: Vec<i16>,
    format: StreamFormat,
    overflowed: bool,
}

impl AudioBlock {
    /// Wrap samples read from a stream
    #[must_use]
    pub const fn new(samples: Vec<i16>, format: StreamFormat) -> Self {
        Self {
            samples,
            format,
            overflowed: false,
        }
    }

    /// Mark that the source dropped input before this block
    #[must_use]
    pub const fn with_overflow(mut self, overflowed: bool) -> Self {
        self.overflowed = overflowed;
        self
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub const fn format(&self) -> StreamFormat {
        self.format
    }

    /// Whether the source reported an input overflow
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Actual duration of this block
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.format.duration_ms(self.samples.len())
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// A live source of audio blocks (microphone, file, test script)
pub trait BlockReader {
    /// Block until the next block is available
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the device fails or stalls
    fn read_block(&mut self) -> Result<AudioBlock>;

    /// Format of the blocks this reader produces
    fn format(&self) -> StreamFormat;
}

impl<R: BlockReader + ?Sized> BlockReader for &mut R {
    fn read_block(&mut self) -> Result<AudioBlock> {
        (**self).read_block()
    }

    fn format(&self) -> StreamFormat {
        (**self).format()
    }
}

impl<R: BlockReader + ?Sized> BlockReader for Box<R> {
    fn read_block(&mut self) -> Result<AudioBlock> {
        (**self).read_block()
    }

    fn format(&self) -> StreamFormat {
        (**self).format()
    }
}

/// One contiguous span of captured speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl Utterance {
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Concatenate blocks in order
    #[must_use]
    pub fn from_blocks(blocks: Vec<AudioBlock>, format: StreamFormat) -> Self {
        let total = blocks.iter().map(|b| b.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for block in blocks {
            samples.extend(block.into_samples());
        }
        Self::new(samples, format.sample_rate, format.channels)
    }

    /// Silence of the given length
    #[must_use]
    pub fn silent(sample_rate: u32, channels: u16, duration_ms: u32) -> Self {
        let format = StreamFormat {
            sample_rate,
            channels,
            block_frames: 0,
        };
        Self::new(
            vec![0; format.samples_for_ms(duration_ms)],
            sample_rate,
            channels,
        )
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            block_frames: 0,
        }
        .duration_ms(self.samples.len())
    }
}
