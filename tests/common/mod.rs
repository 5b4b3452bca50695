//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;

use voxrelay::config::VadConfig;
use voxrelay::voice::{AudioBlock, BlockReader, CancelToken, StreamFormat};
use voxrelay::{Error, Result};

/// 16 kHz mono, 1024-frame blocks (64 ms each)
pub const FORMAT: StreamFormat = StreamFormat {
    sample_rate: 16_000,
    channels: 1,
    block_frames: 1024,
};

/// Duration of one block in [`FORMAT`]
pub const BLOCK_MS: u32 = 64;

/// Near-silence level
pub const QUIET: f32 = 0.001;

/// Speech level
pub const LOUD: f32 = 0.3;

/// Block whose RMS level is `level`
///
/// A square wave of ±amplitude has RMS equal to its amplitude.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn block_at(level: f32) -> AudioBlock {
    let amplitude = (level * 32768.0).round() as i16;
    let samples = (0..FORMAT.block_frames)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect();
    AudioBlock::new(samples, FORMAT)
}

/// Number of whole blocks covering `ms`
#[must_use]
pub fn blocks_for(ms: u32) -> usize {
    ms.div_ceil(BLOCK_MS) as usize
}

/// Block source that plays back a script of levels, then fails
pub struct ScriptedReader {
    script: VecDeque<f32>,
    reads: usize,
    cancel_at: Option<(usize, CancelToken)>,
}

impl ScriptedReader {
    /// Script of `(level, blocks)` runs
    #[must_use]
    pub fn new(runs: &[(f32, usize)]) -> Self {
        let script = runs
            .iter()
            .flat_map(|&(level, count)| std::iter::repeat_n(level, count))
            .collect();
        Self {
            script,
            reads: 0,
            cancel_at: None,
        }
    }

    /// Cancel `token` while serving read number `read` (1-based)
    #[must_use]
    pub fn cancel_at(mut self, read: usize, token: CancelToken) -> Self {
        self.cancel_at = Some((read, token));
        self
    }

    /// Blocks read so far
    #[must_use]
    pub const fn reads(&self) -> usize {
        self.reads
    }

    /// Blocks left in the script
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl BlockReader for ScriptedReader {
    fn read_block(&mut self) -> Result<AudioBlock> {
        let level = self
            .script
            .pop_front()
            .ok_or_else(|| Error::Audio("script exhausted".to_string()))?;
        self.reads += 1;
        if let Some((read, token)) = &self.cancel_at {
            if *read == self.reads {
                token.cancel();
            }
        }
        Ok(block_at(level))
    }

    fn format(&self) -> StreamFormat {
        FORMAT
    }
}

/// Plain VAD config with a short wait budget
#[must_use]
pub fn vad_config() -> VadConfig {
    VadConfig {
        onset_wait_ms: 3000,
        ..VadConfig::default()
    }
}
