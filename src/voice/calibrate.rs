//! Ambient noise calibration
//!
//! Samples the input for a fixed window and derives the activation and release
//! thresholds used by the segmenter.

use super::block::BlockReader;
use super::capture::CancelToken;
use super::level::level;
use crate::Result;
use crate::config::VadConfig;

/// Multiplier applied to the measured noise floor
const NOISE_MULTIPLIER: f32 = 2.0;

/// Thresholds derived from one calibration pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    activation: f32,
    release: f32,
    noise_floor: f32,
}

impl CalibrationResult {
    /// Thresholds from a known activation level, without measuring noise
    ///
    /// `hysteresis` must lie in (0, 1); the activation level is clamped to (0, 1].
    #[must_use]
    pub fn fixed(activation: f32, hysteresis: f32) -> Self {
        let activation = activation.clamp(f32::MIN_POSITIVE, 1.0);
        Self {
            activation,
            release: activation * hysteresis,
            noise_floor: 0.0,
        }
    }

    /// Level above which a block starts speech
    #[must_use]
    pub const fn activation_threshold(&self) -> f32 {
        self.activation
    }

    /// Level below which a block counts as silence
    #[must_use]
    pub const fn release_threshold(&self) -> f32 {
        self.release
    }

    /// Level measured over the calibration window
    #[must_use]
    pub const fn noise_floor(&self) -> f32 {
        self.noise_floor
    }
}

/// Derives thresholds from ambient noise
#[derive(Debug, Clone, Copy)]
pub struct Calibrator {
    min_threshold: f32,
    absolute_floor: f32,
    hysteresis: f32,
}

impl Calibrator {
    #[must_use]
    pub const fn new(min_threshold: f32, absolute_floor: f32, hysteresis: f32) -> Self {
        Self {
            min_threshold,
            absolute_floor,
            hysteresis,
        }
    }

    #[must_use]
    pub const fn from_config(config: &VadConfig) -> Self {
        Self::new(
            config.min_threshold,
            config.absolute_floor,
            config.hysteresis,
        )
    }

    /// Thresholds for a given noise floor
    #[must_use]
    pub fn thresholds_for(&self, noise_floor: f32) -> CalibrationResult {
        let activation = (noise_floor * NOISE_MULTIPLIER)
            .max(self.min_threshold)
            .max(self.absolute_floor);
        CalibrationResult {
            noise_floor,
            ..CalibrationResult::fixed(activation, self.hysteresis)
        }
    }

    /// Read at least `duration_ms` of audio and derive thresholds from it
    ///
    /// Reads whole blocks, so it may over-read up to one block; it never under-reads.
    /// Consumes audio from `source`; never run it while a segmenter is reading the same
    /// stream. Returns `None` as soon as `cancel` is raised, checked around every read.
    ///
    /// # Errors
    ///
    /// Returns error if the source fails
    pub fn calibrate<R: BlockReader + ?Sized>(
        &self,
        source: &mut R,
        duration_ms: u32,
        cancel: &CancelToken,
    ) -> Result<Option<CalibrationResult>> {
        let format = source.format();
        let wanted = format.samples_for_ms(duration_ms);
        tracing::debug!(
            duration_ms,
            block_frames = format.block_frames,
            "calibrating ambient noise"
        );

        let mut buffer: Vec<i16> = Vec::with_capacity(wanted);
        while buffer.len() < wanted {
            if cancel.is_cancelled() {
                tracing::debug!(read = buffer.len(), "calibration cancelled");
                return Ok(None);
            }
            let block = source.read_block()?;
            if cancel.is_cancelled() {
                tracing::debug!(read = buffer.len(), "calibration cancelled");
                return Ok(None);
            }
            buffer.extend_from_slice(block.samples());
        }

        let result = self.thresholds_for(level(&buffer));
        tracing::debug!(
            noise = result.noise_floor(),
            activation = result.activation_threshold(),
            release = result.release_threshold(),
            floor = self.min_threshold.max(self.absolute_floor),
            "calibration complete"
        );
        Ok(Some(result))
    }
}
