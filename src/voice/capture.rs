//! Capture loop
//!
//! Drives the segmenter from a block source, observes cancellation once per block,
//! and applies the recalibration retry policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::block::{BlockReader, Utterance};
use super::calibrate::{CalibrationResult, Calibrator};
use super::segmenter::{Segment, Segmenter, Step};
use crate::Result;
use crate::config::{CaptureMode, VadConfig};

/// Cooperative cancellation flag shared between a listener and the capture loop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request before starting a new capture
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of a capture; none of these is an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A complete utterance
    Success(Utterance),
    /// No speech within the wait budget
    NoSpeechDetected,
    /// Cancelled; nothing was kept
    Cancelled,
}

/// Run one segmentation pass with fixed thresholds
///
/// Cancellation is checked before and after every read, so it is observed within one
/// block duration. A cancelled capture never yields partial audio.
///
/// # Errors
///
/// Returns error if the block source fails
pub fn capture<R: BlockReader + ?Sized>(
    source: &mut R,
    config: &VadConfig,
    calibration: CalibrationResult,
    cancel: &CancelToken,
) -> Result<CaptureOutcome> {
    let mut segmenter = Segmenter::new(config, calibration, source.format());

    loop {
        if cancel.is_cancelled() {
            tracing::info!("capture cancelled");
            return Ok(CaptureOutcome::Cancelled);
        }

        let block = source.read_block()?;

        if cancel.is_cancelled() {
            tracing::info!("capture cancelled");
            return Ok(CaptureOutcome::Cancelled);
        }

        match segmenter.push(block) {
            Step::Continue => {}
            Step::Finished(Segment::Utterance(utterance)) => {
                tracing::info!(
                    duration_ms = utterance.duration_ms(),
                    "utterance captured"
                );
                return Ok(CaptureOutcome::Success(utterance));
            }
            Step::Finished(Segment::NoSpeech) => return Ok(CaptureOutcome::NoSpeechDetected),
        }
    }
}

/// Capture one utterance, recalibrating on "no speech"
///
/// Calibration runs before every attempt. After `max_calibration_retries` retries
/// without speech, returns `NoSpeechDetected`, or a silent utterance of
/// `silent_fallback_ms` when that fallback is configured.
///
/// # Errors
///
/// Returns error if the block source fails
pub fn capture_utterance<R: BlockReader + ?Sized>(
    source: &mut R,
    config: &VadConfig,
    cancel: &CancelToken,
) -> Result<CaptureOutcome> {
    if matches!(config.mode, CaptureMode::Fixed { .. }) {
        let thresholds = CalibrationResult::fixed(config.min_threshold, config.hysteresis);
        return capture(source, config, thresholds, cancel);
    }

    let calibrator = Calibrator::from_config(config);
    for attempt in 0..=config.max_calibration_retries {
        if cancel.is_cancelled() {
            return Ok(CaptureOutcome::Cancelled);
        }

        let Some(calibration) = calibrator.calibrate(source, config.calibration_ms, cancel)?
        else {
            tracing::info!("capture cancelled during calibration");
            return Ok(CaptureOutcome::Cancelled);
        };
        match capture(source, config, calibration, cancel)? {
            CaptureOutcome::NoSpeechDetected => {
                tracing::debug!(attempt, "no speech, recalibrating");
            }
            outcome => return Ok(outcome),
        }
    }

    if let Some(duration_ms) = config.silent_fallback_ms {
        let format = source.format();
        tracing::warn!(
            retries = config.max_calibration_retries,
            duration_ms,
            "no speech after retries, sending silent utterance"
        );
        return Ok(CaptureOutcome::Success(Utterance::silent(
            format.sample_rate,
            format.channels,
            duration_ms,
        )));
    }

    tracing::info!(
        retries = config.max_calibration_retries,
        "no speech detected"
    );
    Ok(CaptureOutcome::NoSpeechDetected)
}
