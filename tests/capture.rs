//! Capture pipeline integration tests
//!
//! Drives calibration, segmentation and the capture loop from scripted block
//! sources; no audio hardware required

use voxrelay::Error;
use voxrelay::config::{CaptureMode, DeviceClass, VadConfig};
use voxrelay::voice::{
    CalibrationResult, Calibrator, CancelToken, CaptureOutcome, Segment, Segmenter, Step, capture,
    capture_utterance,
};

mod common;
use common::{FORMAT, LOUD, QUIET, ScriptedReader, block_at, blocks_for, vad_config};

fn fixed_thresholds() -> CalibrationResult {
    CalibrationResult::fixed(0.05, 0.7)
}

#[test]
fn test_calibration_uses_absolute_floor_on_quiet_input() {
    let mut reader = ScriptedReader::new(&[(QUIET, 20)]);
    let calibrator = Calibrator::new(0.015, DeviceClass::Mobile.absolute_floor(), 0.7);

    let result = calibrator
        .calibrate(&mut reader, 700, &CancelToken::new())
        .unwrap()
        .unwrap();

    assert!((result.activation_threshold() - 0.05).abs() < 1e-6);
    assert!(result.release_threshold() < result.activation_threshold());
    assert!(result.noise_floor() < 0.002);
    // 700ms at 16 kHz needs 11 whole blocks
    assert_eq!(reader.reads(), 11);
}

#[test]
fn test_speech_then_silence_yields_one_utterance() {
    let mut reader = ScriptedReader::new(&[
        (QUIET, blocks_for(700)),
        (LOUD, blocks_for(1000)),
        (QUIET, blocks_for(700)),
    ]);

    let outcome = capture_utterance(&mut reader, &vad_config(), &CancelToken::new()).unwrap();

    let CaptureOutcome::Success(utterance) = outcome else {
        panic!("expected an utterance, got {outcome:?}");
    };
    let duration = utterance.duration_ms();
    assert!(
        (1000.0..=1300.0).contains(&duration),
        "utterance spans {duration}ms"
    );
    assert_eq!(utterance.sample_rate(), 16_000);
    assert_eq!(utterance.channels(), 1);
    // Segmentation stops as soon as the silence tail is reached
    assert_eq!(reader.remaining(), 1);
}

#[test]
fn test_oscillation_above_release_is_a_single_span() {
    let config = vad_config();
    let mut segmenter = Segmenter::new(&config, fixed_thresholds(), FORMAT);

    // Hovers around activation (0.05) but never drops below release (0.035)
    for i in 0..40 {
        let level = if i % 2 == 0 { 0.06 } else { 0.04 };
        assert_eq!(segmenter.push(block_at(level)), Step::Continue);
    }

    let mut finished = None;
    for _ in 0..20 {
        if let Step::Finished(segment) = segmenter.push(block_at(QUIET)) {
            finished = Some(segment);
            break;
        }
    }

    assert!(matches!(finished, Some(Segment::Utterance(_))));
    assert_eq!(segmenter.onsets(), 1);
}

#[test]
fn test_short_burst_never_becomes_an_utterance() {
    let config = vad_config();
    let mut reader = ScriptedReader::new(&[(LOUD, 4), (QUIET, 100)]);

    let outcome = capture(&mut reader, &config, fixed_thresholds(), &CancelToken::new()).unwrap();

    assert_eq!(outcome, CaptureOutcome::NoSpeechDetected);
}

#[test]
fn test_continuous_speech_stops_at_ceiling() {
    let config = VadConfig {
        max_utterance_ms: 2000,
        ..vad_config()
    };
    let mut reader = ScriptedReader::new(&[(LOUD, 100)]);

    let outcome = capture(&mut reader, &config, fixed_thresholds(), &CancelToken::new()).unwrap();

    let CaptureOutcome::Success(utterance) = outcome else {
        panic!("expected an utterance, got {outcome:?}");
    };
    assert!(utterance.duration_ms() <= 2000.0);
    assert!(utterance.duration_ms() > 2000.0 - f64::from(common::BLOCK_MS));
}

#[test]
fn test_cancel_mid_speech_discards_audio() {
    let token = CancelToken::new();
    let mut reader =
        ScriptedReader::new(&[(QUIET, 11), (LOUD, 100)]).cancel_at(20, token.clone());

    let outcome = capture_utterance(&mut reader, &vad_config(), &token).unwrap();

    assert_eq!(outcome, CaptureOutcome::Cancelled);
    // Observed on the same block that raised it
    assert_eq!(reader.reads(), 20);
}

#[test]
fn test_cancel_during_calibration_stops_on_that_block() {
    let token = CancelToken::new();
    let mut reader =
        ScriptedReader::new(&[(QUIET, 11), (LOUD, 100)]).cancel_at(5, token.clone());

    let outcome = capture_utterance(&mut reader, &vad_config(), &token).unwrap();

    assert_eq!(outcome, CaptureOutcome::Cancelled);
    assert_eq!(reader.reads(), 5);
}

#[test]
fn test_calibration_yields_nothing_once_cancelled() {
    let token = CancelToken::new();
    let mut reader = ScriptedReader::new(&[(QUIET, 20)]).cancel_at(3, token.clone());
    let calibrator = Calibrator::new(0.015, DeviceClass::Desktop.absolute_floor(), 0.7);

    let result = calibrator.calibrate(&mut reader, 700, &token).unwrap();

    assert!(result.is_none());
    assert_eq!(reader.reads(), 3);

    // A token raised before calibration starts reads nothing
    let mut idle = ScriptedReader::new(&[(QUIET, 20)]);
    assert!(calibrator.calibrate(&mut idle, 700, &token).unwrap().is_none());
    assert_eq!(idle.reads(), 0);
}

#[test]
fn test_retries_are_capped() {
    let config = VadConfig {
        onset_wait_ms: 640,
        max_calibration_retries: 2,
        ..vad_config()
    };
    let mut reader = ScriptedReader::new(&[(QUIET, 200)]);

    let outcome = capture_utterance(&mut reader, &config, &CancelToken::new()).unwrap();

    assert_eq!(outcome, CaptureOutcome::NoSpeechDetected);
    // Three attempts of 11 calibration blocks plus 10 waiting blocks
    assert_eq!(reader.reads(), 3 * (11 + 10));
}

#[test]
fn test_silent_fallback_after_retries() {
    let config = VadConfig {
        onset_wait_ms: 640,
        max_calibration_retries: 1,
        silent_fallback_ms: Some(1000),
        ..vad_config()
    };
    let mut reader = ScriptedReader::new(&[(QUIET, 200)]);

    let outcome = capture_utterance(&mut reader, &config, &CancelToken::new()).unwrap();

    let CaptureOutcome::Success(utterance) = outcome else {
        panic!("expected the silent fallback, got {outcome:?}");
    };
    assert_eq!(utterance.samples().len(), 16_000);
    assert!(utterance.samples().iter().all(|&s| s == 0));
}

#[test]
fn test_pre_silence_gate_ignores_early_noise() {
    let config = VadConfig {
        mode: CaptureMode::PreSilenceGated { pre_silence_ms: 350 },
        ..vad_config()
    };
    let mut reader = ScriptedReader::new(&[
        (QUIET, 11),
        (LOUD, 3),
        (QUIET, 6),
        (LOUD, 16),
        (QUIET, 12),
    ]);

    let outcome = capture_utterance(&mut reader, &config, &CancelToken::new()).unwrap();

    let CaptureOutcome::Success(utterance) = outcome else {
        panic!("expected an utterance, got {outcome:?}");
    };
    // The early burst is not part of the utterance: 16 speech blocks plus 4 tail blocks
    assert_eq!(utterance.samples().len(), 20 * FORMAT.block_frames);
}

#[test]
fn test_fixed_mode_skips_calibration() {
    let config = VadConfig {
        mode: CaptureMode::Fixed { duration_ms: 640 },
        ..vad_config()
    };
    let mut reader = ScriptedReader::new(&[(QUIET, 20)]);

    let outcome = capture_utterance(&mut reader, &config, &CancelToken::new()).unwrap();

    let CaptureOutcome::Success(utterance) = outcome else {
        panic!("expected a recording, got {outcome:?}");
    };
    assert_eq!(utterance.samples().len(), 10 * FORMAT.block_frames);
    assert_eq!(reader.reads(), 10);
}

#[test]
fn test_source_failure_is_an_error() {
    let mut reader = ScriptedReader::new(&[(QUIET, 11), (LOUD, 3)]);

    let result = capture_utterance(&mut reader, &vad_config(), &CancelToken::new());

    assert!(matches!(result, Err(Error::Audio(_))));
}
