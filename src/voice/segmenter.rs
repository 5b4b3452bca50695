//! Utterance segmentation state machine
//!
//! Driven one block at a time. Decides which blocks of a live stream form one
//! utterance, or that no speech arrived within the wait budget.
//!
//! ```text
//!  AwaitingPreSilence ──pre-silence ok──▶ AwaitingOnset ──level > on──▶ Voiced
//!          │                                   ▲   │                      │
//!          │                       short talk ─┘   │ wait budget          ├─ tail + talk ──▶ Utterance
//!          └────────── wait budget ────────────────┴─────────────▶ NoSpeech └─ ceiling ─────▶ Utterance
//! ```
//!
//! All durations are stream time, i.e. the sum of block durations.

use super::block::{AudioBlock, StreamFormat, Utterance};
use super::calibrate::CalibrationResult;
use super::level::level;
use crate::config::{CaptureMode, VadConfig};

/// Segmenter phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a run of silence before onset is allowed
    AwaitingPreSilence,
    /// Waiting for a block above the activation threshold
    AwaitingOnset,
    /// Collecting speech
    Voiced,
}

/// How a segmentation run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A complete utterance
    Utterance(Utterance),
    /// Nothing usable within the wait budget; recalibrate before retrying
    NoSpeech,
}

/// Result of feeding one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished(Segment),
}

/// VAD state machine for one capture attempt
#[derive(Debug)]
pub struct Segmenter {
    mode: CaptureMode,
    thresholds: CalibrationResult,
    format: StreamFormat,
    min_talk_ms: f64,
    silence_tail_ms: f64,
    tail_keep_ms: f64,
    onset_wait_ms: f64,
    max_utterance_ms: f64,
    phase: Phase,
    pre_silence_ms: f64,
    talk_ms: f64,
    silence_ms: f64,
    voiced_ms: f64,
    waited_ms: f64,
    trailing_silent_blocks: usize,
    onsets: u32,
    collected: Vec<AudioBlock>,
}

impl Segmenter {
    /// Create a segmenter for a stream of `format` with the given thresholds
    #[must_use]
    pub fn new(config: &VadConfig, thresholds: CalibrationResult, format: StreamFormat) -> Self {
        let phase = match config.mode {
            CaptureMode::PreSilenceGated { .. } => Phase::AwaitingPreSilence,
            CaptureMode::Vad => Phase::AwaitingOnset,
            CaptureMode::Fixed { .. } => Phase::Voiced,
        };
        Self {
            mode: config.mode,
            thresholds,
            format,
            min_talk_ms: f64::from(config.min_talk_ms),
            silence_tail_ms: f64::from(config.silence_tail_ms),
            tail_keep_ms: f64::from(config.tail_keep_ms),
            onset_wait_ms: f64::from(config.onset_wait_ms),
            max_utterance_ms: f64::from(config.max_utterance_ms),
            phase,
            pre_silence_ms: 0.0,
            talk_ms: 0.0,
            silence_ms: 0.0,
            voiced_ms: 0.0,
            waited_ms: 0.0,
            trailing_silent_blocks: 0,
            onsets: 0,
            collected: Vec::new(),
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of onsets seen so far, including discarded short spans
    #[must_use]
    pub const fn onsets(&self) -> u32 {
        self.onsets
    }

    #[must_use]
    pub const fn thresholds(&self) -> CalibrationResult {
        self.thresholds
    }

    /// Feed the next block
    pub fn push(&mut self, block: AudioBlock) -> Step {
        if block.overflowed() {
            tracing::warn!("audio input overflow, samples were dropped");
        }

        let dt = block.duration_ms();
        let lvl = level(block.samples());
        tracing::trace!(
            level = lvl,
            phase = ?self.phase,
            on = self.thresholds.activation_threshold(),
            off = self.thresholds.release_threshold(),
            "vu"
        );

        if let CaptureMode::Fixed { duration_ms } = self.mode {
            return self.push_fixed(block, dt, f64::from(duration_ms));
        }

        match self.phase {
            Phase::AwaitingPreSilence => self.await_pre_silence(lvl, dt),
            Phase::AwaitingOnset => {
                if lvl > self.thresholds.activation_threshold() {
                    self.start_voiced();
                    self.voiced(block, lvl, dt)
                } else {
                    self.wait(dt)
                }
            }
            Phase::Voiced => self.voiced(block, lvl, dt),
        }
    }

    fn push_fixed(&mut self, block: AudioBlock, dt: f64, duration_ms: f64) -> Step {
        self.collected.push(block);
        self.voiced_ms += dt;
        if self.voiced_ms >= duration_ms {
            tracing::debug!(duration_ms = self.voiced_ms, "fixed recording complete");
            return self.finish();
        }
        Step::Continue
    }

    fn await_pre_silence(&mut self, lvl: f32, dt: f64) -> Step {
        let CaptureMode::PreSilenceGated { pre_silence_ms } = self.mode else {
            self.phase = Phase::AwaitingOnset;
            return Step::Continue;
        };

        if lvl < self.thresholds.release_threshold() {
            self.pre_silence_ms += dt;
        } else {
            // Noise erodes the silence run instead of resetting it
            self.pre_silence_ms = (self.pre_silence_ms - dt).max(0.0);
        }

        if self.pre_silence_ms >= f64::from(pre_silence_ms) {
            tracing::debug!(pre_silence_ms = self.pre_silence_ms, "pre-silence satisfied");
            self.phase = Phase::AwaitingOnset;
        }
        self.wait(dt)
    }

    fn wait(&mut self, dt: f64) -> Step {
        self.waited_ms += dt;
        if self.waited_ms >= self.onset_wait_ms {
            tracing::debug!(waited_ms = self.waited_ms, "no speech detected");
            return Step::Finished(Segment::NoSpeech);
        }
        Step::Continue
    }

    fn start_voiced(&mut self) {
        tracing::debug!(onset = self.onsets + 1, "speech onset");
        self.phase = Phase::Voiced;
        self.onsets += 1;
        self.talk_ms = 0.0;
        self.silence_ms = 0.0;
        self.voiced_ms = 0.0;
        self.trailing_silent_blocks = 0;
        self.collected.clear();
    }

    fn voiced(&mut self, block: AudioBlock, lvl: f32, dt: f64) -> Step {
        // Never let the voiced span grow past the ceiling
        if self.voiced_ms + dt > self.max_utterance_ms && !self.collected.is_empty() {
            tracing::debug!(voiced_ms = self.voiced_ms, "utterance ceiling reached");
            return self.finish();
        }

        self.collected.push(block);
        self.voiced_ms += dt;
        self.waited_ms += dt;

        if lvl >= self.thresholds.release_threshold() {
            self.talk_ms += dt;
            // Loud blocks only decay the silence clock, at half rate
            self.silence_ms = (self.silence_ms - dt / 2.0).max(0.0);
            self.trailing_silent_blocks = 0;
        } else {
            self.silence_ms += dt;
            self.trailing_silent_blocks += 1;
        }

        if self.silence_ms >= self.silence_tail_ms {
            if self.talk_ms >= self.min_talk_ms {
                tracing::debug!(
                    talk_ms = self.talk_ms,
                    voiced_ms = self.voiced_ms,
                    "end of utterance (silence)"
                );
                self.trim_tail();
                return self.finish();
            }

            tracing::debug!(talk_ms = self.talk_ms, "too short for speech, discarding");
            self.collected.clear();
            self.phase = Phase::AwaitingOnset;
            if self.waited_ms >= self.onset_wait_ms {
                return Step::Finished(Segment::NoSpeech);
            }
            return Step::Continue;
        }

        if self.voiced_ms >= self.max_utterance_ms {
            tracing::debug!(voiced_ms = self.voiced_ms, "utterance ceiling reached");
            return self.finish();
        }

        Step::Continue
    }

    /// Drop trailing silence beyond `tail_keep_ms`
    fn trim_tail(&mut self) {
        let start = self.collected.len() - self.trailing_silent_blocks;
        let mut kept_ms = 0.0;
        let mut keep = 0;
        for block in &self.collected[start..] {
            let dt = block.duration_ms();
            if kept_ms + dt > self.tail_keep_ms {
                break;
            }
            kept_ms += dt;
            keep += 1;
        }
        self.collected.truncate(start + keep);
    }

    fn finish(&mut self) -> Step {
        let blocks = std::mem::take(&mut self.collected);
        Step::Finished(Segment::Utterance(Utterance::from_blocks(
            blocks,
            self.format,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: StreamFormat = StreamFormat {
        sample_rate: 16_000,
        channels: 1,
        block_frames: 1024,
    };

    fn block_at(level: f32) -> AudioBlock {
        #[allow(clippy::cast_possible_truncation)]
        let amplitude = (level * 32768.0).round() as i16;
        let samples = (0..FORMAT.block_frames)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        AudioBlock::new(samples, FORMAT)
    }

    fn segmenter(config: &VadConfig) -> Segmenter {
        Segmenter::new(config, CalibrationResult::fixed(0.05, 0.7), FORMAT)
    }

    fn feed(seg: &mut Segmenter, level: f32, blocks: usize) -> Option<Segment> {
        for _ in 0..blocks {
            if let Step::Finished(segment) = seg.push(block_at(level)) {
                return Some(segment);
            }
        }
        None
    }

    #[test]
    fn starts_awaiting_onset_in_plain_mode() {
        let seg = segmenter(&VadConfig::default());
        assert_eq!(seg.phase(), Phase::AwaitingOnset);
    }

    #[test]
    fn onset_enters_voiced() {
        let mut seg = segmenter(&VadConfig::default());
        assert_eq!(seg.push(block_at(0.3)), Step::Continue);
        assert_eq!(seg.phase(), Phase::Voiced);
        assert_eq!(seg.onsets(), 1);
    }

    #[test]
    fn gated_mode_needs_pre_silence() {
        let config = VadConfig {
            mode: CaptureMode::PreSilenceGated { pre_silence_ms: 350 },
            ..VadConfig::default()
        };
        let mut seg = segmenter(&config);
        assert_eq!(seg.phase(), Phase::AwaitingPreSilence);

        // Loud audio before pre-silence is ignored
        assert!(feed(&mut seg, 0.3, 3).is_none());
        assert_eq!(seg.phase(), Phase::AwaitingPreSilence);

        // 6 blocks × 64ms = 384ms of silence
        assert!(feed(&mut seg, 0.001, 6).is_none());
        assert_eq!(seg.phase(), Phase::AwaitingOnset);

        seg.push(block_at(0.3));
        assert_eq!(seg.phase(), Phase::Voiced);
    }

    #[test]
    fn noise_decays_pre_silence_instead_of_resetting() {
        let config = VadConfig {
            mode: CaptureMode::PreSilenceGated { pre_silence_ms: 350 },
            ..VadConfig::default()
        };
        let mut seg = segmenter(&config);
        // 320ms of silence, then a noisy block takes back 64ms
        feed(&mut seg, 0.001, 5);
        feed(&mut seg, 0.3, 1);
        assert_eq!(seg.phase(), Phase::AwaitingPreSilence);
        feed(&mut seg, 0.001, 1);
        assert_eq!(seg.phase(), Phase::AwaitingPreSilence);
        // 320ms again; a hard reset would still be at 128ms here
        feed(&mut seg, 0.001, 1);
        assert_eq!(seg.phase(), Phase::AwaitingOnset);
    }

    #[test]
    fn gives_up_after_onset_wait() {
        let config = VadConfig {
            onset_wait_ms: 1000,
            ..VadConfig::default()
        };
        let mut seg = segmenter(&config);
        // 16 blocks = 1024ms
        assert_eq!(feed(&mut seg, 0.001, 16), Some(Segment::NoSpeech));
    }

    #[test]
    fn brief_loud_burst_inside_speech_only_decays_silence() {
        let mut seg = segmenter(&VadConfig::default());
        feed(&mut seg, 0.3, 10);
        // 9 silent blocks = 576ms, just under the tail
        assert!(feed(&mut seg, 0.001, 9).is_none());
        // The burst only takes back 32ms, so one more silent block ends it
        assert!(feed(&mut seg, 0.3, 1).is_none());
        assert!(matches!(
            feed(&mut seg, 0.001, 1),
            Some(Segment::Utterance(_))
        ));
    }

    #[test]
    fn trailing_silence_is_trimmed() {
        let mut seg = segmenter(&VadConfig::default());
        feed(&mut seg, 0.3, 16);
        let Some(Segment::Utterance(utterance)) = feed(&mut seg, 0.001, 11) else {
            panic!("expected an utterance");
        };
        // 16 speech blocks + 4 kept tail blocks (256ms <= 300ms)
        assert_eq!(utterance.samples().len(), 20 * 1024);
    }

    #[test]
    fn short_span_is_discarded_and_onset_rearmed() {
        let mut seg = segmenter(&VadConfig::default());
        feed(&mut seg, 0.3, 2);
        assert!(feed(&mut seg, 0.001, 10).is_none());
        assert_eq!(seg.phase(), Phase::AwaitingOnset);

        feed(&mut seg, 0.3, 8);
        let Some(Segment::Utterance(utterance)) = feed(&mut seg, 0.001, 10) else {
            panic!("expected an utterance");
        };
        assert_eq!(seg.onsets(), 2);
        // Only the second span survives
        assert_eq!(utterance.samples().len(), (8 + 4) * 1024);
    }

    #[test]
    fn fixed_mode_records_duration() {
        let config = VadConfig {
            mode: CaptureMode::Fixed { duration_ms: 640 },
            ..VadConfig::default()
        };
        let mut seg = segmenter(&config);
        let Some(Segment::Utterance(utterance)) = feed(&mut seg, 0.0, 20) else {
            panic!("expected a recording");
        };
        assert_eq!(utterance.samples().len(), 10 * 1024);
    }
}
