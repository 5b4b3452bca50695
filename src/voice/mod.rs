//! Voice capture and playback
//!
//! Microphone blocks flow through calibration and the segmenter to produce one
//! utterance per capture. Replies are decoded and played through a chain of players.

mod block;
mod calibrate;
mod capture;
mod level;
mod microphone;
mod playback;
mod segmenter;
pub mod wav;

pub use block::{AudioBlock, BlockReader, StreamFormat, Utterance};
pub use calibrate::{CalibrationResult, Calibrator};
pub use capture::{CancelToken, CaptureOutcome, capture, capture_utterance};
pub use level::level;
pub use microphone::Microphone;
pub use playback::{CommandPlayer, CpalPlayer, PlaybackChain, Player};
pub use segmenter::{Phase, Segment, Segmenter, Step};
