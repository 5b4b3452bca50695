//! Voxrelay - two-process voice assistant
//!
//! This library provides both halves of the pipeline:
//! - Adaptive voice capture (calibration, hysteresis, utterance segmentation)
//! - Length-prefixed framed transport over TCP
//! - Server-side assistant (STT, keyword intents, local LLM, TTS)
//! - Interactive client session with reply playback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────── client ────────────────────┐
//! │ Microphone ─▶ Calibrator ─▶ Segmenter ─▶ WAV    │
//! └────────────────────────┬───────────────────────┘
//!                          │ [u64 BE length][payload]
//! ┌────────────────────────▼───────────────────────┐
//! │ Server ─▶ STT ─▶ intents / LLM ─▶ TTS ─▶ WAV    │
//! └────────────────────────┬───────────────────────┘
//!                          │ [u64 BE length][payload]
//! ┌────────────────────────▼───────────────────────┐
//! │ client: save reply ─▶ PlaybackChain             │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result, TransportError};
pub use session::{Session, Turn};
