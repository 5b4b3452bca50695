//! Reply playback
//!
//! Players are tried in order; the first one that succeeds wins.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::block::Utterance;
use super::wav;
use crate::{Error, Result};

/// Plays a WAV file to the user
pub trait Player: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Play the file and return once it has finished (or been handed off)
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if this player cannot play the file
    fn play(&self, path: &Path) -> Result<()>;
}

/// Plays through the default cpal output device
#[derive(Debug, Default)]
pub struct CpalPlayer;

impl CpalPlayer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Play decoded audio at its own sample rate
    ///
    /// # Errors
    ///
    /// Returns error if no output device accepts the audio's sample rate
    pub fn play_audio(&self, audio: &Utterance) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let rate = SampleRate(audio.sample_rate());
        let supports = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
        };
        let supported = supports(audio.channels())
            .or_else(|| supports(2))
            .or_else(|| supports(1))
            .ok_or_else(|| {
                Error::Playback(format!(
                    "no output config for {} Hz",
                    audio.sample_rate()
                ))
            })?;
        let config: StreamConfig = supported.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = audio.sample_rate(),
            channels = config.channels,
            "audio playback initialized"
        );

        let in_channels = usize::from(audio.channels().max(1));
        let out_channels = usize::from(config.channels.max(1));
        let samples: Vec<f32> = audio
            .samples()
            .iter()
            .map(|&s| f32::from(s) / 32768.0)
            .collect();
        let frames = samples.len() / in_channels;

        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        let mut position = 0usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for out in data.chunks_mut(out_channels) {
                        if position >= frames {
                            out.fill(0.0);
                            done.store(true, Ordering::Release);
                            continue;
                        }
                        let frame = &samples[position * in_channels..(position + 1) * in_channels];
                        fan_out(frame, out);
                        position += 1;
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let timeout = Duration::from_millis(audio.duration_ms() as u64 + 500);
        let start = Instant::now();
        while !finished.load(Ordering::Acquire) && start.elapsed() < timeout {
            std::thread::sleep(Duration::from_millis(50));
        }

        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);
        tracing::debug!(frames, "playback complete");
        Ok(())
    }
}

/// Map one input frame onto one output frame
fn fan_out(frame: &[f32], out: &mut [f32]) {
    match (frame.len(), out.len()) {
        (1, _) => out.fill(frame[0]),
        (n, 1) => {
            #[allow(clippy::cast_precision_loss)]
            let mean = frame.iter().sum::<f32>() / n as f32;
            out[0] = mean;
        }
        (n, _) => {
            for (k, sample) in out.iter_mut().enumerate() {
                *sample = frame[k % n];
            }
        }
    }
}

impl Player for CpalPlayer {
    fn name(&self) -> &str {
        "cpal"
    }

    fn play(&self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        let audio = wav::decode(&bytes)?;
        self.play_audio(&audio)
    }
}

/// Plays through an external program found on `PATH`
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    /// `args` are passed before the file path
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Player for a well-known program name, with the arguments it needs
    #[must_use]
    pub fn for_program(program: &str) -> Self {
        let args = match program {
            "termux-media-player" => vec!["play".to_string()],
            "aplay" => vec!["-q".to_string()],
            _ => Vec::new(),
        };
        Self::new(program, args)
    }
}

impl Player for CommandPlayer {
    fn name(&self) -> &str {
        &self.program
    }

    fn play(&self, path: &Path) -> Result<()> {
        let program = which::which(&self.program)
            .map_err(|_| Error::Playback(format!("{} not found", self.program)))?;

        let status = Command::new(program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Playback(format!("{} exited with {status}", self.program)))
        }
    }
}

/// Ordered list of players
#[derive(Default)]
pub struct PlaybackChain {
    players: Vec<Box<dyn Player>>,
}

impl PlaybackChain {
    #[must_use]
    pub fn new(players: Vec<Box<dyn Player>>) -> Self {
        Self { players }
    }

    /// Build a chain from configured names; `cpal` selects the built-in player
    #[must_use]
    pub fn from_names(names: &[String]) -> Self {
        let players = names
            .iter()
            .map(|name| -> Box<dyn Player> {
                if name == "cpal" {
                    Box::new(CpalPlayer::new())
                } else {
                    Box::new(CommandPlayer::for_program(name))
                }
            })
            .collect();
        Self::new(players)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Play with the first player that succeeds
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if every player fails
    pub fn play(&self, path: &Path) -> Result<()> {
        for player in &self.players {
            match player.play(path) {
                Ok(()) => {
                    tracing::debug!(player = player.name(), "reply played");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(player = player.name(), error = %e, "player failed, trying next");
                }
            }
        }
        Err(Error::Playback("no player could play the reply".to_string()))
    }
}
