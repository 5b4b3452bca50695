//! Interactive client session
//!
//! ENTER toggles listening. While active, each turn captures one utterance, sends it
//! to the server, saves and plays the reply, then pauses briefly so the reply is not
//! picked up as the next utterance.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::transport::Exchange;
use crate::voice::{
    BlockReader, CancelToken, CaptureOutcome, Microphone, PlaybackChain, capture_utterance, wav,
};
use crate::{Error, Result};

/// Poll interval while inactive
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Opens a block source on the capture thread
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn BlockReader>> + Send + Sync>;

/// What one turn produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// A reply of this many bytes was received and played
    Replied { bytes: usize },
    /// Nothing worth sending was captured
    NoSpeech,
    /// Listening was switched off mid-capture
    Cancelled,
}

/// Toggle-to-talk client loop
pub struct Session {
    config: Config,
    exchange: Exchange,
    players: Arc<PlaybackChain>,
    source: SourceFactory,
    active: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl Session {
    /// Session using the configured microphone, server and players
    #[must_use]
    pub fn new(config: Config) -> Self {
        let audio = config.audio.clone();
        let source: SourceFactory = Arc::new(move || {
            Microphone::open(&audio).map(|mic| Box::new(mic) as Box<dyn BlockReader>)
        });
        Self {
            exchange: Exchange::new(&config.network),
            players: Arc::new(PlaybackChain::from_names(&config.client.players)),
            source,
            active: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
            config,
        }
    }

    /// Replace the audio source
    #[must_use]
    pub fn with_source(mut self, source: SourceFactory) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_players(mut self, players: PlaybackChain) -> Self {
        self.players = Arc::new(players);
        self
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchange = exchange;
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Switch listening on or off
    ///
    /// Switching off cancels a capture in progress; switching on clears that request.
    #[must_use]
    pub fn toggle(&self) -> bool {
        toggle(&self.active, &self.cancel)
    }

    /// Capture, exchange, save and play one utterance
    ///
    /// # Errors
    ///
    /// Returns error if the audio source or the exchange fails
    pub async fn turn(&self) -> Result<Turn> {
        let source = Arc::clone(&self.source);
        let vad = self.config.vad.clone();
        let cancel = self.cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut reader = source()?;
            capture_utterance(&mut reader, &vad, &cancel)
        })
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))??;

        let utterance = match outcome {
            CaptureOutcome::Success(utterance) if !utterance.is_empty() => utterance,
            CaptureOutcome::Success(_) | CaptureOutcome::NoSpeechDetected => {
                return Ok(Turn::NoSpeech);
            }
            CaptureOutcome::Cancelled => return Ok(Turn::Cancelled),
        };

        let audio = wav::encode(&utterance)?;
        if let Some(path) = &self.config.client.recording_path {
            if let Err(e) = tokio::fs::write(path, &audio).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to save recording");
            }
        }

        tracing::info!(
            duration_ms = utterance.duration_ms(),
            bytes = audio.len(),
            server = %self.exchange.addr(),
            "sending utterance"
        );
        let response_path = self.config.client.response_path.clone();
        let bytes = self.exchange.run_to_file(&audio, &response_path).await?;

        self.play(&response_path).await;
        tokio::time::sleep(self.config.client.anti_echo).await;
        Ok(Turn::Replied { bytes })
    }

    async fn play(&self, path: &Path) {
        let players = Arc::clone(&self.players);
        let path = path.to_path_buf();
        match tokio::task::spawn_blocking(move || players.play(&path)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "reply playback failed"),
            Err(e) => tracing::warn!(error = %e, "playback task failed"),
        }
    }

    /// Run until Ctrl+C
    ///
    /// Communication failures are logged and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns error if the Ctrl+C handler cannot be installed
    pub async fn run(self) -> Result<()> {
        let listener = spawn_key_listener(Arc::clone(&self.active), self.cancel.clone());
        println!("Inactive. Press ENTER to start listening.");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            if !self.is_active() {
                tokio::select! {
                    result = &mut ctrl_c => {
                        result?;
                        break;
                    }
                    () = tokio::time::sleep(IDLE_POLL) => continue,
                }
            }

            tokio::select! {
                result = &mut ctrl_c => {
                    self.cancel.cancel();
                    result?;
                    break;
                }
                turn = self.turn() => match turn {
                    Ok(Turn::Replied { bytes }) => tracing::debug!(bytes, "turn complete"),
                    Ok(Turn::NoSpeech) => tracing::info!("nothing captured, listening again"),
                    Ok(Turn::Cancelled) => tracing::debug!("capture cancelled"),
                    Err(e @ Error::Transport(_)) => {
                        tracing::warn!(error = %e, "could not reach the server");
                    }
                    Err(e) => tracing::error!(error = %e, "turn failed"),
                },
            }
        }

        listener.abort();
        tracing::info!("session ended");
        Ok(())
    }
}

fn toggle(active: &AtomicBool, cancel: &CancelToken) -> bool {
    let now_active = !active.fetch_xor(true, Ordering::SeqCst);
    if now_active {
        cancel.reset();
    } else {
        cancel.cancel();
    }
    now_active
}

/// Toggle listening on each line read from stdin
fn spawn_key_listener(active: Arc<AtomicBool>, cancel: CancelToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if toggle(&active, &cancel) {
                println!("Listening. Speak... (ENTER to stop)");
            } else {
                println!("Inactive. Press ENTER to start listening.");
            }
        }
        tracing::debug!("stdin closed, key listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_and_cancels_on_deactivate() {
        let session = Session::new(Config::default());
        assert!(!session.is_active());

        assert!(session.toggle());
        assert!(session.is_active());
        assert!(!session.cancel.is_cancelled());

        assert!(!session.toggle());
        assert!(session.cancel.is_cancelled());

        assert!(session.toggle());
        assert!(!session.cancel.is_cancelled());
    }
}
