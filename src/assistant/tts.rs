//! Text-to-speech (TTS)

use std::process::Stdio;

use async_trait::async_trait;

use crate::config::TtsCommand;
use crate::{Error, Result};

/// Turns text into WAV audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Synthesize `text` to WAV bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts` if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Runs an external program that writes a WAV file
///
/// Arguments may contain `{text}` and `{out}`, replaced by the text and the output
/// path. Without `{text}` the text is appended as the last argument.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
}

impl CommandSynthesizer {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    #[must_use]
    pub fn from_command(command: &TtsCommand) -> Self {
        Self::new(command.program.clone(), command.args.clone())
    }

    fn render_args(&self, text: &str, out: &str) -> Vec<String> {
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{out}", out).replace("{text}", text))
            .collect();
        if !self.args.iter().any(|a| a.contains("{text}")) {
            args.push(text.to_string());
        }
        args
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let program = which::which(&self.program)
            .map_err(|_| Error::Tts(format!("{} not found", self.program)))?;

        let out = tempfile::Builder::new()
            .prefix("voxrelay-tts-")
            .suffix(".wav")
            .tempfile()?;
        let out_path = out.path().to_string_lossy().into_owned();

        let output = tokio::process::Command::new(program)
            .args(self.render_args(text, &out_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tts(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let wav = tokio::fs::read(out.path()).await?;
        tracing::debug!(backend = %self.program, bytes = wav.len(), "speech synthesized");
        Ok(wav)
    }
}

/// Tries backends in order and keeps the first non-empty result
#[derive(Default)]
pub struct SynthesizerChain {
    backends: Vec<Box<dyn SpeechSynthesizer>>,
}

impl SynthesizerChain {
    #[must_use]
    pub fn new(backends: Vec<Box<dyn SpeechSynthesizer>>) -> Self {
        Self { backends }
    }

    #[must_use]
    pub fn from_commands(commands: &[TtsCommand]) -> Self {
        Self::new(
            commands
                .iter()
                .map(|c| Box::new(CommandSynthesizer::from_command(c)) as Box<dyn SpeechSynthesizer>)
                .collect(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl SpeechSynthesizer for SynthesizerChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        for backend in &self.backends {
            match backend.synthesize(text).await {
                Ok(wav) if !wav.is_empty() => return Ok(wav),
                Ok(_) => tracing::warn!(backend = backend.name(), "backend produced no audio"),
                Err(e) => tracing::warn!(backend = backend.name(), error = %e, "backend failed"),
            }
        }
        Err(Error::Tts("every synthesis backend failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, Result<Vec<u8>>);

    #[async_trait]
    impl SpeechSynthesizer for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            match &self.1 {
                Ok(bytes) => Ok(bytes.clone()),
                Err(e) => Err(Error::Tts(e.to_string())),
            }
        }
    }

    #[test]
    fn args_are_templated() {
        let tts = CommandSynthesizer::new(
            "espeak-ng",
            vec!["-w".to_string(), "{out}".to_string(), "{text}".to_string()],
        );
        assert_eq!(tts.render_args("hola", "/tmp/a.wav"), vec!["-w", "/tmp/a.wav", "hola"]);
    }

    #[test]
    fn text_is_appended_without_placeholder() {
        let tts = CommandSynthesizer::new("say", vec!["-o".to_string(), "{out}".to_string()]);
        assert_eq!(tts.render_args("hi", "x.wav"), vec!["-o", "x.wav", "hi"]);
    }

    #[tokio::test]
    async fn chain_skips_failed_and_empty_backends() {
        let chain = SynthesizerChain::new(vec![
            Box::new(Fixed("broken", Err(Error::Tts("down".to_string())))),
            Box::new(Fixed("empty", Ok(Vec::new()))),
            Box::new(Fixed("good", Ok(vec![1, 2, 3]))),
        ]);
        assert_eq!(chain.synthesize("hi").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn missing_program_is_a_tts_error() {
        let tts = CommandSynthesizer::new("voxrelay-no-such-tts", Vec::new());
        assert!(matches!(tts.synthesize("hi").await, Err(Error::Tts(_))));
    }

    #[tokio::test]
    async fn empty_chain_fails() {
        let chain = SynthesizerChain::default();
        assert!(chain.synthesize("hi").await.is_err());
    }
}
