//! Speech-to-text (STT)

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::config::ServerConfig;
use crate::{Error, Result};

/// Response from an OpenAI-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Turns WAV audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::Stt` or `Error::Http` if transcription fails
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// Posts audio to an OpenAI-compatible `/v1/audio/transcriptions` endpoint
///
/// Works with a local faster-whisper server as well as the hosted API.
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
    language: Option<String>,
    api_key: Option<String>,
}

impl HttpTranscriber {
    #[must_use]
    pub fn new(base_url: &str, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/v1/audio/transcriptions", base_url.trim_end_matches('/')),
            model,
            language: None,
            api_key: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut stt = Self::new(&config.stt_url, config.stt_model.clone());
        stt.language.clone_from(&config.stt_language);
        stt.api_key.clone_from(&config.stt_api_key);
        stt
    }

    /// Restrict recognition to one language (ISO 639-1)
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), url = %self.url, "starting transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "transcription request failed");
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            e
        })?;

        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

/// Lazily initialized, shared model
///
/// The first caller runs the initializer; concurrent callers wait for it and then
/// share the same instance. A failed initialization is retried by the next caller.
pub struct ModelHandle<T> {
    cell: OnceCell<T>,
}

impl<T> Default for ModelHandle<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

impl<T> ModelHandle<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that is already loaded
    #[must_use]
    pub fn loaded(model: T) -> Self {
        Self {
            cell: OnceCell::new_with(Some(model)),
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Get the model, loading it with `init` on first use
    ///
    /// # Errors
    ///
    /// Returns the initializer's error
    pub async fn get_or_load<F, Fut>(&self, init: F) -> Result<&T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell.get_or_try_init(init).await
    }
}

/// Transcriber created on the first request
pub struct LazyTranscriber<T> {
    handle: ModelHandle<T>,
    factory: Box<dyn Fn() -> Result<T> + Send + Sync>,
}

impl<T: Transcriber> LazyTranscriber<T> {
    pub fn new(factory: impl Fn() -> Result<T> + Send + Sync + 'static) -> Self {
        Self {
            handle: ModelHandle::new(),
            factory: Box::new(factory),
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.handle.is_loaded()
    }
}

#[async_trait]
impl<T: Transcriber> Transcriber for LazyTranscriber<T> {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        let model = self
            .handle
            .get_or_load(|| async {
                tracing::info!("loading speech recognition model");
                (self.factory)()
            })
            .await?;
        model.transcribe(wav).await
    }
}
