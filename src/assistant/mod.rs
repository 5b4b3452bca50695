//! Server-side assistant: transcription, intents, LLM and speech synthesis
//!
//! ```text
//! WAV ─▶ Transcriber ─▶ IntentRouter ─┬─▶ canned reply ─┐
//!                                     └─▶ ChatModel ────┴─▶ SpeechSynthesizer ─▶ WAV
//! ```

pub mod intent;
pub mod llm;
pub mod stt;
pub mod tts;

use async_trait::async_trait;
use tokio::sync::Mutex;

pub use intent::{Intent, IntentRouter};
pub use llm::{ChatModel, Conversation, Message, OllamaClient, Role};
pub use stt::{HttpTranscriber, LazyTranscriber, ModelHandle, Transcriber};
pub use tts::{CommandSynthesizer, SpeechSynthesizer, SynthesizerChain};

use crate::Result;
use crate::config::ServerConfig;
use crate::transport::RequestHandler;

/// Reply when nothing intelligible was heard
pub const NOT_UNDERSTOOD_REPLY: &str = "I didn't catch that, could you say it again more clearly?";

/// Answers spoken requests with spoken replies
pub struct Assistant {
    transcriber: Box<dyn Transcriber>,
    intents: IntentRouter,
    model: Box<dyn ChatModel>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    conversation: Mutex<Conversation>,
}

impl Assistant {
    #[must_use]
    pub fn new(
        transcriber: Box<dyn Transcriber>,
        intents: IntentRouter,
        model: Box<dyn ChatModel>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        system_prompt: &str,
    ) -> Self {
        Self {
            transcriber,
            intents,
            model,
            synthesizer,
            conversation: Mutex::new(Conversation::new(system_prompt)),
        }
    }

    /// Assistant backed by the configured HTTP services and TTS programs
    ///
    /// # Errors
    ///
    /// Returns error if an HTTP client cannot be built
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let stt_config = config.clone();
        let transcriber = LazyTranscriber::new(move || Ok(HttpTranscriber::from_config(&stt_config)));

        Ok(Self::new(
            Box::new(transcriber),
            IntentRouter::new(config.friends_file.clone()),
            Box::new(OllamaClient::from_config(config)?),
            Box::new(SynthesizerChain::from_commands(&config.tts)),
            &config.system_prompt,
        ))
    }

    /// Text reply for a transcript; never fails
    pub async fn reply_text(&self, transcript: &str) -> String {
        let mut conversation = self.conversation.lock().await;

        let reply = if transcript.trim().is_empty() {
            NOT_UNDERSTOOD_REPLY.to_string()
        } else if let Some(reply) = self.intents.handle(transcript) {
            reply
        } else {
            let messages = conversation.request(transcript);
            match self.model.chat(&messages).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(error = %e, "LLM request failed");
                    llm::UNAVAILABLE_REPLY.to_string()
                }
            }
        };

        conversation.record(transcript, &reply);
        reply
    }

    /// Snapshot of the conversation so far
    pub async fn history(&self) -> Vec<Message> {
        self.conversation.lock().await.history().to_vec()
    }
}

#[async_trait]
impl RequestHandler for Assistant {
    async fn handle(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        let transcript = match self.transcriber.transcribe(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "transcription failed");
                String::new()
            }
        };
        tracing::info!(transcript = %transcript, "user said");

        let reply = self.reply_text(&transcript).await;
        tracing::info!(reply = %reply, "assistant replied");

        self.synthesizer.synthesize(&reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct Heard(&'static str);

    #[async_trait]
    impl Transcriber for Heard {
        async fn transcribe(&self, _wav: &[u8]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Echo;

    #[async_trait]
    impl ChatModel for Echo {
        async fn chat(&self, messages: &[Message]) -> Result<String> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(format!("you said {last} ({} messages)", messages.len()))
        }
    }

    struct Down;

    #[async_trait]
    impl ChatModel for Down {
        async fn chat(&self, _messages: &[Message]) -> Result<String> {
            Err(Error::Llm("offline".to_string()))
        }
    }

    struct TextAsBytes;

    #[async_trait]
    impl SpeechSynthesizer for TextAsBytes {
        fn name(&self) -> &str {
            "bytes"
        }

        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            Ok(text.as_bytes().to_vec())
        }
    }

    fn assistant(heard: &'static str, model: Box<dyn ChatModel>) -> Assistant {
        Assistant::new(
            Box::new(Heard(heard)),
            IntentRouter::default(),
            model,
            Box::new(TextAsBytes),
            "sys",
        )
    }

    #[tokio::test]
    async fn llm_reply_is_synthesized_and_recorded() {
        let assistant = assistant("hello there", Box::new(Echo));
        let reply = assistant.handle(b"wav".to_vec()).await.unwrap();
        assert_eq!(reply, b"you said hello there (2 messages)");

        let history = assistant.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn history_reaches_the_model() {
        let assistant = assistant("again", Box::new(Echo));
        assistant.reply_text("first").await;
        assert_eq!(
            assistant.reply_text("second").await,
            "you said second (4 messages)"
        );
    }

    #[tokio::test]
    async fn empty_transcript_asks_to_repeat() {
        let assistant = assistant("   ", Box::new(Echo));
        let reply = assistant.handle(Vec::new()).await.unwrap();
        assert_eq!(reply, NOT_UNDERSTOOD_REPLY.as_bytes());
    }

    #[tokio::test]
    async fn intents_bypass_the_model() {
        let assistant = assistant("shut up", Box::new(Down));
        let reply = assistant.reply_text("shut up").await;
        assert_eq!(reply, "Okay, I'll be quiet.");
    }

    #[tokio::test]
    async fn model_failure_gives_apology() {
        let assistant = assistant("what is rust", Box::new(Down));
        assert_eq!(
            assistant.reply_text("what is rust").await,
            llm::UNAVAILABLE_REPLY
        );
    }
}
