//! Local LLM via Ollama, and conversation history

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::{Error, Result};

/// History length that triggers trimming
const HISTORY_LIMIT: usize = 20;

/// Messages kept after trimming
const HISTORY_KEEP: usize = 18;

/// Sampling temperature for both endpoints
const TEMPERATURE: f32 = 0.5;

/// Reply when no endpoint answers
pub const UNAVAILABLE_REPLY: &str = "I can't reach the language model right now.";

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Rolling conversation history with a fixed system prompt
#[derive(Debug, Clone)]
pub struct Conversation {
    system_prompt: String,
    history: Vec<Message>,
}

impl Conversation {
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history: Vec::new(),
        }
    }

    /// Turns so far, oldest first, without the system prompt
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Messages for a request: system prompt, history, then `user_text`
    #[must_use]
    pub fn request(&self, user_text: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::new(Role::System, self.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(Message::new(Role::User, user_text));
        messages
    }

    /// Record one exchange, trimming once the history grows past its limit
    pub fn record(&mut self, user_text: &str, reply: &str) {
        self.history.push(Message::new(Role::User, user_text));
        self.history.push(Message::new(Role::Assistant, reply));
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_KEEP;
            self.history.drain(..excess);
        }
    }
}

/// Produces a reply for a chat
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Reply to the last message
    ///
    /// # Errors
    ///
    /// Returns `Error::Llm` or `Error::Http` if no reply was produced
    async fn chat(&self, messages: &[Message]) -> Result<String>;
}

#[derive(Serialize)]
struct Options {
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: Options,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: Options,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama client: `/api/chat`, falling back to `/api/generate`
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::new(&config.llm_url, config.llm_model.clone(), config.llm_timeout)
    }

    async fn call_chat(&self, messages: &[Message]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(url = %url, model = %self.model, "chat request");
        let response = self
            .client
            .post(&url)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                stream: false,
                options: Options {
                    temperature: TEMPERATURE,
                },
            })
            .send()
            .await?
            .error_for_status()?;
        let body: ChatResponse = response.json().await?;
        Ok(body.message.map(|m| m.content).unwrap_or_default())
    }

    async fn call_generate(&self, messages: &[Message]) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!(url = %url, model = %self.model, "generate request");
        let response = self
            .client
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt: flatten_prompt(messages),
                stream: false,
                options: Options {
                    temperature: TEMPERATURE,
                },
            })
            .send()
            .await?
            .error_for_status()?;
        let body: GenerateResponse = response.json().await?;
        Ok(body.response)
    }
}

#[async_trait]
impl ChatModel for OllamaClient {
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        match self.call_chat(messages).await {
            Ok(reply) if !reply.trim().is_empty() => return Ok(reply.trim().to_string()),
            Ok(_) => tracing::debug!("chat endpoint returned nothing, trying generate"),
            Err(e) => tracing::debug!(error = %e, "chat endpoint failed, trying generate"),
        }

        let reply = self.call_generate(messages).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(Error::Llm("empty reply from model".to_string()));
        }
        Ok(reply.to_string())
    }
}

/// Render a chat as a single prompt for completion-only endpoints
#[must_use]
pub fn flatten_prompt(messages: &[Message]) -> String {
    let mut parts = Vec::with_capacity(messages.len() + 2);
    if let Some(system) = messages.iter().find(|m| m.role == Role::System) {
        parts.push(format!("<<SYS>>\n{}\n<</SYS>>", system.content));
    }
    for message in messages {
        match message.role {
            Role::User => parts.push(format!("User: {}", message.content)),
            Role::Assistant => parts.push(format!("Assistant: {}", message.content)),
            Role::System => {}
        }
    }
    parts.push("Assistant:".to_string());
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_starts_with_system_prompt() {
        let mut conversation = Conversation::new("be brief");
        conversation.record("hi", "hello");
        let messages = conversation.request("how are you");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], Message::new(Role::System, "be brief"));
        assert_eq!(messages[3], Message::new(Role::User, "how are you"));
    }

    #[test]
    fn history_is_trimmed_past_twenty() {
        let mut conversation = Conversation::new("sys");
        for i in 0..10 {
            conversation.record(&format!("q{i}"), &format!("a{i}"));
        }
        assert_eq!(conversation.history().len(), 20);

        conversation.record("q10", "a10");
        assert_eq!(conversation.history().len(), 18);
        assert_eq!(conversation.history()[0].content, "q2");
        assert_eq!(conversation.history()[17].content, "a10");
    }

    #[test]
    fn flattened_prompt_layout() {
        let messages = vec![
            Message::new(Role::System, "sys"),
            Message::new(Role::User, "hi"),
            Message::new(Role::Assistant, "hello"),
            Message::new(Role::User, "bye"),
        ];
        assert_eq!(
            flatten_prompt(&messages),
            "<<SYS>>\nsys\n<</SYS>>\nUser: hi\nAssistant: hello\nUser: bye\nAssistant:"
        );
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::new(Role::Assistant, "x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
