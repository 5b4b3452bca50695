//! Client side of one request/reply exchange

use std::path::Path;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{Framing, receive_frame, send_frame};
use crate::Result;
use crate::config::NetworkConfig;
use crate::error::{Phase, TransportError};

/// Sends one audio frame to the server and waits for the reply frame
///
/// Each exchange opens a fresh connection and closes it on every exit path. Nothing
/// is retried.
#[derive(Debug, Clone)]
pub struct Exchange {
    addr: String,
    framing: Framing,
    connect_timeout: Duration,
    send_timeout: Duration,
    receive_timeout: Duration,
}

impl Exchange {
    #[must_use]
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            addr: config.addr(),
            framing: Framing::from(config),
            connect_timeout: config.connect_timeout,
            send_timeout: config.send_timeout,
            receive_timeout: config.receive_timeout,
        }
    }

    /// Override the server address
    #[must_use]
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `audio` and return the reply payload
    ///
    /// # Errors
    ///
    /// Returns the `TransportError` of the first phase that failed or timed out
    pub async fn run(&self, audio: &[u8]) -> std::result::Result<Vec<u8>, TransportError> {
        tracing::debug!(addr = %self.addr, bytes = audio.len(), "connecting");
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout(Phase::Connect))?
            .map_err(|source| TransportError::ConnectFailed {
                addr: self.addr.clone(),
                source,
            })?;

        timeout(
            self.send_timeout,
            send_frame(&mut stream, audio, &self.framing),
        )
        .await
        .map_err(|_| TransportError::Timeout(Phase::Send))??;
        tracing::debug!(bytes = audio.len(), "audio sent, waiting for reply");

        let reply = timeout(
            self.receive_timeout,
            receive_frame(&mut stream, &self.framing),
        )
        .await
        .map_err(|_| TransportError::Timeout(Phase::Receive))??;

        tracing::info!(bytes = reply.len(), "reply received");
        Ok(reply)
    }

    /// Send `audio` and persist the reply to `path`, returning its length
    ///
    /// # Errors
    ///
    /// Returns error if the exchange fails or the file cannot be written
    pub async fn run_to_file(&self, audio: &[u8], path: &Path) -> Result<usize> {
        let reply = self.run(audio).await?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &reply).await?;
        tracing::debug!(path = %path.display(), bytes = reply.len(), "reply saved");
        Ok(reply.len())
    }
}
