//! Server side: accept loop and request dispatch

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;

use super::{Framing, receive_frame_opt, send_frame};
use crate::config::ServerConfig;
use crate::error::{Phase, TransportError};
use crate::voice::wav;
use crate::{Error, Result};

/// Fallback reply sample rate
const FALLBACK_SAMPLE_RATE: u32 = 16_000;

/// Fallback reply length
const FALLBACK_DURATION_MS: u32 = 1000;

/// Turns one request payload into one reply payload
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the reply for `request`
    ///
    /// # Errors
    ///
    /// Any error; the server answers with a silent WAV instead
    async fn handle(&self, request: Vec<u8>) -> Result<Vec<u8>>;
}

#[async_trait]
impl<H: RequestHandler + ?Sized> RequestHandler for Arc<H> {
    async fn handle(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        (**self).handle(request).await
    }
}

/// Accepts connections and serves them one at a time
pub struct Server<H> {
    listener: TcpListener,
    handler: H,
    framing: Framing,
    receive_timeout: Duration,
    send_timeout: Duration,
}

impl<H: RequestHandler> Server<H> {
    /// Bind the listening socket with address reuse enabled
    ///
    /// # Errors
    ///
    /// Returns error if the address does not resolve or cannot be bound
    pub async fn bind(config: &ServerConfig, framing: Framing, handler: H) -> Result<Self> {
        let addr = tokio::net::lookup_host(&config.bind)
            .await?
            .next()
            .ok_or_else(|| Error::Config(format!("bind address did not resolve: {}", config.bind)))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(16)?;

        tracing::info!(addr = %listener.local_addr()?, "server listening");

        Ok(Self {
            listener,
            handler,
            framing,
            receive_timeout: config.receive_timeout,
            send_timeout: config.send_timeout,
        })
    }

    /// Address actually bound (useful with port 0)
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves
    ///
    /// A failing connection is logged and never stops the loop. A connection being
    /// served when `shutdown` fires is dropped.
    ///
    /// # Errors
    ///
    /// Returns error only if accepting fails
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    tokio::select! {
                        () = &mut shutdown => {
                            tracing::info!("server shutting down");
                            return Ok(());
                        }
                        result = self.serve_connection(stream) => {
                            if let Err(e) = result {
                                tracing::warn!(peer = %peer, error = %e, "exchange failed");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Serve forever
    ///
    /// # Errors
    ///
    /// Returns error only if accepting fails
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> std::result::Result<(), TransportError> {
        let request = timeout(
            self.receive_timeout,
            receive_frame_opt(&mut stream, &self.framing),
        )
        .await
        .map_err(|_| TransportError::Timeout(Phase::Receive))??;

        let Some(request) = request else {
            tracing::debug!("peer closed without a request");
            return Ok(());
        };
        tracing::info!(bytes = request.len(), "request received");

        let reply = self.reply_for(request).await;

        timeout(
            self.send_timeout,
            send_frame(&mut stream, &reply, &self.framing),
        )
        .await
        .map_err(|_| TransportError::Timeout(Phase::Send))??;

        tracing::info!(bytes = reply.len(), "reply sent");
        Ok(())
    }

    /// Handler reply, replaced by silence when it fails or is empty
    async fn reply_for(&self, request: Vec<u8>) -> Vec<u8> {
        match self.handler.handle(request).await {
            Ok(reply) if !reply.is_empty() => return reply,
            Ok(_) => tracing::warn!("handler returned an empty reply, sending silence"),
            Err(e) => tracing::error!(error = %e, "handler failed, sending silence"),
        }
        silent_reply()
    }
}

/// One second of 16 kHz mono silence
#[must_use]
pub fn silent_reply() -> Vec<u8> {
    match wav::silent(FALLBACK_SAMPLE_RATE, 1, FALLBACK_DURATION_MS) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode silent reply");
            vec![0; 2]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_reply_is_one_second_wav() {
        let audio = wav::decode(&silent_reply()).unwrap();
        assert_eq!(audio.sample_rate(), 16_000);
        assert_eq!(audio.channels(), 1);
        assert_eq!(audio.samples().len(), 16_000);
    }
}
