//! Error types for voxrelay

use std::fmt;

use thiserror::Error;

/// Result type alias for voxrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in voxrelay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error (open, read, stalled stream)
    #[error("audio error: {0}")]
    Audio(String),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(String),

    /// Framed transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Self::Wav(e.to_string())
    }
}

/// Phase of a frame exchange, used to tell timeouts apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Send,
    Receive,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str("connect"),
            Self::Send => f.write_str("send"),
            Self::Receive => f.write_str("receive"),
        }
    }
}

/// Errors raised by the length-prefixed frame transport
///
/// All of these are recoverable by the caller; none of them is retried internally.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The TCP connection could not be established
    #[error("could not connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed before the 8-byte length prefix was complete
    #[error("incomplete frame header: got {received} of 8 bytes")]
    IncompleteHeader { received: usize },

    /// The peer closed before the announced payload was complete
    #[error("incomplete frame body: got {received} of {expected} bytes")]
    IncompleteBody { received: u64, expected: u64 },

    /// Writing to the connection failed
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// Reading from the connection failed for a reason other than EOF
    #[error("read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    /// The announced payload exceeds the configured limit
    #[error("frame of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { length: u64, limit: u64 },

    /// A phase of the exchange ran past its deadline
    #[error("{0} timed out")]
    Timeout(Phase),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_report_counts() {
        let err = TransportError::IncompleteBody {
            received: 10,
            expected: 100,
        };
        assert_eq!(err.to_string(), "incomplete frame body: got 10 of 100 bytes");

        let err = TransportError::Timeout(Phase::Receive);
        assert_eq!(err.to_string(), "receive timed out");
    }

    #[test]
    fn transport_error_converts_into_crate_error() {
        let err: Error = TransportError::IncompleteHeader { received: 3 }.into();
        assert!(matches!(
            err,
            Error::Transport(TransportError::IncompleteHeader { received: 3 })
        ));
    }
}
