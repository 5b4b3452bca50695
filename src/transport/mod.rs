//! Length-prefixed frame transport
//!
//! A frame is an 8-byte big-endian unsigned length followed by exactly that many
//! payload bytes. Each exchange is one frame in and one frame out over a fresh
//! connection.

mod client;
mod server;

pub use client::Exchange;
pub use server::{RequestHandler, Server, silent_reply};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::NetworkConfig;
use crate::error::TransportError;

/// Size of the length prefix
pub const HEADER_LEN: usize = 8;

/// Default I/O chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default upper bound on an accepted payload (256 MiB)
pub const DEFAULT_MAX_FRAME_LEN: u64 = 256 * 1024 * 1024;

/// Chunking and size limits for frame I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    /// Largest single read or write
    pub chunk_size: usize,
    /// Largest payload a receiver accepts
    pub max_frame_len: u64,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl From<&NetworkConfig> for Framing {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_frame_len: config.max_frame_len,
        }
    }
}

/// Write one frame and flush it
///
/// # Errors
///
/// Returns `TransportError::WriteFailed` if the connection fails mid-write
pub async fn send_frame<W>(
    writer: &mut W,
    payload: &[u8],
    framing: &Framing,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = (payload.len() as u64).to_be_bytes();
    writer
        .write_all(&header)
        .await
        .map_err(TransportError::WriteFailed)?;

    for chunk in payload.chunks(framing.chunk_size.max(1)) {
        writer
            .write_all(chunk)
            .await
            .map_err(TransportError::WriteFailed)?;
    }

    writer.flush().await.map_err(TransportError::WriteFailed)?;
    tracing::trace!(bytes = payload.len(), "frame sent");
    Ok(())
}

/// Read one frame; end of stream at any point is an error
///
/// # Errors
///
/// Returns `IncompleteHeader` or `IncompleteBody` if the peer closes early,
/// `FrameTooLarge` if the announced length exceeds the limit, and `ReadFailed` on
/// other I/O errors
pub async fn receive_frame<R>(reader: &mut R, framing: &Framing) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    receive_frame_opt(reader, framing)
        .await?
        .ok_or(TransportError::IncompleteHeader { received: 0 })
}

/// Read one frame, treating a clean close before the first header byte as "no more frames"
///
/// # Errors
///
/// Same as [`receive_frame`], except that EOF before any byte yields `Ok(None)`
pub async fn receive_frame_opt<R>(
    reader: &mut R,
    framing: &Framing,
) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut received = 0;
    while received < HEADER_LEN {
        let n = reader
            .read(&mut header[received..])
            .await
            .map_err(TransportError::ReadFailed)?;
        if n == 0 {
            if received == 0 {
                return Ok(None);
            }
            return Err(TransportError::IncompleteHeader { received });
        }
        received += n;
    }

    let expected = u64::from_be_bytes(header);
    if expected > framing.max_frame_len {
        return Err(TransportError::FrameTooLarge {
            length: expected,
            limit: framing.max_frame_len,
        });
    }

    let chunk_size = framing.chunk_size.max(1);
    let mut chunk = vec![0u8; chunk_size];
    let mut payload = Vec::new();
    let mut remaining = expected;
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(chunk_size, |r| r.min(chunk_size));
        let n = reader
            .read(&mut chunk[..want])
            .await
            .map_err(TransportError::ReadFailed)?;
        if n == 0 {
            return Err(TransportError::IncompleteBody {
                received: expected - remaining,
                expected,
            });
        }
        payload.extend_from_slice(&chunk[..n]);
        remaining -= n as u64;
    }

    tracing::trace!(bytes = payload.len(), "frame received");
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn header_is_big_endian_length() {
        let mut wire = Vec::new();
        send_frame(&mut wire, b"hello", &Framing::default())
            .await
            .unwrap();
        assert_eq!(&wire[..8], &[0, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&wire[8..], b"hello");
    }

    #[tokio::test]
    async fn empty_payload_is_header_only() {
        let mut wire = Vec::new();
        send_frame(&mut wire, &[], &Framing::default()).await.unwrap();
        assert_eq!(wire, vec![0u8; 8]);

        let payload = receive_frame(&mut wire.as_slice(), &Framing::default())
            .await
            .unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn short_header_reports_bytes_seen() {
        let wire = [0u8, 0, 0];
        let err = receive_frame(&mut wire.as_slice(), &Framing::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::IncompleteHeader { received: 3 }));
    }

    #[tokio::test]
    async fn clean_close_is_none_only_for_opt() {
        let wire: [u8; 0] = [];
        let framing = Framing::default();
        assert!(
            receive_frame_opt(&mut wire.as_slice(), &framing)
                .await
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            receive_frame(&mut wire.as_slice(), &framing).await,
            Err(TransportError::IncompleteHeader { received: 0 })
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_body() {
        let framing = Framing {
            chunk_size: 16,
            max_frame_len: 10,
        };
        let mut wire = 11u64.to_be_bytes().to_vec();
        wire.extend_from_slice(&[1; 11]);
        let err = receive_frame(&mut wire.as_slice(), &framing)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::FrameTooLarge {
                length: 11,
                limit: 10
            }
        ));
    }

    #[tokio::test]
    async fn header_and_body_split_across_reads() {
        let mut header = 6u64.to_be_bytes().to_vec();
        let tail = header.split_off(3);
        let mut mock = tokio_test::io::Builder::new()
            .read(&header)
            .read(&tail)
            .read(b"ab")
            .read(b"cdef")
            .build();

        let payload = receive_frame(&mut mock, &Framing::default()).await.unwrap();
        assert_eq!(payload, b"abcdef");
    }

    #[tokio::test]
    async fn body_spanning_many_chunks() {
        let framing = Framing {
            chunk_size: 7,
            ..Framing::default()
        };
        let payload: Vec<u8> = (0..=255).cycle().take(1000).collect();
        let mut wire = Vec::new();
        send_frame(&mut wire, &payload, &framing).await.unwrap();
        let received = receive_frame(&mut wire.as_slice(), &framing).await.unwrap();
        assert_eq!(received, payload);
    }
}
