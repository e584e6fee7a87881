//! Frame codec: 4-byte big-endian length prefix followed by the payload.
//!
//! The payload is opaque at this layer. Typed callers put JSON in it; the
//! traffic router relays it verbatim without looking inside.

use crate::{Result, WireError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame payload.
///
/// Health snapshots and lease messages are tiny; the limit exists so a
/// corrupt or hostile length prefix cannot make a peer allocate gigabytes.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Read one length-prefixed frame from the reader.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(payload),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(WireError::ConnectionClosed)
        }
        Err(e) => Err(e.into()),
    }
}

/// Write one length-prefixed frame to the writer.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge(payload.len()));
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"register_agent").await.unwrap();
        let payload = read_frame(&mut server).await.unwrap();
        assert_eq!(payload, b"register_agent");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_frame(&mut client, b"").await.unwrap();
        let payload = read_frame(&mut server).await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"one").await.unwrap();
        write_frame(&mut client, b"two").await.unwrap();

        assert_eq!(read_frame(&mut server).await.unwrap(), b"one");
        assert_eq!(read_frame(&mut server).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_closed_before_frame() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Hand-write a prefix claiming a frame far past the limit.
        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            &((MAX_FRAME_SIZE as u32) + 1).to_be_bytes(),
        )
        .await
        .unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(_)));
    }
}
