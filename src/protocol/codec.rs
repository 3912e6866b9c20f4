//! Length-prefixed framing: `[4-byte big-endian length][UTF-8 JSON payload]`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ChainError, Result};

use super::message::Envelope;

/// Frames larger than this are refused rather than allocated, bounding
/// resource use against a misbehaving or hostile peer.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|_| ChainError::FrameTruncated)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ChainError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| ChainError::FrameTruncated)?;

    let text = String::from_utf8(body).map_err(|e| ChainError::InvalidUtf8(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| ChainError::InvalidJson(e.to_string()))
}

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let text = serde_json::to_string(envelope)
        .map_err(|e| ChainError::InvalidJson(e.to_string()))?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ChainError::FrameTooLarge(text.len()));
    }
    let len = (text.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::Payload;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_an_envelope() {
        let env = Envelope::new(Payload::Ping {}, "h:1");
        let mut buf = Vec::new();
        write_envelope(&mut buf, &env).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let back = read_envelope(&mut cursor).await.unwrap();
        assert_eq!(back.sender, "h:1");
    }

    #[tokio::test]
    async fn rejects_oversized_length_prefix() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let err = read_envelope(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ChainError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn rejects_truncated_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(b"short");
        let mut cursor = Cursor::new(buf);
        let err = read_envelope(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ChainError::FrameTruncated));
    }

    #[tokio::test]
    async fn rejects_invalid_json() {
        let mut buf = Vec::new();
        let body = b"not json";
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);
        let mut cursor = Cursor::new(buf);
        let err = read_envelope(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidJson(_)));
    }
}
