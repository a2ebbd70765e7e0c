//! Wire codec for the framed-socket transport.
//!
//! A frame is an 8-byte big-endian unsigned length prefix followed by
//! exactly that many payload bytes:
//!
//! ```text
//! [u64 BE length] [payload: length bytes]
//! ```
//!
//! Zero-length frames are a protocol violation on both the read and the
//! write path, and lengths above [`MAX_FRAME_LEN`] are rejected before any
//! payload allocation. Before any frame I/O is valid, the accepting side
//! emits one ASCII handshake line containing [`FRAMING_TOKEN`], terminated
//! by `\n`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::TransportError;

/// Maximum frame payload length (2^31 - 1 bytes).
pub const MAX_FRAME_LEN: u64 = i32::MAX as u64;

/// Length of the frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Token the handshake line must contain for framed I/O to be valid.
pub const FRAMING_TOKEN: &str = "FRAMING=1";

/// Handshake line emitted to every accepted peer.
pub const HANDSHAKE_LINE: &str = "HOSTBRIDGE/0.1 FRAMING=1\n";

/// Cap on the handshake line length, header included.
const MAX_HANDSHAKE_LINE: usize = 256;

/// Encode a payload into wire format.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] for an empty or oversized payload.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let length = payload.len() as u64;
    if length == 0 {
        return Err(TransportError::Protocol("cannot write zero-length frame".into()));
    }
    if length > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame too large: {length} bytes (max {MAX_FRAME_LEN})"
        )));
    }
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Write one frame to the stream.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] for an illegal payload length and
/// [`TransportError::Connection`] for I/O failures.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_frame(payload)?;
    writer
        .write_all(&encoded)
        .await
        .map_err(|e| TransportError::Connection(format!("frame write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::Connection(format!("frame flush failed: {e}")))
}

/// Read one complete frame from the stream.
///
/// Uses a read-exact loop: the call does not return until exactly the
/// advertised number of payload bytes has arrived, and early stream
/// closure is an error.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] for a zero-length or oversized
/// header and [`TransportError::Connection`] for I/O failures or EOF.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact(reader, &mut header, "frame header").await?;
    let length = u64::from_be_bytes(header);

    if length == 0 {
        return Err(TransportError::Protocol("received zero-length frame".into()));
    }
    if length > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame too large: {length} bytes (max {MAX_FRAME_LEN})"
        )));
    }

    let mut payload = vec![0u8; length as usize];
    read_exact(reader, &mut payload, "frame payload").await?;
    Ok(payload)
}

/// Read the plaintext handshake line, up to and including `\n`.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] if no newline arrives within the
/// line cap and [`TransportError::Connection`] for I/O failures or EOF.
pub async fn read_handshake_line<R>(reader: &mut R) -> Result<String, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    loop {
        let byte = reader.read_u8().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Connection("connection closed before handshake line".into())
            } else {
                TransportError::Connection(format!("handshake read failed: {e}"))
            }
        })?;
        if byte == b'\n' {
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        line.push(byte);
        if line.len() >= MAX_HANDSHAKE_LINE {
            return Err(TransportError::Protocol(format!(
                "handshake line exceeded {MAX_HANDSHAKE_LINE} bytes without newline"
            )));
        }
    }
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    reader.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Connection(format!("connection closed while reading {what}"))
        } else {
            TransportError::Connection(format!("read failed while reading {what}: {e}"))
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut cursor = bytes;
        read_frame(&mut cursor).await
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let payload = b"{\"type\":\"ping\"}";
        let encoded = encode_frame(payload).unwrap();
        assert_eq!(encoded.len(), HEADER_LEN + payload.len());
        let decoded = decode(&encoded).await.unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_single_byte_round_trip() {
        let encoded = encode_frame(b"x").unwrap();
        assert_eq!(decode(&encoded).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_large_payload_round_trip() {
        let payload = vec![0x42u8; 256 * 1024];
        let encoded = encode_frame(&payload).unwrap();
        assert_eq!(decode(&encoded).await.unwrap(), payload);
    }

    #[test]
    fn test_encode_rejects_zero_length() {
        assert!(matches!(
            encode_frame(b""),
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_write_rejects_zero_length() {
        let mut sink = Vec::new();
        let result = write_frame(&mut sink, b"").await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_read_rejects_zero_length() {
        let header = 0u64.to_be_bytes();
        assert!(matches!(
            decode(&header).await,
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_length() {
        let header = (MAX_FRAME_LEN + 1).to_be_bytes();
        assert!(matches!(
            decode(&header).await,
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_connection_error() {
        let mut encoded = encode_frame(b"hello world").unwrap();
        encoded.truncate(encoded.len() - 4);
        assert!(matches!(
            decode(&encoded).await,
            Err(TransportError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_header_is_connection_error() {
        let bytes = [0u8, 0, 0];
        assert!(matches!(
            decode(&bytes).await,
            Err(TransportError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_line_round_trip() {
        let mut cursor: &[u8] = HANDSHAKE_LINE.as_bytes();
        let line = read_handshake_line(&mut cursor).await.unwrap();
        assert!(line.contains(FRAMING_TOKEN));
        assert!(!line.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_handshake_line_without_newline_rejected() {
        let long = vec![b'A'; MAX_HANDSHAKE_LINE + 1];
        let mut cursor: &[u8] = &long;
        assert!(matches!(
            read_handshake_line(&mut cursor).await,
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_eof_is_connection_error() {
        let mut cursor: &[u8] = b"HOSTBRIDGE/0.1";
        assert!(matches!(
            read_handshake_line(&mut cursor).await,
            Err(TransportError::Connection(_))
        ));
    }
}
