//! Framing: one UTF-8 line per direction, terminated by `\n`. No length prefix, no version byte.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest accepted line, excluding the terminator.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Listener reply prefix; the local service name follows.
pub const ACK_PREFIX: &str = "Received by : ";

/// Reply recorded when a peer closes without answering.
pub const NO_RESPONSE: &str = "no response";

/// The acknowledgment a listener sends back for every request.
pub fn acknowledgment(service_name: &str) -> String {
    format!("{ACK_PREFIX}{service_name}")
}

/// Encode one line: text plus `\n`.
pub fn encode_line(text: &str) -> Result<Vec<u8>, ProtocolError> {
    if text.contains('\n') {
        return Err(ProtocolError::EmbeddedNewline);
    }
    if text.len() > MAX_LINE_LEN {
        return Err(ProtocolError::TooLong);
    }
    let mut out = Vec::with_capacity(text.len() + 1);
    out.extend_from_slice(text.as_bytes());
    out.push(b'\n');
    Ok(out)
}

/// Write one line and flush.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<(), ProtocolError> {
    let bytes = encode_line(text)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one line. `Ok(None)` when the peer closed without sending anything.
///
/// A final line without terminator is accepted. A trailing `\r` is stripped.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>, ProtocolError> {
    let mut buf = Vec::new();
    let limit = (MAX_LINE_LEN + 2) as u64;
    let n = reader.take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > MAX_LINE_LEN {
        return Err(ProtocolError::TooLong);
    }
    Ok(Some(String::from_utf8(buf)?))
}

/// [`read_line`] with an optional deadline. `None` waits forever.
pub async fn read_line_within<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    deadline: Option<Duration>,
) -> Result<Option<String>, ProtocolError> {
    match deadline {
        Some(d) => tokio::time::timeout(d, read_line(reader))
            .await
            .map_err(|_| ProtocolError::TimedOut)?,
        None => read_line(reader).await,
    }
}

/// Malformed, oversized, late or failed line exchange.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("line longer than {MAX_LINE_LEN} bytes")]
    TooLong,
    #[error("line contains a newline")]
    EmbeddedNewline,
    #[error("peer closed before sending a line")]
    MissingLine,
    #[error("timed out waiting for a line")]
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read_all(bytes: &[u8]) -> Vec<Result<Option<String>, ProtocolError>> {
        let mut r = BufReader::new(bytes);
        let mut out = Vec::new();
        loop {
            let line = read_line(&mut r).await;
            let done = matches!(line, Ok(None) | Err(_));
            out.push(line);
            if done {
                return out;
            }
        }
    }

    #[test]
    fn ack_text() {
        assert_eq!(acknowledgment("ba524b"), "Received by : ba524b");
    }

    #[test]
    fn encode_appends_newline() {
        assert_eq!(encode_line("ping").unwrap(), b"ping\n");
        assert!(matches!(encode_line("a\nb"), Err(ProtocolError::EmbeddedNewline)));
    }

    #[tokio::test]
    async fn reads_lines_in_order() {
        let lines = read_all(b"ping\r\npong\nlast").await;
        let texts: Vec<_> = lines.into_iter().map(|l| l.unwrap()).collect();
        assert_eq!(
            texts,
            [Some("ping".into()), Some("pong".into()), Some("last".into()), None]
        );
    }

    #[tokio::test]
    async fn empty_stream_is_none() {
        let mut r = BufReader::new(&b""[..]);
        assert!(read_line(&mut r).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_line_is_empty_string() {
        let mut r = BufReader::new(&b"\n"[..]);
        assert_eq!(read_line(&mut r).await.unwrap().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn invalid_utf8_rejected() {
        let mut r = BufReader::new(&b"\xff\xfe\n"[..]);
        assert!(matches!(read_line(&mut r).await, Err(ProtocolError::InvalidUtf8(_))));
    }

    #[tokio::test]
    async fn oversized_line_rejected() {
        let mut big = vec![b'x'; MAX_LINE_LEN + 10];
        big.push(b'\n');
        let mut r = BufReader::new(&big[..]);
        assert!(matches!(read_line(&mut r).await, Err(ProtocolError::TooLong)));
    }

    #[tokio::test]
    async fn deadline_expires() {
        let (client, _server) = tokio::io::duplex(64);
        let mut r = BufReader::new(client);
        let res = read_line_within(&mut r, Some(Duration::from_millis(20))).await;
        assert!(matches!(res, Err(ProtocolError::TimedOut)));
    }

    #[tokio::test]
    async fn write_then_read() {
        let (mut a, b) = tokio::io::duplex(64);
        write_line(&mut a, "hello").await.unwrap();
        drop(a);
        let mut r = BufReader::new(b);
        assert_eq!(read_line(&mut r).await.unwrap().as_deref(), Some("hello"));
        assert!(read_line(&mut r).await.unwrap().is_none());
    }
}
