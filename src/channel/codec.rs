//! Wire framing
//!
//! Both the control channel and the DAP debugger connection use
//! HTTP-style headers followed by a JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Default cap on a single message body
pub const DEFAULT_MAX_MESSAGE: usize = 100 * 1024 * 1024;

/// Read one framed message
///
/// Returns `Ok(None)` when the stream ends cleanly between messages.
pub async fn read_message<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<String>, Error> {
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.map_err(map_eof)?;

        if bytes_read == 0 {
            if saw_header {
                return Err(Error::Transport(
                    "stream ended inside message headers".to_string(),
                ));
            }
            return Ok(None);
        }

        // Empty line (just \r\n) signals end of headers
        if line == "\r\n" || line == "\n" {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        let line = line.trim();
        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = Some(value.trim().parse().map_err(|_| {
                Error::Protocol(format!("Invalid Content-Length: {}", value.trim()))
            })?);
        }
        // Ignore other headers (like Content-Type)
    }

    let len = content_length
        .ok_or_else(|| Error::Protocol("Missing Content-Length header".to_string()))?;

    if len > max_len {
        return Err(Error::Protocol(format!(
            "Content-Length too large: {} bytes (limit {})",
            len, max_len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(map_eof)?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one framed message and flush
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<(), Error> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());

    writer.write_all(header.as_bytes()).await.map_err(map_eof)?;
    writer.write_all(json.as_bytes()).await.map_err(map_eof)?;
    writer.flush().await.map_err(map_eof)?;

    Ok(())
}

fn map_eof(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => {
            Error::Transport(format!("stream closed: {}", e))
        }
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_message() {
        let data = b"Content-Length: 13\r\n\r\n{\"test\":true}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let result = read_message(&mut reader, DEFAULT_MAX_MESSAGE).await.unwrap();
        assert_eq!(result.as_deref(), Some("{\"test\":true}"));
        assert!(read_message(&mut reader, DEFAULT_MAX_MESSAGE)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_read_message_with_extra_headers() {
        let data =
            b"Content-Length: 13\r\nContent-Type: application/json\r\n\r\n{\"test\":true}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let result = read_message(&mut reader, DEFAULT_MAX_MESSAGE).await.unwrap();
        assert_eq!(result.as_deref(), Some("{\"test\":true}"));
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let data = b"Content-Length: 13\r\n\r\n{\"test\":true}";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message(&mut reader, 8).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_transport_error() {
        let data = b"Content-Length: 13\r\n\r\n{\"te";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let err = read_message(&mut reader, DEFAULT_MAX_MESSAGE).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_write_message() {
        let mut output = Vec::new();
        write_message(&mut output, "{\"test\":true}").await.unwrap();

        let expected = "Content-Length: 13\r\n\r\n{\"test\":true}";
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }
}
