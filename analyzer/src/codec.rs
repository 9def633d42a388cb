//! JSON-RPC framing over the analyzer pipe.
//!
//! Messages are framed as `Content-Length: N\r\n\r\n{json}`, the same header
//! framing the analyzer's RPC server expects. [`FrameReader`] and
//! [`FrameWriter`] wrap the two halves of the connected stream.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Analysis responses carry every incident in the workspace; allow large frames
/// but keep a ceiling so a corrupt header cannot exhaust memory.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error on analyzer pipe: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected EOF inside frame headers")]
    TruncatedHeaders,
    #[error("frame is missing a Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value {0:?}")]
    InvalidContentLength(String),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    Oversized(usize),
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next frame. `Ok(None)` means the peer closed the pipe between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(length) = self.read_content_length().await? else {
            return Ok(None);
        };
        if length > MAX_FRAME_BYTES {
            return Err(CodecError::Oversized(length));
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_content_length(&mut self) -> Result<Option<usize>, CodecError> {
        let mut length = None;
        let mut started = false;

        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return if started {
                    Err(CodecError::TruncatedHeaders)
                } else {
                    Ok(None)
                };
            }
            started = true;

            let header = self.line.trim();
            if header.is_empty() {
                return length.map(Some).ok_or(CodecError::MissingContentLength);
            }

            if let Some((name, value)) = header.split_once(':')
                && name.trim().eq_ignore_ascii_case("content-length")
            {
                let value = value.trim();
                length = Some(
                    value
                        .parse()
                        .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?,
                );
            }
        }
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, message: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(message)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and close the write side.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn encode(message: &serde_json::Value) -> Vec<u8> {
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(message).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn reads_back_consecutive_frames() {
        let first = serde_json::json!({ "jsonrpc": "2.0", "method": "started" });
        let second = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": { "Rulesets": [] } });
        let mut buf = encode(&first).await;
        buf.extend(encode(&second).await);

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap(), Some(first));
        assert_eq!(reader.read_frame().await.unwrap(), Some(second));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn content_length_counts_bytes() {
        let message = serde_json::json!({ "message": "migração" });
        let buf = encode(&message).await;
        let text = String::from_utf8(buf.clone()).unwrap();
        let body = serde_json::to_string(&message).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap(), Some(message));
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive_and_extra_headers_ignored() {
        let body = r#"{"id":7}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["id"], 7);
    }

    #[tokio::test]
    async fn eof_inside_headers_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::TruncatedHeaders)
        ));
    }

    #[tokio::test]
    async fn missing_length_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Type: x\r\n\r\n{}"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::MissingContentLength)
        ));
    }

    #[tokio::test]
    async fn bad_length_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Length: ten\r\n\r\n"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::InvalidContentLength(_))
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocation() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::Oversized(_))
        ));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 50\r\n\r\n{\"id\":1}"[..]);
        assert!(matches!(reader.read_frame().await, Err(CodecError::Io(_))));
    }
}
