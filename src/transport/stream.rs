//! Framed byte-stream transport.
//!
//! Messages are UTF-8 JSON, delimited by newlines (the stdio convention) or
//! prefixed with a 4-byte big-endian length. Frames longer than the
//! transport's bound are never buffered whole: an overlong line is
//! discarded and reported as a framing error, an overlong length prefix
//! ends the stream.

use {
    super::{Transport, TransportKind},
    crate::{error::TransportError, limits::DEFAULT_MAX_MESSAGE_SIZE},
    async_trait::async_trait,
    bytes::Bytes,
    futures_util::{SinkExt, StreamExt},
    std::process::Stdio,
    tokio::{
        io::{AsyncRead, AsyncWrite},
        process::{Child, Command},
        sync::Mutex,
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LengthDelimitedCodec, LinesCodec},
        sync::CancellationToken,
    },
    tracing::debug,
};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameCodec {
    /// One message per line. Messages never contain raw newlines.
    #[default]
    Lines,
    LengthPrefixed,
}

enum FrameReader {
    Lines(FramedRead<BoxedRead, LinesCodec>),
    LengthPrefixed(FramedRead<BoxedRead, LengthDelimitedCodec>),
}

enum FrameWriter {
    Lines(FramedWrite<BoxedWrite, LinesCodec>),
    LengthPrefixed(FramedWrite<BoxedWrite, LengthDelimitedCodec>),
}

pub struct StreamTransport {
    reader: Mutex<FrameReader>,
    writer: Mutex<FrameWriter>,
    child: Mutex<Option<Child>>,
    closed: CancellationToken,
}

impl StreamTransport {
    /// Frames are bounded by [`DEFAULT_MAX_MESSAGE_SIZE`].
    pub fn new<R, W>(reader: R, writer: W, codec: FrameCodec) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_max_frame(reader, writer, codec, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_frame<R, W>(reader: R, writer: W, codec: FrameCodec, max_frame: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedRead = Box::new(reader);
        let writer: BoxedWrite = Box::new(writer);
        let (reader, writer) = match codec {
            FrameCodec::Lines => (
                FrameReader::Lines(FramedRead::new(
                    reader,
                    LinesCodec::new_with_max_length(max_frame),
                )),
                FrameWriter::Lines(FramedWrite::new(writer, LinesCodec::new())),
            ),
            FrameCodec::LengthPrefixed => {
                let codec = || {
                    LengthDelimitedCodec::builder()
                        .max_frame_length(max_frame)
                        .new_codec()
                };
                (
                    FrameReader::LengthPrefixed(FramedRead::new(reader, codec())),
                    FrameWriter::LengthPrefixed(FramedWrite::new(writer, codec())),
                )
            }
        };
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            child: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// This process's stdin/stdout, newline-delimited.
    pub fn stdio() -> Self {
        Self::stdio_with_max_frame(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn stdio_with_max_frame(max_frame: usize) -> Self {
        Self::with_max_frame(tokio::io::stdin(), tokio::io::stdout(), FrameCodec::Lines, max_frame)
    }

    /// Launch `program` and talk to it over its stdin/stdout. The child is
    /// killed when the transport is closed or dropped.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, TransportError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::Framing(format!(
                "child process '{program}' has no piped stdio"
            )));
        };
        let mut transport = Self::new(stdout, stdin, FrameCodec::Lines);
        transport.child = Mutex::new(Some(child));
        debug!(program = %program, "Spawned child process transport");
        Ok(transport)
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            let frame = match &mut *reader {
                FrameReader::Lines(framed) => match framed.next().await {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        // FramedRead yields a single `None` after a decode
                        // error. The codec is already discarding the rest of
                        // the line, so that `None` is not the end of input.
                        let _ = framed.next().await;
                        return Err(e.into());
                    }
                    None => return Ok(None),
                },
                FrameReader::LengthPrefixed(framed) => match framed.next().await {
                    Some(Ok(frame)) => String::from_utf8(frame.to_vec())
                        .map_err(|e| TransportError::Framing(e.to_string()))?,
                    // The codec reports an oversized prefix as invalid data
                    Some(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                        return Err(TransportError::Framing(e.to_string()));
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(None),
                },
            };
            if !frame.trim().is_empty() {
                return Ok(Some(frame));
            }
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, message: String) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        match &mut *writer {
            FrameWriter::Lines(framed) => {
                if message.contains('\n') {
                    return Err(TransportError::Framing(
                        "message contains an embedded newline".to_string(),
                    ));
                }
                framed.send(message).await?;
            }
            FrameWriter::LengthPrefixed(framed) => framed.send(Bytes::from(message)).await?,
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        if self.closed.is_cancelled() {
            return Ok(None);
        }
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            frame = self.next_frame() => frame,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        let result = match &mut *writer {
            FrameWriter::Lines(framed) => SinkExt::<String>::close(framed).await.map_err(Into::into),
            FrameWriter::LengthPrefixed(framed) => {
                SinkExt::<Bytes>::close(framed).await.map_err(TransportError::from)
            }
        };
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
        }
        // The peer may already be gone; closing an already-broken pipe is fine.
        if let Err(e) = result {
            debug!(error = %e, "Error while closing stream transport");
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(codec: FrameCodec) -> (StreamTransport, StreamTransport) {
        let (a, b) = tokio::io::duplex(4096);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (
            StreamTransport::new(a_read, a_write, codec),
            StreamTransport::new(b_read, b_write, codec),
        )
    }

    /// Sender unbounded, receiver bounded to `max_frame`.
    fn bounded_pair(codec: FrameCodec, max_frame: usize) -> (StreamTransport, StreamTransport) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (
            StreamTransport::with_max_frame(a_read, a_write, codec, usize::MAX),
            StreamTransport::with_max_frame(b_read, b_write, codec, max_frame),
        )
    }

    #[tokio::test]
    async fn test_lines_round_trip_and_eof() {
        let (left, right) = pair(FrameCodec::Lines);
        left.send(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#.to_string())
            .await
            .unwrap();
        let got = right.receive().await.unwrap().unwrap();
        assert!(got.contains("ping"));

        left.close().await.unwrap();
        left.close().await.unwrap();
        assert_eq!(right.receive().await.unwrap(), None);
        assert!(matches!(
            left.send("{}".to_string()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_length_prefixed_allows_newlines() {
        let (left, right) = pair(FrameCodec::LengthPrefixed);
        left.send("{\n\"a\": 1\n}".to_string()).await.unwrap();
        assert_eq!(right.receive().await.unwrap().unwrap(), "{\n\"a\": 1\n}");
    }

    #[tokio::test]
    async fn test_embedded_newline_rejected_for_lines() {
        let (left, _right) = pair(FrameCodec::Lines);
        let err = left.send("{\n}".to_string()).await.unwrap_err();
        assert!(matches!(err, TransportError::Framing(_)));
    }

    #[tokio::test]
    async fn test_overlong_line_is_discarded() {
        let (left, right) = bounded_pair(FrameCodec::Lines, 1024);
        let oversized = format!(r#"{{"pad":"{}"}}"#, "x".repeat(10 * 1024 * 1024));
        let sender = tokio::spawn(async move {
            left.send(oversized).await.unwrap();
            left.send(r#"{"jsonrpc":"2.0","method":"ping","id":2}"#.to_string())
                .await
                .unwrap();
            left
        });

        let err = right.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Framing(_)));
        // The reader resynchronizes on the next newline
        let next = right.receive().await.unwrap().unwrap();
        assert!(next.contains(r#""id":2"#));
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_overlong_length_prefix_rejected() {
        let (left, right) = bounded_pair(FrameCodec::LengthPrefixed, 1024);
        let sender = tokio::spawn(async move {
            let _ = left.send("y".repeat(4096)).await;
            left
        });
        let err = right.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Framing(_)));
        drop(sender.await.unwrap());
    }
}
