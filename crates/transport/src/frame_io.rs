//! Async frame I/O over byte streams
//!
//! Neither `read_frame` nor `write_frame` is cancel-safe: abandoning one
//! midway leaves the stream positioned inside a frame, so a caller that
//! times out must abandon the stream as well.

use crate::TransportError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;
use wsgate_protocol::{ControlMessage, Frame, FrameError, MAX_PREFIX_DIGITS, parse_length_prefix};

/// Read one frame.
///
/// Returns `Ok(None)` on a clean end of stream (before any prefix byte);
/// an end of stream anywhere inside a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut digits = Vec::with_capacity(MAX_PREFIX_DIGITS);
    loop {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte).await? == 0 {
            if digits.is_empty() {
                return Ok(None);
            }
            return Err(TransportError::TruncatedPrefix);
        }
        if byte[0] == b'\n' {
            break;
        }
        digits.push(byte[0]);
        if digits.len() > MAX_PREFIX_DIGITS {
            return Err(FrameError::PrefixTooLong.into());
        }
    }

    let expected = parse_length_prefix(&digits)?;

    // Grow with the data actually received rather than trusting the prefix
    let mut payload = Vec::new();
    let got = reader.take(expected as u64).read_to_end(&mut payload).await?;
    if got != expected {
        return Err(TransportError::TruncatedFrame { expected, got });
    }

    trace!("Read frame: {} bytes", expected);
    Ok(Some(Frame::new(payload)))
}

/// Write one frame as a single buffer and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    trace!("Wrote frame: {} bytes", frame.len());
    Ok(())
}

/// Buffered frame reader
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    pub async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        read_frame(&mut self.inner).await
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

/// Frame writer
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        write_frame(&mut self.inner, frame).await
    }

    pub async fn write_control(&mut self, message: &ControlMessage) -> Result<(), TransportError> {
        self.write_frame(&Frame::new(message.encode())).await
    }

    /// Close the write side so the peer sees end of stream
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsgate_protocol::InitMessage;

    #[tokio::test]
    async fn test_frames_in_stream_order() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let writer_task = tokio::spawn(async move {
            writer.write_frame(&Frame::new(&b"first"[..])).await.unwrap();
            writer
                .write_control(&InitMessage::success("me").into())
                .await
                .unwrap();
            // Larger than the duplex buffer, forces partial reads
            writer.write_frame(&Frame::new(vec![7u8; 1000])).await.unwrap();
        });

        assert_eq!(reader.read_frame().await.unwrap().unwrap().payload(), b"first");
        let control = reader.read_frame().await.unwrap().unwrap();
        assert!(control.payload().starts_with(b"\n{\"command\":\"init\""));
        assert_eq!(reader.read_frame().await.unwrap().unwrap().len(), 1000);

        writer_task.await.unwrap();
        // Writer dropped: clean end of stream
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let mut input: &[u8] = b"0\n";
        let frame = read_frame(&mut input).await.unwrap().unwrap();
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_prefix() {
        let mut input: &[u8] = b"12";
        let result = read_frame(&mut input).await;
        assert!(matches!(result, Err(TransportError::TruncatedPrefix)));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let mut input: &[u8] = b"10\nshort";
        let result = read_frame(&mut input).await;
        assert!(matches!(
            result,
            Err(TransportError::TruncatedFrame { expected: 10, got: 5 })
        ));
    }

    #[tokio::test]
    async fn test_bad_prefix() {
        let mut input: &[u8] = b"x1\nab";
        assert!(matches!(
            read_frame(&mut input).await,
            Err(TransportError::Frame(FrameError::InvalidDigit(b'x')))
        ));

        let mut input: &[u8] = b"99999999999\n";
        assert!(matches!(
            read_frame(&mut input).await,
            Err(TransportError::Frame(FrameError::PrefixTooLong))
        ));
    }

    #[tokio::test]
    async fn test_write_to_closed_peer() {
        let (client, server) = tokio::io::duplex(8);
        drop(server);

        let mut writer = FrameWriter::new(client);
        let result = writer.write_frame(&Frame::new(&b"payload"[..])).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
