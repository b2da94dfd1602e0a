use log::debug;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{FramingError, SessionError, TransportError};
use crate::{LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};

/// Dials the server, giving up after `timeout` when one is set.
pub async fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream, TransportError> {
    let dial = async {
        TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })
    };
    let stream = with_timeout(timeout, dial).await?;
    debug!("Connected to {}", addr);
    Ok(stream)
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, TransportError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Runs `op`, failing with `TransportError::TimedOut` if it outlives `timeout`.
pub async fn with_timeout<T, E, F>(timeout: Option<Duration>, op: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<TransportError>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| E::from(TransportError::TimedOut(limit)))?,
        None => op.await,
    }
}

/// Reads until `buf` is full. A peer that closes early gives `FramingError::Truncated`
/// with the byte count that did arrive.
///
/// `idle` bounds each individual read, so a slow peer that keeps sending never
/// times out; one that goes quiet for longer than `idle` does.
pub async fn read_block<R>(reader: &mut R, buf: &mut [u8], idle: Option<Duration>) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut received = 0;
    while received < buf.len() {
        let chunk = &mut buf[received..];
        let n = with_timeout(idle, async {
            reader.read(chunk).await.map_err(TransportError::Read)
        })
        .await?;
        if n == 0 {
            return Err(FramingError::Truncated {
                expected: buf.len(),
                received,
            }
            .into());
        }
        received += n;
    }
    Ok(())
}

/// Writes all of `data` without a length prefix and flushes.
///
/// Like [`read_block`], `idle` bounds each write rather than the whole block.
pub async fn write_block<W>(writer: &mut W, data: &[u8], idle: Option<Duration>) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < data.len() {
        let chunk = &data[written..];
        let n = with_timeout(idle, async {
            writer.write(chunk).await.map_err(TransportError::Write)
        })
        .await?;
        if n == 0 {
            return Err(TransportError::Write(io::ErrorKind::WriteZero.into()).into());
        }
        written += n;
    }

    with_timeout(idle, async {
        writer.flush().await.map_err(TransportError::Write)
    })
    .await?;
    Ok(())
}

/// Sends one frame: `payload.len()` as u32 little-endian, then the payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], idle: Option<Duration>) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FramingError::Oversized {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        }
        .into());
    }

    let prefix = (payload.len() as u32).to_le_bytes();
    write_block(writer, &prefix, idle).await?;
    write_block(writer, payload, idle).await?;
    debug!("Wrote frame of {} bytes", payload.len());
    Ok(())
}

/// Receives one frame written by [`write_frame`].
///
/// The declared length is checked against `MAX_FRAME_SIZE` before the buffer
/// is allocated.
pub async fn read_frame<R>(reader: &mut R, idle: Option<Duration>) -> Result<Vec<u8>, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    read_block(reader, &mut prefix, idle).await?;

    let size = u32::from_le_bytes(prefix) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(FramingError::Oversized {
            size,
            max: MAX_FRAME_SIZE,
        }
        .into());
    }

    let mut payload = vec![0u8; size];
    read_block(reader, &mut payload, idle).await?;
    debug!("Read frame of {} bytes", size);
    Ok(payload)
}

/// A byte stream plus the idle timeout every read and write is held to.
pub struct Connection<S> {
    stream: S,
    timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, timeout: Option<Duration>) -> Self {
        Connection { stream, timeout }
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        write_frame(&mut self.stream, payload, self.timeout).await
    }

    pub async fn read_frame(&mut self) -> Result<Vec<u8>, SessionError> {
        read_frame(&mut self.stream, self.timeout).await
    }

    pub async fn write_block(&mut self, data: &[u8]) -> Result<(), SessionError> {
        write_block(&mut self.stream, data, self.timeout).await
    }

    pub async fn read_block(&mut self, size: usize) -> Result<Vec<u8>, SessionError> {
        let mut buf = vec![0u8; size];
        read_block(&mut self.stream, &mut buf, self.timeout).await?;
        Ok(buf)
    }

    /// Flushes and closes the write side.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frame_roundtrip_sizes() {
        for size in [0usize, 1, 4, 1023, 1024, 65_536, 300_000] {
            let (mut a, mut b) = duplex(1024);
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

            let expected = payload.clone();
            let writer = tokio::spawn(async move { write_frame(&mut a, &payload, None).await });
            let received = read_frame(&mut b, None).await.expect("Should read frame");
            writer.await.unwrap().expect("Should write frame");

            assert_eq!(received, expected, "payload of {} bytes changed", size);
        }
    }

    #[tokio::test]
    async fn test_frame_wire_layout() {
        let (mut a, mut b) = duplex(64);
        write_frame(&mut a, b"abc", None).await.unwrap();
        drop(a);

        let mut raw = Vec::new();
        b.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, [3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_consecutive_frames_keep_boundaries() {
        let (mut a, mut b) = duplex(64);
        write_frame(&mut a, b"first", None).await.unwrap();
        write_frame(&mut a, b"", None).await.unwrap();
        write_frame(&mut a, b"third", None).await.unwrap();

        assert_eq!(read_frame(&mut b, None).await.unwrap(), b"first");
        assert!(read_frame(&mut b, None).await.unwrap().is_empty());
        assert_eq!(read_frame(&mut b, None).await.unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&10u32.to_le_bytes()).await.unwrap();
        a.write_all(b"only6b").await.unwrap();
        drop(a);

        match read_frame(&mut b, None).await {
            Err(SessionError::Framing(FramingError::Truncated { expected, received })) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 6);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_prefix() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[1, 0]).await.unwrap();
        drop(a);

        assert!(matches!(
            read_frame(&mut b, None).await,
            Err(SessionError::Framing(FramingError::Truncated {
                expected: LENGTH_PREFIX_SIZE,
                received: 2
            }))
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_allocation() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

        assert!(matches!(
            read_frame(&mut b, None).await,
            Err(SessionError::Framing(FramingError::Oversized { .. }))
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (a, b) = duplex(64);
        let mut conn = Connection::new(b, Some(Duration::from_millis(50)));

        let result = conn.read_frame().await;
        assert!(matches!(
            result,
            Err(SessionError::Transport(TransportError::TimedOut(_)))
        ));
        drop(a);
    }

    #[tokio::test]
    async fn test_slow_peer_within_idle_timeout() {
        let (mut a, b) = duplex(64);
        let payload: Vec<u8> = (0..100u8).collect();

        // 100 bytes over ~1s, never more than 10ms apart
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            a.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
            for byte in payload {
                a.write_all(&[byte]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            a
        });

        let mut conn = Connection::new(b, Some(Duration::from_millis(200)));
        let received = conn.read_frame().await.expect("Progress should reset the timeout");
        assert_eq!(received, expected);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_payload_not_written() {
        let (mut a, mut b) = duplex(64);
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];

        assert!(matches!(
            write_frame(&mut a, &payload, None).await,
            Err(SessionError::Framing(FramingError::Oversized { size, max }))
                if size == MAX_FRAME_SIZE + 1 && max == MAX_FRAME_SIZE
        ));
        drop(a);

        let mut raw = Vec::new();
        b.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn test_connection_block_roundtrip() {
        let (a, b) = duplex(4096);
        let mut left = Connection::new(a, None);
        let mut right = Connection::new(b, None);

        left.write_block(&[7u8; 1024]).await.unwrap();
        let block = right.read_block(1024).await.unwrap();
        assert_eq!(block, vec![7u8; 1024]);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(addr, Some(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
