use std::collections::VecDeque;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::codec::LineCodec;
use crate::error::BusError;
use crate::message::BusMessage;

const READ_CHUNK_BYTES: usize = 16 * 1024;

/// One end of a supervisor/worker socket.
pub struct BusConnection {
    reader: BusReader,
    writer: BusWriter,
}

impl BusConnection {
    /// Connects a worker to the supervisor's socket.
    pub async fn connect(path: &Path) -> Result<Self, BusError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| BusError::io("connect to bus socket", path, source))?;
        Ok(Self::from_stream(stream))
    }

    #[must_use]
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BusReader::new(read_half),
            writer: BusWriter::new(write_half),
        }
    }

    pub async fn send(&mut self, message: &BusMessage) -> Result<(), BusError> {
        self.writer.send(message).await
    }

    pub async fn recv(&mut self) -> Result<Option<BusMessage>, BusError> {
        self.reader.recv().await
    }

    /// Splits into halves that can live in separate tasks.
    #[must_use]
    pub fn into_split(self) -> (BusReader, BusWriter) {
        (self.reader, self.writer)
    }
}

pub struct BusReader {
    half: OwnedReadHalf,
    codec: LineCodec,
    pending: VecDeque<BusMessage>,
    scratch: Vec<u8>,
    closed: bool,
}

impl BusReader {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            codec: LineCodec::new(),
            pending: VecDeque::new(),
            scratch: vec![0_u8; READ_CHUNK_BYTES],
            closed: false,
        }
    }

    /// Next decoded message; `Ok(None)` once the peer closed the socket.
    ///
    /// A partial line left at close is discarded. Cancel safe: buffered
    /// bytes and decoded messages survive a dropped future.
    pub async fn recv(&mut self) -> Result<Option<BusMessage>, BusError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            if self.closed {
                return Ok(None);
            }

            let read = self.half.read(&mut self.scratch).await.map_err(BusError::Read)?;
            if read == 0 {
                if self.codec.has_partial_line() {
                    tracing::debug!("bus peer closed mid-line");
                }
                self.closed = true;
                continue;
            }
            self.pending.extend(self.codec.push(&self.scratch[..read]));
        }
    }
}

pub struct BusWriter {
    half: OwnedWriteHalf,
}

impl BusWriter {
    fn new(half: OwnedWriteHalf) -> Self {
        Self { half }
    }

    pub async fn send(&mut self, message: &BusMessage) -> Result<(), BusError> {
        let line = LineCodec::encode(message)?;
        self.half.write_all(&line).await.map_err(BusError::Write)?;
        self.half.flush().await.map_err(BusError::Write)
    }

    /// Writes pre-encoded bytes verbatim.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.half.write_all(bytes).await.map_err(BusError::Write)?;
        self.half.flush().await.map_err(BusError::Write)
    }

    /// Half-closes the socket so the peer's reader sees end of stream.
    pub async fn close(&mut self) -> Result<(), BusError> {
        self.half.shutdown().await.map_err(BusError::Write)
    }
}
