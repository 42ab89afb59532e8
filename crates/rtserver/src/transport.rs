//! Length-prefixed result framing.
//!
//! A frame is an 8-byte big-endian payload size followed by the payload,
//! written in [`CHUNK_SIZE`] pieces. [`FrameReceiver`] keeps its progress
//! between calls, so a read that hits its deadline can simply be retried.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

use crate::error::TransportError;
use crate::job::JobResult;

/// Size of the pieces a payload is written and read in.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Largest frame a receiver accepts unless told otherwise.
pub const DEFAULT_MAX_FRAME: u64 = 1 << 30;

const HEADER_LEN: usize = 8;

type Result<T> = std::result::Result<T, TransportError>;

/// Write one frame and flush.
pub async fn send_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(payload.len() as u64).to_be_bytes()).await?;
    for chunk in payload.chunks(CHUNK_SIZE) {
        writer.write_all(chunk).await?;
    }
    writer.flush().await?;
    debug!(bytes = payload.len(), "frame sent");
    Ok(())
}

/// Resumable reader for frames written by [`send_frame`].
#[derive(Debug)]
pub struct FrameReceiver {
    header: [u8; HEADER_LEN],
    header_got: usize,
    // Grows as bytes arrive, never past `payload_len`.
    payload: Vec<u8>,
    payload_len: usize,
    max_frame: u64,
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameReceiver {
    /// A receiver rejecting frames larger than `max_frame` bytes.
    pub fn new(max_frame: u64) -> Self {
        Self {
            header: [0; HEADER_LEN],
            header_got: 0,
            payload: Vec::new(),
            payload_len: 0,
            max_frame,
        }
    }

    /// Whether a frame has been partly read.
    pub fn in_progress(&self) -> bool {
        self.header_got > 0
    }

    /// Read until a frame is complete or `deadline` passes.
    ///
    /// Returns `Ok(None)` on timeout; bytes read so far are kept and the
    /// next call continues from them.
    pub async fn recv<R>(&mut self, reader: &mut R, deadline: Instant) -> Result<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        let outcome = tokio::time::timeout_at(deadline, self.fill(reader)).await;
        match outcome {
            Ok(frame) => frame.map(Some),
            Err(_) => {
                debug!(
                    header = self.header_got,
                    payload = self.payload.len(),
                    "frame read timed out"
                );
                Ok(None)
            }
        }
    }

    // Progress is recorded right after each read, so dropping this future at
    // an await point loses nothing.
    async fn fill<R>(&mut self, reader: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        while self.header_got < HEADER_LEN {
            let n = reader.read(&mut self.header[self.header_got..]).await?;
            if n == 0 {
                let got = self.header_got;
                self.reset();
                return Err(if got == 0 {
                    TransportError::Closed
                } else {
                    TransportError::Truncated {
                        got,
                        wanted: HEADER_LEN,
                    }
                });
            }
            self.header_got += n;
            if self.header_got == HEADER_LEN {
                self.start_payload()?;
            }
        }

        while self.payload.len() < self.payload_len {
            let remaining = self.payload_len - self.payload.len();
            self.payload.reserve(remaining.min(CHUNK_SIZE));
            let n = (&mut *reader)
                .take(remaining as u64)
                .read_buf(&mut self.payload)
                .await?;
            if n == 0 {
                let (got, wanted) = (self.payload.len(), self.payload_len);
                self.reset();
                return Err(TransportError::Truncated { got, wanted });
            }
        }

        let frame = std::mem::take(&mut self.payload);
        self.reset();
        Ok(frame)
    }

    fn start_payload(&mut self) -> Result<()> {
        let size = u64::from_be_bytes(self.header);
        let len = usize::try_from(size).ok().filter(|_| size <= self.max_frame);
        let Some(len) = len else {
            self.reset();
            return Err(TransportError::FrameTooLarge {
                size,
                max: self.max_frame,
            });
        };
        self.payload = Vec::new();
        self.payload_len = len;
        Ok(())
    }

    fn reset(&mut self) {
        self.header_got = 0;
        self.payload_len = 0;
        self.payload = Vec::new();
    }
}

/// Send a job result as one JSON frame.
pub async fn send_result<W>(writer: &mut W, result: &JobResult) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(result)?;
    send_frame(writer, &bytes).await
}

/// Receive one job result; `Ok(None)` if `deadline` passes first.
pub async fn recv_result<R>(
    receiver: &mut FrameReceiver,
    reader: &mut R,
    deadline: Instant,
) -> Result<Option<JobResult>>
where
    R: AsyncRead + Unpin,
{
    match receiver.recv(reader, deadline).await? {
        Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
        None => Ok(None),
    }
}
