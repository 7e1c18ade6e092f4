//! Buffered byte source over a server-driven download stream.
//!
//! [`StreamReader`] owns the frame source and an internal buffer. Nothing is
//! pulled from the transport until a read asks for it. Three read contracts
//! are offered:
//!
//! - [`read_all`](StreamReader::read_all): drain everything that is left
//! - [`read_exact`](StreamReader::read_exact): exactly `n` bytes unless the
//!   stream ends first
//! - [`read_best_effort`](StreamReader::read_best_effort): whatever is
//!   available after at most one pull
//!
//! The stream is forward-only, so seeking is not offered. The reader also
//! implements [`std::io::Read`] with best-effort semantics so it can be handed
//! to any parser that consumes a `Read`.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};

use crate::error::{Result, VaultError};
use crate::transport::FrameSource;

/// Lifecycle of a [`StreamReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Frames may still arrive from the transport
    Filling,
    /// Transport exhausted; only buffered bytes remain
    Depleted,
    /// Released; every read fails
    Closed,
}

/// Closes a [`StreamReader`] from another thread.
///
/// A pull that is in flight when the handle fires completes at the transport
/// level (bounded by the transport's own timeout); its frame is discarded and
/// the read fails.
#[derive(Debug, Clone)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Pull-based reader over a [`FrameSource`]
pub struct StreamReader {
    source: Option<Box<dyn FrameSource>>,
    buffer: VecDeque<Bytes>,
    buffered: usize,
    state: StreamState,
    position: u64,
    close_flag: Arc<AtomicBool>,
}

impl StreamReader {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source: Some(source),
            buffer: VecDeque::new(),
            buffered: 0,
            state: StreamState::Filling,
            position: 0,
            close_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Bytes handed to the consumer so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes held in the internal buffer
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_readable(&self) -> bool {
        true
    }

    /// Always false: the underlying transport is forward-only.
    pub fn is_seekable(&self) -> bool {
        false
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed || self.close_flag.load(Ordering::Acquire)
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(Arc::clone(&self.close_flag))
    }

    /// Release the transport and discard buffered bytes. Idempotent.
    pub fn close(&mut self) {
        self.close_flag.store(true, Ordering::Release);
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Closed;
        self.source = None;
        self.buffer.clear();
        self.buffered = 0;
        tracing::debug!("Stream closed after {} bytes", self.position);
    }

    /// Drain the buffer and every remaining frame.
    ///
    /// Memory grows with the remaining content; use `read_exact` or
    /// `read_best_effort` for unbounded streams.
    pub fn read_all(&mut self) -> Result<Bytes> {
        self.ensure_open()?;
        while let Some(frame) = self.pull()? {
            self.push(frame);
        }
        Ok(self.take(self.buffered))
    }

    /// Read `n` bytes, pulling frames only as needed.
    ///
    /// Returns fewer than `n` bytes only at end-of-stream.
    pub fn read_exact(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_open()?;
        while self.buffered < n {
            match self.pull()? {
                Some(frame) => self.push(frame),
                None => break,
            }
        }
        Ok(self.take(n.min(self.buffered)))
    }

    /// Return up to `n` bytes after at most one pull.
    ///
    /// Buffered bytes are served without touching the transport. An empty
    /// result (for `n > 0`) means end-of-stream.
    pub fn read_best_effort(&mut self, n: usize) -> Result<Bytes> {
        self.ensure_open()?;
        if n == 0 {
            return Ok(Bytes::new());
        }
        if self.buffered > 0 {
            return Ok(self.take(n.min(self.buffered)));
        }
        match self.pull()? {
            Some(mut frame) => {
                if frame.len() > n {
                    let rest = frame.split_off(n);
                    self.push(rest);
                }
                self.position += frame.len() as u64;
                Ok(frame)
            }
            None => Ok(Bytes::new()),
        }
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.is_closed() {
            // the handle may have fired from another thread
            self.close();
            return Err(VaultError::closed_stream());
        }
        Ok(())
    }

    /// Pull the next non-empty frame, or `None` once the source is exhausted.
    fn pull(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };
            match source.next_frame() {
                Ok(Some(frame)) => {
                    if self.close_flag.load(Ordering::Acquire) {
                        self.close();
                        return Err(VaultError::closed_stream());
                    }
                    if frame.is_empty() {
                        continue;
                    }
                    return Ok(Some(frame));
                }
                Ok(None) => {
                    self.source = None;
                    self.state = StreamState::Depleted;
                    tracing::debug!("Stream depleted, {} bytes buffered", self.buffered);
                    return Ok(None);
                }
                Err(e) => {
                    tracing::warn!("Stream interrupted after {} bytes: {}", self.position, e);
                    self.close();
                    return Err(VaultError::Io(std::io::Error::other(format!(
                        "stream interrupted: {}",
                        e
                    ))));
                }
            }
        }
    }

    fn push(&mut self, frame: Bytes) {
        self.buffered += frame.len();
        self.buffer.push_back(frame);
    }

    /// Remove exactly `n` buffered bytes (`n <= self.buffered`).
    fn take(&mut self, n: usize) -> Bytes {
        debug_assert!(n <= self.buffered);
        if n == 0 {
            return Bytes::new();
        }
        self.buffered -= n;
        self.position += n as u64;

        if let Some(front) = self.buffer.front_mut() {
            if front.len() >= n {
                let out = front.split_to(n);
                if front.is_empty() {
                    self.buffer.pop_front();
                }
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(mut front) = self.buffer.pop_front() else {
                break;
            };
            let want = n - out.len();
            if front.len() > want {
                out.extend_from_slice(&front.split_to(want));
                self.buffer.push_front(front);
            } else {
                out.extend_from_slice(&front);
            }
        }
        out.freeze()
    }
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("state", &self.state)
            .field("buffered", &self.buffered)
            .field("position", &self.position)
            .finish()
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let data = self.read_best_effort(buf.len()).map_err(|e| match e {
            VaultError::Io(io) => io,
            other => std::io::Error::other(other),
        })?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}
