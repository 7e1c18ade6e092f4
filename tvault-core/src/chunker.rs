//! Network chunking for streaming uploads.
//!
//! Splits a byte source into fixed-size transport frames. This is purely a
//! transport concern and unrelated to how the server chunks content for
//! storage. 64 KiB keeps frames small enough to avoid head-of-line blocking on
//! multiplexed connections without paying per-frame overhead on every few
//! bytes.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};

use crate::object::UploadFrame;

/// Default network frame size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Lazy, finite, non-restartable sequence of blocks read from `R`.
///
/// Every block except the last is exactly `chunk_size` bytes. Zero-length
/// blocks are never yielded. A read error is yielded once and ends the
/// sequence.
pub struct ChunkEmitter<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ChunkEmitter<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }

    fn fill_block(&mut self) -> std::io::Result<Bytes> {
        let mut block = BytesMut::zeroed(self.chunk_size);
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.reader.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        block.truncate(filled);
        Ok(block.freeze())
    }
}

impl<R: Read> Iterator for ChunkEmitter<R> {
    type Item = std::io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fill_block() {
            Ok(block) if block.is_empty() => {
                self.done = true;
                None
            }
            Ok(block) => {
                if block.len() < self.chunk_size {
                    // short block means the source hit EOF
                    self.done = true;
                }
                Some(Ok(block))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Counters for frames handed to a transport
#[derive(Debug, Default)]
pub struct FrameStats {
    chunks: AtomicU64,
    bytes: AtomicU64,
}

impl FrameStats {
    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// The frame sequence of one upload: one `Meta`, then the file's chunks.
///
/// The sequence is built so that `Meta` is always first and never repeated.
pub struct UploadFrames {
    meta: Option<UploadFrame>,
    chunks: ChunkEmitter<Box<dyn Read + Send>>,
    stats: Arc<FrameStats>,
}

impl UploadFrames {
    pub fn new(
        path: String,
        digest: String,
        reader: Box<dyn Read + Send>,
        chunk_size: usize,
    ) -> Self {
        Self {
            meta: Some(UploadFrame::Meta { path, digest }),
            chunks: ChunkEmitter::new(reader, chunk_size),
            stats: Arc::new(FrameStats::default()),
        }
    }

    /// Shared counters, readable after the sequence has been consumed
    pub fn stats(&self) -> Arc<FrameStats> {
        Arc::clone(&self.stats)
    }
}

impl Iterator for UploadFrames {
    type Item = std::io::Result<UploadFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(meta) = self.meta.take() {
            return Some(Ok(meta));
        }
        let block = self.chunks.next()?;
        Some(block.map(|data| {
            self.stats.chunks.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bytes
                .fetch_add(data.len() as u64, Ordering::Relaxed);
            UploadFrame::Chunk { data }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    /// Reader that returns at most `step` bytes per call
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct Failing;

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk on fire"))
        }
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let mut emitter = ChunkEmitter::new(Cursor::new(Vec::new()), 16);
        assert!(emitter.next().is_none());
        assert!(emitter.next().is_none());
    }

    #[test]
    fn test_exact_multiple() {
        let data = vec![7u8; 64];
        let blocks: Vec<Bytes> = ChunkEmitter::new(Cursor::new(data), 16)
            .map(|b| b.unwrap())
            .collect();
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.len() == 16));
    }

    #[test]
    fn test_short_reads_are_coalesced() {
        let data: Vec<u8> = (0..100u8).collect();
        let reader = Trickle {
            data: data.clone(),
            pos: 0,
            step: 3,
        };
        let blocks: Vec<Bytes> = ChunkEmitter::new(reader, 32).map(|b| b.unwrap()).collect();
        let sizes: Vec<usize> = blocks.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![32, 32, 32, 4]);
        assert_eq!(blocks.concat(), data);
    }

    #[test]
    fn test_read_error_ends_sequence() {
        let mut emitter = ChunkEmitter::new(Failing, 8);
        assert!(emitter.next().unwrap().is_err());
        assert!(emitter.next().is_none());
    }

    #[test]
    fn test_upload_frames_meta_first() {
        let frames: Vec<UploadFrame> = UploadFrames::new(
            "a/b.bin".into(),
            "d".repeat(64),
            Box::new(Cursor::new(vec![1u8; 20])),
            8,
        )
        .map(|f| f.unwrap())
        .collect();

        assert_eq!(frames.len(), 4);
        assert!(frames[0].is_meta());
        assert!(frames[1..].iter().all(|f| !f.is_meta()));
        let sizes: Vec<usize> = frames.iter().map(|f| f.payload_len()).collect();
        assert_eq!(sizes, vec![0, 8, 8, 4]);
    }

    #[test]
    fn test_upload_frames_stats() {
        let frames = UploadFrames::new(
            "x".into(),
            "d".repeat(64),
            Box::new(Cursor::new(vec![0u8; 10])),
            4,
        );
        let stats = frames.stats();
        assert_eq!(frames.count(), 4);
        assert_eq!(stats.chunks(), 3);
        assert_eq!(stats.bytes(), 10);
    }

    proptest! {
        #[test]
        fn prop_chunking_is_complete(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            chunk_size in 1usize..512,
        ) {
            let blocks: Vec<Bytes> = ChunkEmitter::new(Cursor::new(data.clone()), chunk_size)
                .map(|b| b.unwrap())
                .collect();
            prop_assert_eq!(blocks.len(), data.len().div_ceil(chunk_size));
            prop_assert!(blocks.iter().all(|b| !b.is_empty() && b.len() <= chunk_size));
            prop_assert_eq!(blocks.concat(), data);
        }
    }
}
