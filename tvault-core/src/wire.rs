//! Length-delimited wire codec shared by the HTTP transport and server.
//!
//! Upload body: `[u32 BE len][bincode UploadFrame]...`
//! Download body: `[u32 BE len][raw bytes]...`
//!
//! Both bodies end at a frame boundary; EOF inside a header or payload is a
//! truncation error.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, VaultError};
use crate::object::UploadFrame;
use crate::transport::FrameSource;

/// Upper bound on a single encoded frame
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Encode one upload frame with its length prefix.
pub fn encode_upload_frame(frame: &UploadFrame) -> Result<Bytes> {
    let payload =
        bincode::serialize(frame).map_err(|e| VaultError::Protocol(format!("encode failed: {}", e)))?;
    Ok(length_prefixed(&payload))
}

/// Prefix a raw download block with its length.
pub fn encode_block(data: &[u8]) -> Bytes {
    length_prefixed(data)
}

fn length_prefixed(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Read one `[len][payload]` record. `Ok(None)` on clean EOF before a header.
fn read_record<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    let mut got = 0;
    while got < header.len() {
        match reader.read(&mut header[got..]) {
            Ok(0) if got == 0 => return Ok(None),
            Ok(0) => return Err(VaultError::Protocol("truncated frame header".into())),
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(VaultError::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => VaultError::Protocol("truncated frame payload".into()),
        _ => VaultError::Io(e),
    })?;
    Ok(Some(payload))
}

/// Decodes an upload body into frames
pub struct UploadFrameDecoder<R> {
    reader: R,
    done: bool,
}

impl<R: Read> UploadFrameDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl<R: Read> Iterator for UploadFrameDecoder<R> {
    type Item = Result<UploadFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let decoded = read_record(&mut self.reader).and_then(|record| {
            record
                .map(|payload| {
                    bincode::deserialize::<UploadFrame>(&payload)
                        .map_err(|e| VaultError::Protocol(format!("bad upload frame: {}", e)))
                })
                .transpose()
        });
        match decoded {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Turns a frame iterator into a byte stream for a streaming request body.
pub struct UploadFrameEncoder<I> {
    frames: I,
    pending: Bytes,
}

impl<I> UploadFrameEncoder<I>
where
    I: Iterator<Item = std::io::Result<UploadFrame>>,
{
    pub fn new(frames: I) -> Self {
        Self {
            frames,
            pending: Bytes::new(),
        }
    }
}

impl<I> Read for UploadFrameEncoder<I>
where
    I: Iterator<Item = std::io::Result<UploadFrame>>,
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pending.is_empty() {
            match self.frames.next() {
                None => return Ok(0),
                Some(frame) => {
                    self.pending = encode_upload_frame(&frame?).map_err(std::io::Error::other)?;
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

/// Frame source over a length-delimited download body
pub struct BlockReader<R> {
    reader: Option<R>,
}

impl<R: Read> BlockReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
        }
    }
}

impl<R: Read + Send> FrameSource for BlockReader<R> {
    fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match read_record(reader) {
            Ok(Some(payload)) => Ok(Some(Bytes::from(payload))),
            Ok(None) => {
                self.reader = None;
                Ok(None)
            }
            Err(e) => {
                self.reader = None;
                Err(e)
            }
        }
    }
}

/// Frame source over frames already in memory
#[derive(Debug, Default)]
pub struct BufferedFrames {
    frames: VecDeque<Bytes>,
}

impl BufferedFrames {
    pub fn new(frames: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    /// Split `data` into frames of at most `frame_size` bytes
    pub fn split(data: Bytes, frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        let mut frames = VecDeque::new();
        let mut rest = data;
        while !rest.is_empty() {
            let take = frame_size.min(rest.len());
            frames.push_back(rest.split_to(take));
        }
        Self { frames }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for BufferedFrames {
    fn next_frame(&mut self) -> Result<Option<Bytes>> {
        Ok(self.frames.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_frames() -> Vec<UploadFrame> {
        vec![
            UploadFrame::Meta {
                path: "data/train.csv".into(),
                digest: "ab".repeat(32),
            },
            UploadFrame::Chunk {
                data: Bytes::from_static(b"hello "),
            },
            UploadFrame::Chunk {
                data: Bytes::from_static(b"world"),
            },
        ]
    }

    #[test]
    fn test_encoder_feeds_decoder() {
        let frames = sample_frames();
        let mut body = Vec::new();
        UploadFrameEncoder::new(frames.clone().into_iter().map(Ok::<_, std::io::Error>))
            .read_to_end(&mut body)
            .unwrap();

        let decoded: Vec<UploadFrame> = UploadFrameDecoder::new(Cursor::new(body))
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn test_encoder_with_tiny_reads() {
        let mut encoder = UploadFrameEncoder::new(sample_frames().into_iter().map(Ok::<_, std::io::Error>));
        let mut body = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = encoder.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        assert_eq!(UploadFrameDecoder::new(Cursor::new(body)).count(), 3);
    }

    #[test]
    fn test_encoder_propagates_source_error() {
        let frames: Vec<std::io::Result<UploadFrame>> =
            vec![Err(std::io::Error::other("read failed"))];
        let mut body = Vec::new();
        let err = UploadFrameEncoder::new(frames.into_iter())
            .read_to_end(&mut body)
            .unwrap_err();
        assert!(err.to_string().contains("read failed"));
    }

    #[test]
    fn test_truncated_payload() {
        let mut body = encode_block(b"0123456789").to_vec();
        body.truncate(8);
        let mut reader = BlockReader::new(Cursor::new(body));
        assert!(matches!(reader.next_frame(), Err(VaultError::Protocol(_))));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_truncated_header() {
        let mut decoder = UploadFrameDecoder::new(Cursor::new(vec![0u8, 0]));
        assert!(matches!(decoder.next(), Some(Err(VaultError::Protocol(_)))));
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        let mut reader = BlockReader::new(Cursor::new(header));
        assert!(matches!(reader.next_frame(), Err(VaultError::Protocol(_))));
    }

    #[test]
    fn test_block_reader_preserves_boundaries() {
        let mut body = Vec::new();
        for block in [&b"ab"[..], b"", b"cde"] {
            body.extend_from_slice(&encode_block(block));
        }
        let mut reader = BlockReader::new(Cursor::new(body));
        assert_eq!(reader.next_frame().unwrap().unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(reader.next_frame().unwrap().unwrap(), Bytes::new());
        assert_eq!(reader.next_frame().unwrap().unwrap(), Bytes::from_static(b"cde"));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_buffered_frames_split() {
        let mut frames = BufferedFrames::split(Bytes::from(vec![1u8; 10]), 4);
        assert_eq!(frames.remaining(), 3);
        let mut sizes = Vec::new();
        while let Some(f) = frames.next_frame().unwrap() {
            sizes.push(f.len());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(BufferedFrames::split(Bytes::new(), 4).remaining(), 0);
    }
}
