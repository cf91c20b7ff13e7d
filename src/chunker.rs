//! Fixed-duration segmentation of raw PCM.

use crate::audio::AudioBuffer;
use crate::error::{DenoiseError, Result};
use async_stream::stream;
use futures_util::Stream;

/// One outbound message worth of audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the stream, starting at 0
    pub sequence: usize,
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Number of bytes covering `chunk_duration_ms` of audio, rounded down.
pub fn bytes_per_chunk(
    sample_width_bytes: u16,
    chunk_duration_ms: u32,
    frame_rate_hz: u32,
) -> Result<usize> {
    // Exact integer floor. Float evaluation can land one byte lower on some
    // inputs, e.g. (1, 290, 100) floors to 29 here rather than 28.
    let bytes = (sample_width_bytes as u64)
        .checked_mul(chunk_duration_ms as u64)
        .and_then(|b| b.checked_mul(frame_rate_hz as u64))
        .map(|b| b / 1000)
        .ok_or_else(|| {
            DenoiseError::InvalidParameter(format!(
                "a {}ms chunk of {}-byte samples at {}Hz is too large",
                chunk_duration_ms, sample_width_bytes, frame_rate_hz
            ))
        })?;
    if bytes == 0 {
        return Err(DenoiseError::InvalidParameter(format!(
            "a {}ms chunk of {}-byte samples at {}Hz holds no audio",
            chunk_duration_ms, sample_width_bytes, frame_rate_hz
        )));
    }
    usize::try_from(bytes).map_err(|_| {
        DenoiseError::InvalidParameter(format!("chunk of {} bytes is too large", bytes))
    })
}

/// Single-pass iterator over the chunks of a buffer.
///
/// Every chunk is exactly `bytes_per_chunk` long except the last, which
/// holds whatever remains. An empty buffer yields nothing.
#[derive(Debug)]
pub struct Chunker {
    buffer: AudioBuffer,
    bytes_per_chunk: usize,
    offset: usize,
    sequence: usize,
}

impl Chunker {
    pub fn new(buffer: AudioBuffer, chunk_duration_ms: u32) -> Result<Self> {
        let format = buffer.format();
        let bytes_per_chunk = bytes_per_chunk(
            format.sample_width_bytes,
            chunk_duration_ms,
            format.frame_rate_hz,
        )?;
        Ok(Self {
            buffer,
            bytes_per_chunk,
            offset: 0,
            sequence: 0,
        })
    }

    pub fn bytes_per_chunk(&self) -> usize {
        self.bytes_per_chunk
    }

    /// Total number of chunks the buffer splits into
    pub fn chunk_count(&self) -> usize {
        self.buffer.len().div_ceil(self.bytes_per_chunk)
    }

    /// Turn the iterator into a lazy stream that yields to the runtime
    /// between chunks so socket I/O keeps making progress.
    pub fn into_stream(self) -> impl Stream<Item = Chunk> + Send + Unpin {
        Box::pin(stream! {
            for chunk in self {
                yield chunk;
                tokio::task::yield_now().await;
            }
        })
    }
}

impl Iterator for Chunker {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let data = self.buffer.bytes();
        if self.offset >= data.len() {
            return None;
        }

        let end = (self.offset + self.bytes_per_chunk).min(data.len());
        let chunk = Chunk {
            sequence: self.sequence,
            bytes: data[self.offset..end].to_vec(),
        };
        self.offset = end;
        self.sequence += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.buffer.len() - self.offset).div_ceil(self.bytes_per_chunk);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunker {}

/// Lazy chunk stream over `buffer`; call again to start over.
pub fn chunk_stream(
    buffer: AudioBuffer,
    chunk_duration_ms: u32,
) -> Result<impl Stream<Item = Chunk> + Send + Unpin> {
    Ok(Chunker::new(buffer, chunk_duration_ms)?.into_stream())
}
