//! Incremental decoder for chunk-framed response bodies.
//!
//! A streamed body is a sequence of `"<decimal length>\n"` headers, each
//! followed by exactly that many bytes. Bytes arrive in arbitrary slices,
//! so a chunk may be split anywhere, including inside its length header.

/// Longest length header accepted before the framing is declared invalid.
const MAX_SIZE_DIGITS: usize = 16;

/// Result of asking the decoder for its next chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A complete chunk
    Complete(String),

    /// More bytes are needed
    Incomplete,

    /// The length header is malformed or the chunk is not UTF-8
    Invalid,
}

/// Buffers response bytes and splits them into chunks.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buffer: Vec<u8>,
    offset: usize,
    total: usize,
}

impl ChunkDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        // Drop consumed bytes before growing the buffer
        if self.offset > 0 && self.offset == self.buffer.len() {
            self.buffer.clear();
            self.offset = 0;
        } else if self.offset > 4096 && self.offset * 2 > self.buffer.len() {
            self.buffer.drain(..self.offset);
            self.offset = 0;
        }
        self.buffer.extend_from_slice(bytes);
        self.total += bytes.len();
    }

    /// Total bytes received so far.
    #[must_use]
    pub fn total_received(&self) -> usize {
        self.total
    }

    /// True when every received byte belongs to a returned chunk.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.offset == self.buffer.len()
    }

    /// Take the next complete chunk, if any.
    pub fn next_chunk(&mut self) -> Chunk {
        let pending = &self.buffer[self.offset..];
        let Some(newline) = pending.iter().position(|&b| b == b'\n') else {
            if pending.len() > MAX_SIZE_DIGITS || !pending.iter().all(u8::is_ascii_digit) {
                return Chunk::Invalid;
            }
            return Chunk::Incomplete;
        };

        let header = &pending[..newline];
        if header.is_empty() || header.len() > MAX_SIZE_DIGITS || !header.iter().all(u8::is_ascii_digit)
        {
            return Chunk::Invalid;
        }
        // Digits only, so both conversions are infallible in practice
        let Some(size) = std::str::from_utf8(header)
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
        else {
            return Chunk::Invalid;
        };

        let start = newline + 1;
        if pending.len() - start < size {
            return Chunk::Incomplete;
        }

        let Ok(text) = std::str::from_utf8(&pending[start..start + size]) else {
            return Chunk::Invalid;
        };
        let text = text.to_string();
        self.offset += start + size;
        Chunk::Complete(text)
    }
}
