//! Splits a byte stream into newline-terminated lines regardless of how the
//! stream is chunked.

/// Longest line accepted before the framer gives up on it and resynchronizes
/// at the next newline.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, newline stripped. `number` is 1-based.
    Line { number: u64, bytes: Vec<u8> },
    /// A line longer than the limit; its bytes were dropped.
    Oversized { number: u64 },
}

#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line: usize,
    discarding: bool,
    lines: u64,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
            discarding: false,
            lines: 0,
        }
    }

    /// Feeds one chunk and returns every frame it completes. Bytes after the
    /// last newline stay buffered for the next call.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
            let head = &chunk[..pos];
            chunk = &chunk[pos + 1..];
            self.lines += 1;
            if self.discarding {
                self.discarding = false;
            } else if self.buf.len() + head.len() > self.max_line {
                self.buf.clear();
                frames.push(Frame::Oversized { number: self.lines });
            } else {
                self.buf.extend_from_slice(head);
                frames.push(Frame::Line {
                    number: self.lines,
                    bytes: std::mem::take(&mut self.buf),
                });
            }
        }

        if !chunk.is_empty() && !self.discarding {
            if self.buf.len() + chunk.len() > self.max_line {
                self.buf.clear();
                self.discarding = true;
                frames.push(Frame::Oversized {
                    number: self.lines + 1,
                });
            } else {
                self.buf.extend_from_slice(chunk);
            }
        }
        frames
    }

    /// Bytes of an unterminated final line still held.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines
    }
}
