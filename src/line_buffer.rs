//! Incremental reassembly of `\n`-terminated text lines from a byte stream.
//!
//! [`LineBuffer::feed`] accepts any number of bytes (including none) and
//! returns the lines completed by them. It never blocks, so the same decoder
//! serves a cooperative single-threaded responder and a host polling a port.

use tracing::warn;

/// Largest number of unterminated bytes kept before the buffer is dropped.
pub const MAX_LINE_LENGTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_len: usize,
    discarded: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_LENGTH)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_len.min(MAX_LINE_LENGTH) + 1),
            max_len,
            discarded: 0,
        }
    }

    /// Append `bytes` and return every line they complete.
    ///
    /// A trailing `\r` is stripped from each line. Lines that are not valid
    /// UTF-8 are dropped together with their terminator. When more than
    /// `max_len` bytes accumulate without a terminator, they are dropped and
    /// reassembly restarts with the next byte.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &b in bytes {
            if b == b'\n' {
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                match String::from_utf8(std::mem::take(&mut self.buf)) {
                    Ok(line) => lines.push(line),
                    Err(e) => {
                        self.discarded += 1;
                        warn!(len = e.as_bytes().len(), "dropping line that is not UTF-8");
                    }
                }
                continue;
            }

            self.buf.push(b);
            if self.buf.len() > self.max_len {
                self.discarded += 1;
                warn!(len = self.buf.len(), "dropping unterminated oversized input");
                self.buf.clear();
            }
        }

        lines
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of lines or oversized fragments dropped so far.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
