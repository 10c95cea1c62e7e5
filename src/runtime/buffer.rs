//! Per-connection output buffer.
//!
//! A fixed-capacity byte array with an end index and a send cursor.
//! Bytes in `cursor..end` are queued but not yet accepted by the socket.
//! The array is allocated once per connection and never grows.

/// Error returned when an append would exceed the buffer capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFull {
    pub capacity: usize,
}

impl std::fmt::Display for BufferFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "output buffer full ({} bytes)", self.capacity)
    }
}

impl std::error::Error for BufferFull {}

impl From<BufferFull> for std::io::Error {
    fn from(e: BufferFull) -> Self {
        std::io::Error::new(std::io::ErrorKind::OutOfMemory, e)
    }
}

/// Bounded send buffer.
///
/// Invariant: `cursor <= end <= data.len()`.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Box<[u8]>,
    /// Count of valid bytes.
    end: usize,
    /// Next unsent byte.
    cursor: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            end: 0,
            cursor: 0,
        }
    }

    /// Bytes queued but not yet sent.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.cursor..self.end]
    }

    pub fn has_pending(&self) -> bool {
        self.cursor < self.end
    }

    /// Room left for appending.
    ///
    /// A drained buffer counts as fully free since it is rewound on the next
    /// append.
    pub fn free(&self) -> usize {
        if self.has_pending() {
            self.data.len() - self.end
        } else {
            self.data.len()
        }
    }

    /// Append one byte, rewinding first if everything queued has been sent.
    pub fn push(&mut self, byte: u8) -> Result<(), BufferFull> {
        if !self.has_pending() {
            self.reset();
        }
        if self.end == self.data.len() {
            return Err(BufferFull {
                capacity: self.data.len(),
            });
        }
        self.data[self.end] = byte;
        self.end += 1;
        Ok(())
    }

    /// Mark `n` pending bytes as sent.
    ///
    /// Rewinds to empty once the last pending byte is consumed.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.end - self.cursor, "consumed past end");
        self.cursor = (self.cursor + n).min(self.end);
        if self.cursor == self.end {
            self.reset();
        }
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.end = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(buf: &mut OutputBuffer, bytes: &[u8]) {
        for &b in bytes {
            buf.push(b).unwrap();
        }
    }

    #[test]
    fn test_push_and_drain() {
        let mut buf = OutputBuffer::new(4);
        assert!(!buf.has_pending());
        assert_eq!(buf.free(), 4);

        fill(&mut buf, b"abc");
        assert_eq!(buf.pending(), b"abc");
        assert_eq!(buf.free(), 1);

        buf.consume(2);
        assert_eq!(buf.pending(), b"c");

        buf.consume(1);
        assert!(!buf.has_pending());
        assert_eq!(buf.free(), 4);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut buf = OutputBuffer::new(2);
        buf.push(b'a').unwrap();
        buf.push(b'b').unwrap();
        assert_eq!(buf.push(b'c'), Err(BufferFull { capacity: 2 }));
        assert_eq!(buf.pending(), b"ab");
    }

    #[test]
    fn test_drained_buffer_rewinds_on_push() {
        let mut buf = OutputBuffer::new(3);
        fill(&mut buf, b"xyz");
        buf.consume(3);
        fill(&mut buf, b"abc");
        assert_eq!(buf.pending(), b"abc");
    }

    #[test]
    fn test_partial_consume_keeps_tail_space() {
        let mut buf = OutputBuffer::new(4);
        fill(&mut buf, b"abcd");
        buf.consume(3);
        // Tail is still pending, so the consumed prefix is not reclaimed yet.
        assert_eq!(buf.free(), 0);
        assert!(buf.push(b'e').is_err());

        buf.consume(1);
        buf.push(b'e').unwrap();
        assert_eq!(buf.pending(), b"e");
    }

    #[test]
    fn test_overflow_converts_to_io_error() {
        let err: std::io::Error = BufferFull { capacity: 8 }.into();
        assert_eq!(err.kind(), std::io::ErrorKind::OutOfMemory);
    }
}
