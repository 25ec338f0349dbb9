//! Bounded accumulator for inbound application text.

use bytes::BytesMut;

/// 256 KiB.
pub const DEFAULT_BUFFER_CEILING: usize = 256 * 1024;

/// Append-only byte window that keeps the newest `ceiling` bytes.
#[derive(Debug)]
pub struct ResponseBuffer {
    data: BytesMut,
    ceiling: usize,
    /// Bytes discarded from the front since the last clear.
    truncated: usize,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CEILING)
    }
}

impl ResponseBuffer {
    pub fn new(ceiling: usize) -> Self {
        Self {
            data: BytesMut::new(),
            ceiling: ceiling.max(1),
            truncated: 0,
        }
    }

    /// Append, sliding the window forward if the ceiling is exceeded.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        if bytes.len() >= self.ceiling {
            let dropped = self.data.len() + bytes.len() - self.ceiling;
            self.data.clear();
            self.data
                .extend_from_slice(&bytes[bytes.len() - self.ceiling..]);
            self.note_truncation(dropped);
            return;
        }

        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.ceiling);
        if overflow > 0 {
            let _ = self.data.split_to(overflow);
            self.note_truncation(overflow);
        }
        self.data.extend_from_slice(bytes);
    }

    fn note_truncation(&mut self, dropped: usize) {
        self.truncated += dropped;
        tracing::warn!(
            "response buffer over {} bytes; discarded {dropped} oldest bytes",
            self.ceiling
        );
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.truncated = 0;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn truncated(&self) -> usize {
        self.truncated
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Contents as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}
