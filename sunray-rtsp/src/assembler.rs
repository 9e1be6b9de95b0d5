//! Chunk reassembly for the control connection.
//!
//! TCP delivers the protocol as an arbitrary byte stream; a request whose
//! `Content-length` payload has not fully arrived must be held back and
//! merged with the next chunk. The assembler buffers inbound bytes and
//! yields one complete message at a time, without performing any I/O.

/// Upper bound on buffered bytes for a single in-flight message; callers
/// drop the connection when [`MessageAssembler::buffered_len`] crosses it.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: Vec<u8>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Returns the next complete message, or `None` when more bytes are
    /// needed. A message is complete at its head terminator plus, when a
    /// `Content-length` option is present, that many payload bytes.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        let (head_end, body_start) = find_head_terminator(&self.buffer)?;
        let content_length = scan_content_length(&self.buffer[..head_end]).unwrap_or(0);
        let total = body_start + content_length;
        if self.buffer.len() < total {
            return None;
        }
        let rest = self.buffer.split_off(total);
        Some(std::mem::replace(&mut self.buffer, rest))
    }
}

/// Finds the first blank line; returns (head length, payload offset).
fn find_head_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = buf.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l + 1 < c => Some((l, l + 2)),
        (Some(c), _) => Some((c, c + 4)),
        (None, Some(l)) => Some((l, l + 2)),
        (None, None) => None,
    }
}

fn scan_content_length(head: &[u8]) -> Option<usize> {
    let head = String::from_utf8_lossy(head);
    for line in head.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}
