//! Line reassembly for SSE byte streams.
//!
//! Transport chunks rarely line up with SSE lines. The buffer keeps the
//! unterminated tail of the last chunk and prepends it to the next one.

/// SSE data line prefix.
pub const DATA_PREFIX: &str = "data: ";

/// Reassembles newline-delimited `data:` lines from arbitrary byte chunks.
///
/// Bytes are accumulated before decoding, so a multi-byte UTF-8 character
/// split across two chunks is decoded intact once its line completes.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every `data:` line it completed, in order.
    ///
    /// Lines are returned trimmed. Comments, keep-alives, `event:` lines
    /// and blank separators are dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let tail = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, tail);

        complete
            .split(|&b| b == b'\n')
            .filter_map(data_line)
            .collect()
    }

    /// Take the unterminated trailing line, if it is a `data:` line.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        data_line(&rest)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn data_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    line.starts_with(DATA_PREFIX).then(|| line.to_string())
}
