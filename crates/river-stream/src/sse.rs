//! Incremental server-sent-event line decoding
//!
//! Bytes are buffered until a newline arrives, then the complete line is
//! decoded. A newline byte never occurs inside a multi-byte UTF-8 sequence,
//! so characters split across chunks are reassembled before decoding.

/// What one `data:` line carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// `data: <payload>`
    Data(String),
    /// Anything else (comments, `event:`, blank separators)
    Other,
}

/// Line splitter that keeps the trailing partial line across reads
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.pending.extend_from_slice(chunk);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(classify)
            .collect()
    }

    /// Flush whatever is left once the body ends
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(classify(&line))
    }

    /// Bytes held back waiting for a newline
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

fn classify(raw: &[u8]) -> SseLine {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    match line.strip_prefix("data:") {
        Some(payload) => SseLine::Data(payload.strip_prefix(' ').unwrap_or(payload).to_string()),
        None => SseLine::Other,
    }
}
