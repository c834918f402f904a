//! Incremental server-sent-events framing for provider responses.
//!
//! Bytes arrive in arbitrary chunks; a frame is complete at a blank line. Only the
//! `data:` lines of a frame are kept, joined with newlines.

use crate::error::ProviderError;

#[derive(Debug)]
pub struct SseFrameDecoder {
    buffer: Vec<u8>,
    /// Leading bytes of `buffer` already searched for a frame boundary
    scanned: usize,
    /// Cap on one unterminated frame
    max_frame_bytes: usize,
}

impl SseFrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_frame_bytes,
        }
    }

    /// Feed raw bytes; returns the data payloads of every frame completed by them.
    /// Fails once the frame still being received grows past the cap.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ProviderError> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        let mut start = 0;
        // A boundary can straddle two pushes.
        let mut from = self.scanned.saturating_sub(1);
        while let Some(offset) = find_frame_end(&self.buffer[from..]) {
            let end = from + offset;
            if let Some(data) = frame_data(&self.buffer[start..end]) {
                payloads.push(data);
            }
            start = end + 2;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_frame_bytes {
            let pending = self.buffer.len();
            self.buffer.clear();
            self.scanned = 0;
            return Err(ProviderError::InvalidResponse(format!(
                "Stream event exceeded {} bytes ({} buffered)",
                self.max_frame_bytes, pending
            )));
        }
        Ok(payloads)
    }

    /// Flush a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buffer);
        frame_data(&rest)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn frame_data(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let mut data_lines = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}
