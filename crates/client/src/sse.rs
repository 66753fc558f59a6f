//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; [`SseDecoder::push`] buffers partial
//! lines and returns every frame completed by the chunk. Only the `event`
//! and `data` fields are kept: `id`, `retry` and comment lines are
//! skipped, since the progress protocol never resumes a stream.

/// Upper bound on one line and on one frame's joined `data`, in bytes.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` lines of the frame joined with `\n`.
    pub data: String,
}

/// A line or frame grew past the decoder's limit. The decoder is reset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("server-sent event frame exceeds {limit} bytes")]
pub struct FrameTooLarge {
    pub limit: usize,
}

/// Stateful line/frame decoder.
#[derive(Debug)]
pub struct SseDecoder {
    limit: usize,
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder rejecting lines or frames longer than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            pending: Vec::new(),
            event: None,
            data: Vec::new(),
            data_bytes: 0,
        }
    }

    /// Feed a chunk and collect the frames it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, FrameTooLarge> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let mut line = &self.pending[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if line.len() > self.limit {
                return Err(self.reset());
            }
            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(frame) = self.handle_line(&line)? {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.limit {
            return Err(self.reset());
        }
        Ok(frames)
    }

    fn handle_line(&mut self, line: &str) -> Result<Option<SseFrame>, FrameTooLarge> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field.trim_start_matches('\u{feff}') {
            "data" => {
                self.data_bytes += value.len() + 1;
                if self.data_bytes > self.limit {
                    return Err(self.reset());
                }
                self.data.push(value.to_string());
            }
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        self.data_bytes = 0;
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }

    fn reset(&mut self) -> FrameTooLarge {
        self.pending.clear();
        self.event = None;
        self.data.clear();
        self.data_bytes = 0;
        FrameTooLarge { limit: self.limit }
    }
}
