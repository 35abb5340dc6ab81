use tracing::debug;

use crate::format::StreamData;

const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub is_terminal: bool,
    pub text_delta: Option<String>,
}

impl StreamFrame {
    fn delta(text: String) -> Self {
        Self {
            is_terminal: false,
            text_delta: Some(text),
        }
    }

    fn terminal() -> Self {
        Self {
            is_terminal: true,
            text_delta: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Open,
    Done,
}

/// Reassembles `data:` lines from arbitrarily chunked bytes and accumulates the
/// text deltas they carry.
///
/// Bytes are buffered until a full line is available, so multi-byte characters
/// split across chunks decode correctly. Once the `[DONE]` sentinel is seen the
/// decoder ignores any further input.
pub struct StreamDecoder {
    buffer: Vec<u8>,
    state: DecoderState,
    text: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            state: DecoderState::Open,
            text: String::new(),
        }
    }

    /// Feed one chunk and get the frames completed by it.
    pub fn feed(&mut self, data: &[u8]) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        if self.state == DecoderState::Done {
            return frames;
        }

        self.buffer.extend_from_slice(data);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]);

            if let Some(frame) = self.parse_line(line.trim_end_matches('\r')) {
                let terminal = frame.is_terminal;
                frames.push(frame);
                if terminal {
                    self.state = DecoderState::Done;
                    self.buffer.clear();
                    break;
                }
            }
        }

        frames
    }

    /// Process whatever is left in the buffer at end of stream.
    ///
    /// A stream that ends without the sentinel is not an error; the tail line is
    /// decoded as if it had been terminated.
    pub fn finish(&mut self) -> Option<StreamFrame> {
        if self.state == DecoderState::Done {
            return None;
        }
        self.state = DecoderState::Done;

        if self.buffer.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.buffer);
        let tail = String::from_utf8_lossy(&tail);
        self.parse_line(tail.trim_end_matches('\r'))
    }

    fn parse_line(&mut self, line: &str) -> Option<StreamFrame> {
        let data = if let Some(stripped) = line.strip_prefix("data: ") {
            stripped
        } else if let Some(stripped) = line.strip_prefix("data:") {
            stripped
        } else {
            return None;
        };

        let data = data.trim();
        if data == DONE_SENTINEL {
            return Some(StreamFrame::terminal());
        }

        match serde_json::from_str::<StreamData>(data) {
            Ok(StreamData {
                message: Some(message),
                ..
            }) if !message.is_empty() => {
                self.text.push_str(&message);
                Some(StreamFrame::delta(message))
            }
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, line = %data.chars().take(200).collect::<String>(), "Skipping malformed stream line");
                None
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
