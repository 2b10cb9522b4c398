//! Incremental JSON parser for NDJSON completion streams
//!
//! Network chunks split objects at arbitrary byte offsets. The parser buffers
//! bytes and hands out each top-level `{...}` object once it is complete,
//! ignoring braces inside strings.

use serde::Deserialize;

use crate::errors::{RagError, Result};

/// Maximum buffer size (1MB)
pub const MAX_BUFFER_SIZE: usize = 1_048_576;

#[derive(Debug)]
pub struct JsonParser {
    buffer: Vec<u8>,
    max_buffer_size: usize,
}

/// One frame of an Ollama `/api/chat` stream
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}

impl ChatChunk {
    /// Text delta carried by this frame, if any
    pub fn content(&self) -> Option<&str> {
        self.message
            .as_ref()
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
    }
}

impl JsonParser {
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUFFER_SIZE)
    }

    pub fn with_capacity(max_buffer_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_buffer_size,
        }
    }

    /// Append network bytes
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buffer.len() + bytes.len() > self.max_buffer_size {
            return Err(RagError::UpstreamFailure(format!(
                "stream buffer overflow: {} bytes exceeds maximum {}",
                self.buffer.len() + bytes.len(),
                self.max_buffer_size
            )));
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Next complete object, removing it (and anything before it) from the buffer
    pub fn next_object(&mut self) -> Result<Option<String>> {
        match self.find_complete_object()? {
            Some((start, end)) => {
                let json = String::from_utf8_lossy(&self.buffer[start..=end]).into_owned();
                self.buffer.drain(..=end);
                Ok(Some(json))
            }
            None => Ok(None),
        }
    }

    fn find_complete_object(&self) -> Result<Option<(usize, usize)>> {
        let mut depth: i32 = 0;
        let mut start: Option<usize> = None;
        let mut in_string = false;
        let mut escape_next = false;

        for (i, &byte) in self.buffer.iter().enumerate() {
            if escape_next {
                escape_next = false;
                continue;
            }
            if in_string {
                match byte {
                    b'\\' => escape_next = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }

            match byte {
                b'"' => in_string = true,
                b'{' => {
                    if depth == 0 {
                        start = Some(i);
                    }
                    depth += 1;
                }
                b'}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(RagError::UpstreamFailure(
                            "malformed stream: unbalanced closing brace".to_string(),
                        ));
                    }
                    if depth == 0 {
                        if let Some(start) = start {
                            return Ok(Some((start, i)));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(None)
    }

    pub fn parse_chunk(&self, json: &str) -> Result<ChatChunk> {
        serde_json::from_str(json)
            .map_err(|e| RagError::UpstreamFailure(format!("Failed to parse stream frame: {}", e)))
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// True when only whitespace remains
    pub fn is_drained(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}
