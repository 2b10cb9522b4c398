//! Server-sent event frames emitted for a streamed turn

use serde_json::json;

/// Response headers for an SSE stream
pub const SSE_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache, no-transform"),
    ("Connection", "keep-alive"),
    ("X-Accel-Buffering", "no"),
];

/// One event of a turn's stream. `End` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    End,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Content(_))
    }

    pub fn to_sse(&self) -> String {
        match self {
            StreamEvent::Content(text) => format!("data: {}\n\n", json!({ "content": text })),
            StreamEvent::End => "event: end\ndata: {}\n\n".to_string(),
            StreamEvent::Error(message) => {
                format!("event: error\ndata: {}\n\n", json!({ "message": message }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_frame() {
        let frame = StreamEvent::Content("Hi \"there\"".to_string()).to_sse();
        assert_eq!(frame, "data: {\"content\":\"Hi \\\"there\\\"\"}\n\n");
    }

    #[test]
    fn test_terminal_frames() {
        assert_eq!(StreamEvent::End.to_sse(), "event: end\ndata: {}\n\n");
        assert_eq!(
            StreamEvent::Error("boom".to_string()).to_sse(),
            "event: error\ndata: {\"message\":\"boom\"}\n\n"
        );
        assert!(StreamEvent::End.is_terminal());
        assert!(!StreamEvent::Content(String::new()).is_terminal());
    }

    #[test]
    fn test_headers() {
        assert!(SSE_HEADERS.contains(&("X-Accel-Buffering", "no")));
        assert!(SSE_HEADERS.contains(&("Cache-Control", "no-cache, no-transform")));
    }
}
