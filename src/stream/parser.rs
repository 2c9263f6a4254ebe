//! Incremental event-stream frame parser.
//!
//! Frames are separated by a blank line (`"\n\n"`). The parser works on raw
//! bytes so a delimiter split across transport chunks is still detected, and
//! any trailing partial frame stays buffered until the next `feed` call.

use bytes::BytesMut;
use serde_json::{Map, Value};
use tracing::warn;

use crate::stream::proto::{Event, DEFAULT_EVENT_NAME};

const FRAME_DELIMITER: &[u8] = b"\n\n";
const EVENT_FIELD: &str = "event:";
const DATA_FIELD: &str = "data:";

/// Byte accumulator that splits complete frames into [`Event`]s.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
    // Offset before which the buffer is known to hold no delimiter.
    scanned: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every event completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Event> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.next_delimiter() {
            let frame = self.buffer.split_to(end + FRAME_DELIMITER.len());
            self.scanned = 0;
            events.push(decode_frame(&frame[..end]));
        }
        events
    }

    /// Drops any partially received frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn next_delimiter(&mut self) -> Option<usize> {
        let found = self.buffer[self.scanned..]
            .windows(FRAME_DELIMITER.len())
            .position(|window| window == FRAME_DELIMITER)
            .map(|offset| self.scanned + offset);

        if found.is_none() {
            // Keep the last byte: it may be the first half of a delimiter.
            self.scanned = self.buffer.len().saturating_sub(FRAME_DELIMITER.len() - 1);
        }
        found
    }
}

/// Decodes one frame body (delimiter excluded).
pub fn decode_frame(frame: &[u8]) -> Event {
    let text = String::from_utf8_lossy(frame);
    let mut name: Option<String> = None;
    let mut data: Option<&str> = None;

    for line in text.split('\n') {
        if let Some(value) = line.strip_prefix(EVENT_FIELD) {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix(DATA_FIELD) {
            data = Some(value.trim());
        }
    }

    let name = name.unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string());
    let payload = data
        .map(|raw| decode_payload(&name, raw))
        .unwrap_or_default();
    Event { name, payload }
}

fn decode_payload(name: &str, raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(
                event = "stream_payload_not_object",
                event_name = name,
                kind = json_kind(&other)
            );
            Map::new()
        }
        Err(err) => {
            warn!(
                event = "stream_payload_decode_failed",
                event_name = name,
                error = %err
            );
            Map::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
