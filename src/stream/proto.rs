use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stream::client::StreamError;

/// Event name used when a frame carries no `event:` field.
pub const DEFAULT_EVENT_NAME: &str = "message";

/// One decoded frame of the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Decodes the payload map into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_NAME, Map::new())
    }
}

/// Lifecycle position of a stream session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// No attempt in progress.
    Idle,
    /// Request issued, nothing received yet.
    Connecting,
    /// At least one chunk received.
    Open,
    /// Transport terminated; a reconnect may be pending.
    Closed,
}

/// Item delivered to the consumer of a session.
#[derive(Debug)]
pub enum StreamUpdate {
    /// A request was issued for the subscription.
    Opened,
    /// A frame was decoded.
    Event(Event),
    /// The transport ended without an explicit disconnect. `None` means a
    /// clean end of stream.
    Closed(Option<StreamError>),
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::{Event, DEFAULT_EVENT_NAME};

    #[derive(Debug, Deserialize, PartialEq)]
    struct ChoreCompleted {
        chore_id: u64,
        completed_by: String,
    }

    #[test]
    fn default_event_is_empty_message() {
        let event = Event::default();
        assert_eq!(event.name, DEFAULT_EVENT_NAME);
        assert!(event.payload.is_empty());
    }

    #[test]
    fn payload_decodes_into_typed_struct() {
        let payload = json!({"chore_id": 7, "completed_by": "sam"});
        let event = Event::new(
            "chore_completed",
            payload.as_object().cloned().unwrap_or_default(),
        );

        let decoded: ChoreCompleted = event.payload_as().expect("typed payload");
        assert_eq!(
            decoded,
            ChoreCompleted {
                chore_id: 7,
                completed_by: "sam".to_string(),
            }
        );
    }

    #[test]
    fn payload_decode_reports_missing_fields() {
        let event = Event::new("chore_completed", Default::default());
        assert!(event.payload_as::<ChoreCompleted>().is_err());
    }
}
