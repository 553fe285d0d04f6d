use serde::Deserialize;
use std::fmt;

use super::error::ParseError;

/// Lifecycle of the push channel as seen by readers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Open => f.write_str("open"),
            ConnectionState::Closed => f.write_str("closed"),
        }
    }
}

/// A push notification meaning "refetch". The payload is never trusted as
/// state; at most it names the agent that changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub agent_id: Option<String>,
    pub event: Option<String>,
}

impl Invalidation {
    /// Whether a watcher of `agent_id` should refetch for this signal
    pub fn concerns(&self, agent_id: &str) -> bool {
        match &self.agent_id {
            Some(id) => id == agent_id,
            None => true,
        }
    }
}

// Shape of the bridge's agent events. Every field is optional so any JSON
// object still counts as an invalidation.
#[derive(Debug, Default, Deserialize)]
struct PushEvent {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
}

/// Parse one text frame from the push channel
pub fn parse_push_payload(text: &str) -> Result<Invalidation, ParseError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let event = serde_json::from_value::<PushEvent>(value).unwrap_or_default();
    Ok(Invalidation {
        agent_id: event.agent_id,
        event: event.event_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_event_names_the_agent() {
        let text = r#"{"event_type":"approval_required","agent_id":"a1","timestamp":"2025-03-01T10:00:00","payload":{"details":"rm -rf build"}}"#;
        let signal = parse_push_payload(text).unwrap();
        assert_eq!(signal.agent_id.as_deref(), Some("a1"));
        assert_eq!(signal.event.as_deref(), Some("approval_required"));
        assert!(signal.concerns("a1"));
        assert!(!signal.concerns("a2"));
    }

    #[test]
    fn test_unknown_shape_invalidates_everything() {
        let signal = parse_push_payload(r#"[1, 2, 3]"#).unwrap();
        assert_eq!(signal, Invalidation::default());
        assert!(signal.concerns("anything"));
    }

    #[test]
    fn test_malformed_payload_is_a_parse_error() {
        assert!(parse_push_payload("not json {").is_err());
    }
}
