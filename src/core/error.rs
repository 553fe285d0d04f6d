use thiserror::Error;

use super::agent::ActionKind;

/// Failure talking to the bridge over HTTP
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("credential rejected by the bridge")]
    Unauthorized,
    #[error("bridge returned {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Http { status: u16, detail: Option<String> },
    #[error("bridge rejected the request: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Reason text suitable for showing to a user, when the bridge gave one
    pub fn reason(&self) -> Option<&str> {
        match self {
            RemoteError::Http {
                detail: Some(detail),
                ..
            } => Some(detail),
            RemoteError::Rejected(message) => Some(message),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

/// The push channel could not be opened or dropped
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid realtime endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("failed to connect to realtime channel: {0}")]
    Connect(String),
    #[error("realtime channel dropped: {0}")]
    Dropped(String),
}

/// A refresh failed; the previously held snapshot is kept
#[derive(Debug, Clone, Error)]
#[error("refresh of {target} failed: {source}")]
pub struct FetchError {
    pub target: String,
    #[source]
    pub source: RemoteError,
}

/// A dispatched action failed; no local state was changed
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("{action} failed: {}", .reason.as_deref().unwrap_or("request failed"))]
    Remote {
        action: ActionKind,
        reason: Option<String>,
        #[source]
        source: RemoteError,
    },
    #[error("nothing to send")]
    EmptyInput,
}

impl ActionError {
    pub fn remote(action: ActionKind, source: RemoteError) -> Self {
        ActionError::Remote {
            action,
            reason: source.reason().map(str::to_string),
            source,
        }
    }
}

/// A push payload that is not valid JSON
#[derive(Debug, Error)]
#[error("malformed push payload: {0}")]
pub struct ParseError(#[from] pub serde_json::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_uses_remote_reason() {
        let err = ActionError::remote(
            ActionKind::Approve,
            RemoteError::Http {
                status: 404,
                detail: Some("Agent not found".to_string()),
            },
        );
        assert_eq!(err.to_string(), "approve failed: Agent not found");
    }

    #[test]
    fn test_action_error_falls_back_to_generic_reason() {
        let err = ActionError::remote(
            ActionKind::Start,
            RemoteError::Network("connection refused".to_string()),
        );
        assert_eq!(err.to_string(), "start failed: request failed");
    }
}
