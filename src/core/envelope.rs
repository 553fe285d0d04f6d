use serde::{Deserialize, Serialize};

use super::agent::{Agent, LogEntry};
use super::error::RemoteError;

/// Response envelope used by every bridge endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            status: "success".to_string(),
            data: Some(data),
            message: None,
        }
    }

    /// Unwrap the payload, turning `status: "error"` into a rejection
    pub fn into_data(self) -> Result<T, RemoteError> {
        if self.status == "error" {
            return Err(RemoteError::Rejected(
                self.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| RemoteError::Decode("response is missing data".to_string()))
    }

    /// Accept the response without requiring a payload
    pub fn into_ack(self) -> Result<Option<String>, RemoteError> {
        if self.status == "error" {
            return Err(RemoteError::Rejected(
                self.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
        Ok(self.message)
    }
}

/// Error body of non-2xx responses, `{"detail": ...}`
#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub detail: serde_json::Value,
}

impl ErrorDetail {
    /// Validation errors carry a list instead of a string; the first `msg` is used
    pub fn text(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Array(items) => items
                .iter()
                .find_map(|item| item.get("msg").and_then(|msg| msg.as_str()))
                .map(str::to_string),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentsPayload {
    pub agents: Vec<Agent>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentPayload {
    pub agent: Agent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsPayload {
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenPayload {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct PairRequest<'a> {
    pub pairing_key: &'a str,
}

#[derive(Debug, Serialize)]
pub struct MessageRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct RunCommandRequest<'a> {
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct TerminalRunPayload {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GitRunPayload {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_becomes_rejection() {
        let response: ApiResponse<TerminalRunPayload> = serde_json::from_value(serde_json::json!({
            "status": "error",
            "message": "Command timed out (30s limit)"
        }))
        .unwrap();

        match response.into_data() {
            Err(RemoteError::Rejected(message)) => {
                assert_eq!(message, "Command timed out (30s limit)")
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_data_is_a_decode_error() {
        let response: ApiResponse<AgentsPayload> =
            serde_json::from_value(serde_json::json!({"status": "success"})).unwrap();
        assert!(matches!(response.into_data(), Err(RemoteError::Decode(_))));
    }

    #[test]
    fn test_error_detail_variants() {
        let plain: ErrorDetail =
            serde_json::from_value(serde_json::json!({"detail": "Invalid pairing key"})).unwrap();
        assert_eq!(plain.text().as_deref(), Some("Invalid pairing key"));

        let validation: ErrorDetail = serde_json::from_value(serde_json::json!({
            "detail": [{"loc": ["body", "message"], "msg": "field required"}]
        }))
        .unwrap();
        assert_eq!(validation.text().as_deref(), Some("field required"));
    }
}
