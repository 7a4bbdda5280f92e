//! Response types sent from the background engine back to the UI.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A response to an [`crate::RpcRequest`], correlated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Correlation id, copied from the request.
    pub id: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl RpcResponse {
    /// Create a successful response.
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            outcome: Outcome::ok(data),
        }
    }

    /// Create a failed response.
    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::err(error),
        }
    }
}

/// Uniform `{success, data | error}` envelope.
///
/// Every handler returns this shape so the UI can branch on `success`
/// without knowing which request produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    /// Successful outcome carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed outcome carrying an error message.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Whether this outcome is a success.
    pub fn is_ok(&self) -> bool {
        self.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_outcome() {
        let outcome = Outcome::ok(serde_json::json!({"tools": []}));
        assert!(outcome.is_ok());
        assert!(outcome.error.is_none());

        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_err_outcome() {
        let outcome = Outcome::err("Not connected");
        assert!(!outcome.is_ok());
        assert!(outcome.data.is_none());

        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("Not connected"));
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = RpcResponse::ok(42, serde_json::json!({"count": 3}));
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: RpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, 42);
        assert!(parsed.outcome.is_ok());
        assert_eq!(parsed.outcome.data.unwrap()["count"], 3);
    }

    #[test]
    fn test_err_response() {
        let resp = RpcResponse::err(9, "boom");
        assert_eq!(resp.id, 9);
        assert_eq!(resp.outcome.error.as_deref(), Some("boom"));
    }
}
