//! Uniform tool results

use serde::Serialize;

use crate::engine::EngineKind;
use crate::gateway::error::GatewayResult;

/// Successful tool result, tagged with the engine that produced it
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub engine: Option<EngineKind>,
    /// Human rendering, prefixed with `[<engine>]` when an engine is known
    pub text: String,
    pub data: serde_json::Value,
}

impl ToolOutput {
    pub fn new(engine: Option<EngineKind>, body: impl Into<String>, data: serde_json::Value) -> Self {
        let body = body.into();
        let text = match engine {
            Some(kind) => format!("[{kind}] {body}"),
            None => body,
        };
        Self { engine, text, data }
    }
}

/// Caller-facing envelope for any tool invocation
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    pub engine: Option<EngineKind>,
    pub text: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

impl ToolResponse {
    /// Tags an untagged response with the engine it ran against.
    pub fn tagged(mut self, engine: EngineKind) -> Self {
        if self.engine.is_none() {
            self.engine = Some(engine);
            self.text = format!("[{engine}] {}", self.text);
        }
        self
    }
}

impl From<GatewayResult<ToolOutput>> for ToolResponse {
    fn from(result: GatewayResult<ToolOutput>) -> Self {
        match result {
            Ok(output) => Self {
                success: true,
                engine: output.engine,
                text: output.text,
                data: Some(output.data),
                error: None,
                error_kind: None,
            },
            Err(e) => Self {
                success: false,
                engine: None,
                text: format!("Error: {e}"),
                data: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind().to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::error::GatewayError;

    #[test]
    fn test_output_is_prefixed_with_engine() {
        let output = ToolOutput::new(Some(EngineKind::Mysql), "3 rows", serde_json::json!([]));
        assert_eq!(output.text, "[mysql] 3 rows");
        let untagged = ToolOutput::new(None, "2 connections", serde_json::Value::Null);
        assert_eq!(untagged.text, "2 connections");
    }

    #[test]
    fn test_error_envelope_carries_kind() {
        let response = ToolResponse::from(Err(GatewayError::permission("no permission for UPDATE on ORDERS")));
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("PermissionError"));
        assert!(response.text.contains("ORDERS"));
        assert!(response.data.is_none());
    }

    #[test]
    fn test_error_envelope_can_be_tagged_once() {
        let response = ToolResponse::from(Err(GatewayError::validation("bad sql")))
            .tagged(EngineKind::Postgres)
            .tagged(EngineKind::Mysql);
        assert_eq!(response.engine, Some(EngineKind::Postgres));
        assert_eq!(response.text, "[postgres] Error: Invalid request: bad sql");
    }
}
