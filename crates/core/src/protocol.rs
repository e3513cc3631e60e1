//! Defines the frames sent back to the remote model over the data channel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The only content type a tool result is ever tagged with.
pub const RESULT_CONTENT_TYPE: &str = "application/json";

/// The canonical answer to a single tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content_type: &'static str,
    pub result: Map<String, Value>,
}

impl ToolResult {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, result: Map<String, Value>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content_type: RESULT_CONTENT_TYPE,
            result,
        }
    }
}

/// Messages written by this client onto the event channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Returns the outcome of a tool call to the model.
    ToolResult {
        tool_call_id: String,
        name: String,
        content_type: String,
        result: Map<String, Value>,
    },
}

impl OutboundFrame {
    /// Serializes the frame to the JSON text written on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<ToolResult> for OutboundFrame {
    fn from(result: ToolResult) -> Self {
        OutboundFrame::ToolResult {
            tool_call_id: result.call_id,
            name: result.name,
            content_type: result.content_type.to_string(),
            result: result.result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_frame_shape() {
        let mut result = Map::new();
        result.insert("ok".to_string(), json!(true));
        let frame = OutboundFrame::from(ToolResult::new("c1", "subscribe_to_list", result));

        let text = frame.to_json().unwrap();
        assert!(text.starts_with(r#"{"type":"tool_result","#));

        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "tool_result",
                "tool_call_id": "c1",
                "name": "subscribe_to_list",
                "content_type": "application/json",
                "result": { "ok": true }
            })
        );
    }

    #[test]
    fn test_content_type_is_fixed() {
        let result = ToolResult::new("c2", "create_contact_request", Map::new());
        assert_eq!(result.content_type, RESULT_CONTENT_TYPE);
    }
}
