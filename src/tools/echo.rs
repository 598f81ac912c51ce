//! Echo 工具：回显文本，Mock LLM 回退与调度测试的基础工具

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

/// 回显文本；uppercase 为真时转大写
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back. Args: {\"text\": \"message\", \"uppercase\": false}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "uppercase": { "type": "boolean" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        if args.get("uppercase").and_then(|v| v.as_bool()).unwrap_or(false) {
            Ok(text.to_uppercase())
        } else {
            Ok(text.to_string())
        }
    }
}
