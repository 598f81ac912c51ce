//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时。execute(tool_name, args) 先按声明 schema 校验参数
//! （失败转 InvalidArguments），再在超时内调用工具；失败转 AgentError
//! （ToolTimeout / ToolExecutionFailed），由调度器折叠回对话而非致命退出。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::registry::{validate_args, Tool, ToolRegistry};

/// 工具执行器：参数校验 + 超时 + 审计日志
pub struct ToolExecutor {
    registry: ToolRegistry,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            default_timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn to_schema_json(&self) -> String {
        self.registry.to_schema_json()
    }

    /// 执行指定工具；未注册返回 ToolExecutionFailed，参数不符返回 InvalidArguments，
    /// 超时返回 ToolTimeout；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| AgentError::ToolExecutionFailed(format!("Unknown tool: {tool_name}")))?;

        validate_args(&args, &tool.parameters_schema()).map_err(|reason| {
            AgentError::InvalidArguments {
                tool: tool_name.to_string(),
                reason,
            }
        })?;

        let limit = tool
            .timeout_secs()
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(limit, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "irreversible": tool.is_irreversible(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps longer than the executor allows"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("done".to_string())
        }
    }

    struct StrictTool;

    #[async_trait]
    impl Tool for StrictTool {
        fn name(&self) -> &str {
            "strict"
        }
        fn description(&self) -> &str {
            "requires a text argument"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_reports_execution_failed() {
        let exec = ToolExecutor::new(ToolRegistry::new(), 1);
        let err = exec.execute("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(_)));
    }

    #[tokio::test]
    async fn test_invalid_args_detected_before_execution() {
        let mut reg = ToolRegistry::new();
        reg.register(StrictTool);
        let exec = ToolExecutor::new(reg, 1);
        let err = exec.execute("strict", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments { tool, .. } if tool == "strict"));
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let mut reg = ToolRegistry::new();
        reg.register(SlowTool);
        let exec = ToolExecutor::new(reg, 1);
        let err = exec.execute("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(t) if t == "slow"));
    }

    #[tokio::test]
    async fn test_valid_call_passes_through() {
        let mut reg = ToolRegistry::new();
        reg.register(StrictTool);
        let exec = ToolExecutor::new(reg, 5);
        let out = exec.execute("strict", json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "hi");
    }
}
