//! 过程事件：面向人类输出通道（终端 / 前端），不回流给模型
//!
//! 部署驱动在子进程运行中逐行推送 DeployLog，是调度阻塞期间唯一的可见性来源。

use serde::Serialize;

/// 单轮过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 工具执行失败（已折叠回对话）
    ToolFailure { tool: String, reason: String },
    /// 不可逆工具被拦截，等待用户 yes/no
    ConfirmationRequest { tool: String },
    /// 部署脚本的一行实时输出
    DeployLog { line: String },
    /// 错误
    Error { text: String },
}
