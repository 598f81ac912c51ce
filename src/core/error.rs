//! Agent 错误类型
//!
//! 工具层失败（参数、执行、超时）在调度边界被捕获并折叠回对话，永不致命；
//! 部署专属错误（ProtocolMismatch / DecisionParseError / HandoffFailed）作为失败的部署回合上报；
//! 仅 LLM 边界不可达与取消会终止当前回合，由顶层捕获后报告。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 工具参数不符合声明的 schema（折叠为工具错误，供模型修正）
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 单轮内工具调用链超过步数上限（防止模型无限请求工具）
    #[error("Dispatch loop budget exceeded after {0} steps")]
    LoopBudgetExceeded(usize),

    /// 部署脚本在超时内未输出预期的交互提示
    #[error("Deploy protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// 模型对部署选项的回答无法解析为结构化选择
    #[error("Deploy decision parse error: {0}")]
    DecisionParseError(String),

    /// 后台服务的完成标记在子进程退出前未出现
    #[error("Deploy handoff failed: {0}")]
    HandoffFailed(String),

    /// 已有一个待确认工具时又收到不可逆请求（显式拒绝，不覆盖）
    #[error("Confirmation already pending for tool '{0}'")]
    ConfirmationPending(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}
