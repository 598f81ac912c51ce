//! 装配：配置 -> LLM 客户端 + 工具注册表 + 调度器
//!
//! create_agent 是唯一的组装入口：读配置、建共享对话与进程登记表、注册全部
//! 内置工具（部署驱动拿到 LLM 与对话句柄）、拼 system prompt（基础指令 +
//! 工具能力清单 + 工具调用格式 Schema），返回调度器与事件接收端。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use crate::config::{load_config, AppConfig};
use crate::core::dispatcher::Dispatcher;
use crate::core::AgentEvent;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::shared_conversation;
use crate::tools::{
    tool_call_schema_json, CatTool, ClearTmpTool, DeployTool, DetectOsTool, EmptyTrashTool,
    FindProcessTool, InstallPackageTool, KillProcessTool, LsTool, ProcessRegistry,
    RemoveFileTool, RemovePackageTool, ShellTool, StopServiceTool, ToolExecutor, ToolRegistry,
    WriteFileTool,
};

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a local automation agent. You operate the user's machine through tools.

Rules:
- To call a tool, reply with EXACTLY one JSON object: {\"tool\": \"<name>\", \"args\": {...}}. \
No other text around it.
- To answer the user directly, reply with plain text and no JSON.
- Tool results arrive as [TOOL OUTPUT] / [TOOL ERROR] messages; use them to decide \
your next step.
- Irreversible tools are intercepted and require the user's explicit confirmation; \
do not try to bypass that.
";

/// 按配置选择 LLM 后端；provider=mock 或缺 API Key 时回退 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    if cfg.llm.provider == "mock" {
        return Arc::new(MockLlmClient);
    }
    if std::env::var("OPENAI_API_KEY").is_err() {
        tracing::warn!("OPENAI_API_KEY not set, falling back to mock LLM");
        return Arc::new(MockLlmClient);
    }
    Arc::new(OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        None,
    ))
}

/// 读 config/prompts/system.txt（若有），否则用内置提示词
fn base_system_prompt() -> String {
    for candidate in ["config/prompts/system.txt", "../config/prompts/system.txt"] {
        if let Ok(text) = std::fs::read_to_string(candidate) {
            if !text.trim().is_empty() {
                return text;
            }
        }
    }
    DEFAULT_SYSTEM_PROMPT.to_string()
}

/// 组装完整的调度器：返回 (Dispatcher, 事件接收端)
pub fn create_agent(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(Dispatcher, mpsc::UnboundedReceiver<AgentEvent>)> {
    let cfg = load_config(config_path).context("failed to load configuration")?;

    let workspace = cfg
        .app
        .workspace_root
        .clone()
        .unwrap_or_else(|| PathBuf::from("./workspace"));
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace dir {}", workspace.display()))?;

    let llm = create_llm_from_config(&cfg);
    let conversation = shared_conversation();
    let processes = ProcessRegistry::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let mut registry = ToolRegistry::new();
    registry.register(CatTool::new(&workspace));
    registry.register(LsTool::new(&workspace));
    registry.register(WriteFileTool::new(&workspace));
    registry.register(ShellTool::new(
        cfg.tools.shell.allowed_commands.clone(),
        cfg.tools.tool_timeout_secs,
    ));
    registry.register(DetectOsTool);
    registry.register(FindProcessTool);
    registry.register(EmptyTrashTool);
    registry.register(ClearTmpTool);
    registry.register(RemoveFileTool);
    registry.register(InstallPackageTool);
    registry.register(RemovePackageTool);
    registry.register(KillProcessTool::new(processes.clone()));
    registry.register(StopServiceTool::new(processes.clone(), cfg.deploy.clone()));
    registry.register(DeployTool::new(
        llm.clone(),
        processes.clone(),
        conversation.clone(),
        events_tx.clone(),
        cfg.deploy.clone(),
    ));

    let system_prompt = format!(
        "{}\n\nAvailable tools:\n{}\n\nTool call format (JSON Schema):\n{}",
        base_system_prompt(),
        registry.to_schema_json(),
        tool_call_schema_json()
    );

    let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);
    let dispatcher = Dispatcher::new(llm, executor, conversation, system_prompt, events_tx);

    tracing::info!(
        app = %cfg.app.name.as_deref().unwrap_or("ant"),
        workspace = %workspace.display(),
        "agent assembled"
    );
    Ok((dispatcher, events_rx))
}
