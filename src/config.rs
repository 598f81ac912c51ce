//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ANT__*` 覆盖（双下划线表示嵌套，
//! 如 `ANT__LLM__PROVIDER=openai`、`ANT__DEPLOY__SCRIPT_PATH=...`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub deploy: DeploySection,
}

/// [app] 段：应用名与文件工具的沙箱根目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；无 API Key 时自动回退 mock
    pub provider: String,
    pub model: String,
    /// OpenAI 兼容端点（DeepSeek、自建代理等）
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
        }
    }
}

/// [tools] 段：工具超时与 Shell 白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）；部署工具有自己的超时，不受此限
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            shell: ShellSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.shell] 段：允许执行的命令名（仅首词，如 ls、grep、df）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: vec![
                "ls".into(),
                "grep".into(),
                "cat".into(),
                "head".into(),
                "tail".into(),
                "wc".into(),
                "find".into(),
                "uname".into(),
                "df".into(),
                "du".into(),
                "ps".into(),
            ],
        }
    }
}

/// [deploy] 段：交互式部署驱动的脚本路径、提示词、完成标记与远端命令模板
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    /// 部署脚本路径（bash 执行）
    pub script_path: PathBuf,
    /// 每个等待阶段的超时上限（秒）
    pub timeout_secs: u64,
    /// 主选择提示子串（如 "Enter your choice"）
    pub primary_prompt: String,
    /// 次选择提示子串（如 "Enter backend choice"）
    pub secondary_prompt: String,
    /// 后台服务完成标记的正则，捕获组 1 为 PID（如 "Frontend PID:\\s*(\\d+)"）
    pub completion_marker: String,
    /// 注册到进程表的符号名
    pub service_name: String,
    /// 等于此主选项时视为长驻服务（后台分离）
    pub service_choice: String,
    /// 远端终止命令模板，{pid} 会被替换；未设置时本地 SIGTERM
    pub remote_kill_command: Option<String>,
    /// 进程表无记录时的"尽力而为"远端清理命令（如按端口查杀）
    pub remote_cleanup_command: Option<String>,
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            script_path: PathBuf::from("deploy/deploy.sh"),
            timeout_secs: 900,
            primary_prompt: "Enter your choice".to_string(),
            secondary_prompt: "Enter backend choice".to_string(),
            completion_marker: r"Frontend PID:\s*(\d+)".to_string(),
            service_name: "frontend".to_string(),
            service_choice: "2".to_string(),
            remote_kill_command: None,
            remote_cleanup_command: None,
        }
    }
}

/// 从 config 目录加载配置，环境变量 ANT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ANT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ANT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
