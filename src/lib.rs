//! ant - 本地自动化智能体
//!
//! 用自然语言操作本机：模型以文本内 JSON 请求工具，调度循环执行并把结果折叠
//! 回对话；不可逆动作（删除、装卸包、杀进程）先过确认门，交互式部署脚本由
//! 专门的驱动盯提示、做选择、登记后台服务的 PID。
//!
//! 模块：
//! - config: TOML + 环境变量配置
//! - core: 错误、事件、确认门、调度循环、装配
//! - llm: LLM 客户端抽象（OpenAI 兼容 / Mock）
//! - memory: append-only 对话历史
//! - tools: 工具注册表、执行器与内置工具集

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod tools;

pub use config::{load_config, AppConfig};
pub use crate::core::{create_agent, AgentError, AgentEvent, Dispatcher};
