//! 工具系统：注册表、执行器与内置工具集
//!
//! 内置工具分两档：只读/可恢复（cat、ls、shell 白名单、find_process、探测 OS、
//! write_file 沙箱内）直接执行；不可逆（清空回收站/tmp、删文件、装卸包、杀进程、
//! 停服务）打标后必经确认门。run_deploy_script 是交互式长工具，单独有超时与
//! 进程登记逻辑。

pub mod cleanup;
pub mod deploy;
pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod package;
pub mod process;
pub mod registry;
pub mod schema;
pub mod shell;

pub use cleanup::{ClearTmpTool, EmptyTrashTool, RemoveFileTool};
pub use deploy::{DeployTool, StopServiceTool};
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{CatTool, LsTool, SafeFs, WriteFileTool};
pub use package::{DetectOsTool, InstallPackageTool, RemovePackageTool};
pub use process::{FindProcessTool, KillProcessTool, ProcessRegistry};
pub use registry::{validate_args, Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use shell::ShellTool;
