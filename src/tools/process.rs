//! 进程登记表与进程控制工具
//!
//! ProcessRegistry 是「符号名 -> PID」的查找表，不做监管或重启：部署驱动在
//! 分离后台服务时写入，后续轮次的 kill / stop 工具据此找回进程。单轮串行契约下
//! 由 Mutex 提供多会话共享时所需的互斥。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

/// 进程登记表：符号名（如 "frontend"、"deploy_script"）到 PID 的共享映射
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<String, u32>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: impl Into<String>, pid: u32) {
        self.inner.lock().unwrap().insert(name.into(), pid);
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.inner.lock().unwrap().get(name).copied()
    }

    pub fn remove(&self, name: &str) -> Option<u32> {
        self.inner.lock().unwrap().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// OS 存活探测：unix 下 kill(pid, 0)
    pub fn is_alive(&self, pid: u32) -> bool {
        is_alive(pid)
    }
}

#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    // 信号 0 只做权限与存在性检查，不投递
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

/// 向 PID 发送终止信号（unix SIGTERM / windows taskkill）
pub fn terminate(pid: u32) -> Result<(), String> {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().to_string())
        }
    }
    #[cfg(not(unix))]
    {
        std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output()
            .map_err(|e| e.to_string())
            .and_then(|o| {
                if o.status.success() {
                    Ok(())
                } else {
                    Err(String::from_utf8_lossy(&o.stderr).to_string())
                }
            })
    }
}

/// 通用杀进程工具：按符号名查登记表并发 SIGTERM
///
/// 结果三分：[NOT_FOUND] 名字未登记（登记表不变）、[ALREADY_EXITED] PID 已失效
/// （顺带清除陈旧条目）、[TERMINATED] 成功（清除条目）。
pub struct KillProcessTool {
    processes: ProcessRegistry,
}

impl KillProcessTool {
    pub fn new(processes: ProcessRegistry) -> Self {
        Self { processes }
    }
}

#[async_trait]
impl Tool for KillProcessTool {
    fn name(&self) -> &str {
        "kill_process"
    }

    fn description(&self) -> &str {
        "Terminate a tracked background process by its symbolic name. Args: {\"name\": \"e.g. deploy_script\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Symbolic process name from the registry" }
            },
            "required": []
        })
    }

    fn is_irreversible(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let name = args
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("deploy_script");

        let pid = match self.processes.get(name) {
            Some(pid) => pid,
            None => {
                return Ok(format!(
                    "[NOT_FOUND] No running process tracked under name: {}",
                    name
                ))
            }
        };

        if !self.processes.is_alive(pid) {
            self.processes.remove(name);
            return Ok(format!(
                "[ALREADY_EXITED] Process {} (PID: {}) no longer exists; stale entry removed.",
                name, pid
            ));
        }

        match terminate(pid) {
            Ok(()) => {
                self.processes.remove(name);
                tracing::info!(name = %name, pid, "process terminated");
                Ok(format!(
                    "[TERMINATED] Process {} (PID: {}) has been terminated.",
                    name, pid
                ))
            }
            Err(e) => Err(format!("Failed to kill process {}: {}", name, e)),
        }
    }
}

/// 查找系统进程（pgrep），不读登记表
pub struct FindProcessTool;

#[async_trait]
impl Tool for FindProcessTool {
    fn name(&self) -> &str {
        "find_process"
    }

    fn description(&self) -> &str {
        "Find a system process by name (pgrep). Args: {\"process_name\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "process_name": { "type": "string" } },
            "required": ["process_name"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let process_name = args
            .get("process_name")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if process_name.is_empty() {
            return Err("Empty process name".to_string());
        }

        let output = Command::new("pgrep")
            .arg(process_name)
            .output()
            .await
            .map_err(|e| format!("pgrep failed: {}", e))?;

        if output.status.success() {
            let pids = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(format!("Process {} found with PID {}", process_name, pids))
        } else {
            Ok(format!("Process {} not found", process_name))
        }
    }
}
