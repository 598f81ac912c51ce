//! 系统包管理工具：安装 / 卸载 / 探测操作系统
//!
//! 装卸包改变系统状态且不可简单回退，打不可逆标；命令由模型按探测到的发行版
//! 组装（如 apt-get / dnf / pacman），以完整命令行传入。

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::Tool;

async fn run_package_command(command: &str) -> Result<String, String> {
    tracing::info!(command = %command, "package tool execute");
    let output = Command::new("sh")
        .args(["-c", command])
        .output()
        .await
        .map_err(|e| format!("Execution failed: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if output.status.success() {
        Ok(stdout)
    } else {
        Err(if stderr.is_empty() { stdout } else { stderr })
    }
}

/// 安装系统包
pub struct InstallPackageTool;

#[async_trait]
impl Tool for InstallPackageTool {
    fn name(&self) -> &str {
        "install_package"
    }

    fn description(&self) -> &str {
        "Install a system package. Args: {\"installation_command\": \"e.g. sudo apt-get install -y jq\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "installation_command": { "type": "string" } },
            "required": ["installation_command"]
        })
    }

    fn is_irreversible(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("installation_command")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if command.is_empty() {
            return Err("Empty installation command".to_string());
        }
        let out = run_package_command(command)
            .await
            .map_err(|e| format!("Failed to install package:\n{}", e))?;
        Ok(format!("Package installed successfully:\n{}", out))
    }
}

/// 卸载系统包
pub struct RemovePackageTool;

#[async_trait]
impl Tool for RemovePackageTool {
    fn name(&self) -> &str {
        "remove_package"
    }

    fn description(&self) -> &str {
        "Remove a system package. Args: {\"remove_command\": \"e.g. sudo apt-get remove -y jq\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "remove_command": { "type": "string" } },
            "required": ["remove_command"]
        })
    }

    fn is_irreversible(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("remove_command")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if command.is_empty() {
            return Err("Empty remove command".to_string());
        }
        let out = run_package_command(command)
            .await
            .map_err(|e| format!("Failed to remove package:\n{}", e))?;
        Ok(format!("Package removed successfully:\n{}", out))
    }
}

/// 探测操作系统（uname -s），供模型组装正确的包管理命令
pub struct DetectOsTool;

#[async_trait]
impl Tool for DetectOsTool {
    fn name(&self) -> &str {
        "detect_operating_system"
    }

    fn description(&self) -> &str {
        "Detect the operating system (uname -s). No args."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let out = run_package_command("uname -s").await?;
        Ok(format!("Detected OS: {}", out))
    }
}
