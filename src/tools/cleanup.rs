//! 不可逆清理工具：清空回收站 / 清空 tmp / 删除任意路径
//!
//! 三者都在注册表中打不可逆标，调用必经确认门。执行走 sh -c（~ 展开需要 shell），
//! 输出逐行收集返回。

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

/// 运行一条清理命令，返回合并后的输出文本
async fn run_cleanup(command: &str) -> Result<String, String> {
    tracing::info!(command = %command, "cleanup tool execute");
    let output = Command::new("sh")
        .args(["-c", command])
        .output()
        .await
        .map_err(|e| format!("Execution failed: {}", e))?;

    let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        lines.push(format!("stderr: {}", stderr.trim()));
    }
    if !output.status.success() {
        return Err(format!("Exit {:?}\n{}", output.status, lines.join("\n")));
    }
    Ok(lines.join("\n"))
}

use crate::tools::Tool;

/// 清空用户回收站
pub struct EmptyTrashTool;

#[async_trait]
impl Tool for EmptyTrashTool {
    fn name(&self) -> &str {
        "empty_trash"
    }

    fn description(&self) -> &str {
        "Empty the user's Trash permanently. No args."
    }

    fn is_irreversible(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        let logs = run_cleanup("rm -rf ~/.local/share/Trash/*").await?;
        Ok(if logs.is_empty() {
            "Trash emptied successfully.".to_string()
        } else {
            format!("Trash emptied successfully. Logs:\n{}", logs)
        })
    }
}

/// 清空用户 tmp 目录
pub struct ClearTmpTool;

#[async_trait]
impl Tool for ClearTmpTool {
    fn name(&self) -> &str {
        "clear_tmp"
    }

    fn description(&self) -> &str {
        "Clear the user's ~/tmp directory permanently. No args."
    }

    fn is_irreversible(&self) -> bool {
        true
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        run_cleanup("rm -rf ~/tmp/*").await?;
        Ok("Tmp cleared successfully.".to_string())
    }
}

/// 删除任意文件或目录（不限沙箱，因此必须确认）
pub struct RemoveFileTool;

#[async_trait]
impl Tool for RemoveFileTool {
    fn name(&self) -> &str {
        "remove_file"
    }

    fn description(&self) -> &str {
        "Remove a file or folder permanently. Args: {\"path\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn is_irreversible(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("").trim();
        if path.is_empty() || path == "/" || path == "~" {
            return Err(format!("Refusing to remove '{}'", path));
        }
        let quoted = format!("rm -rf '{}'", path.replace('\'', r"'\''"));
        run_cleanup(&quoted).await?;
        Ok(format!("Removed {} successfully.", path))
    }
}
