//! 交互式部署驱动与服务停止工具
//!
//! run_deploy_script 以子进程运行部署脚本，像人盯着终端一样工作：等脚本吐出
//! 选择提示（按子串匹配，提示通常不带换行），把提示文本交给模型做一次窄边界
//! 决策（只准回 JSON 选项，不准回自由文本），写回 stdin，然后分两条路走：
//! 普通选项把脚本跑到退出、逐行转发日志；长驻服务选项等完成标记（正则捕获
//! PID），登记进程表后分离子进程返回。三类失败各有其名：提示超时/缺失是
//! ProtocolMismatch，模型答案不可解析是 DecisionParseError，标记未出现而脚本
//! 先退出是 HandoffFailed。
//!
//! stop_service 用登记表里的 PID 停服务：配置了远端命令模板就走远端（{pid}
//! 替换），否则本地 SIGTERM；没有记录时可跑一条尽力而为的清理命令。

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::config::DeploySection;
use crate::core::dispatcher::extract_json;
use crate::core::{AgentError, AgentEvent};
use crate::llm::LlmClient;
use crate::memory::{Message, SharedConversation};
use crate::tools::process::{terminate, ProcessRegistry};
use crate::tools::Tool;

/// 模型对交互提示的结构化回答
#[derive(Debug, Deserialize)]
struct DeployChoice {
    primary_choice: String,
    #[serde(default)]
    secondary_choice: Option<String>,
}

#[derive(Debug)]
enum ExpectError {
    /// 超时内没有等到目标
    Timeout,
    /// 流先结束，携带已读到的全部文本
    Eof(String),
}

/// 子进程 stdout 的提示读取器
///
/// 交互提示通常以 "choice: " 结尾且不带换行，按行读会永远等不到；这里按原始
/// 块读进缓冲，expect 做子串扫描，next_line 供流式阶段逐行取日志。
struct PromptReader {
    stdout: ChildStdout,
    pending: String,
    eof: bool,
}

impl PromptReader {
    fn new(stdout: ChildStdout) -> Self {
        Self {
            stdout,
            pending: String::new(),
            eof: false,
        }
    }

    async fn fill(&mut self, deadline: Instant) -> Result<(), ExpectError> {
        let mut chunk = [0u8; 4096];
        let read = timeout_at(deadline, self.stdout.read(&mut chunk))
            .await
            .map_err(|_| ExpectError::Timeout)?;
        let n = match read {
            Ok(n) => n,
            Err(_) => 0, // 读错误与 EOF 同样处理：流结束
        };
        if n == 0 {
            self.eof = true;
            return Err(ExpectError::Eof(self.pending.clone()));
        }
        self.pending.push_str(&String::from_utf8_lossy(&chunk[..n]));
        Ok(())
    }

    /// 等待缓冲中出现 pattern 子串，返回截至匹配末尾的全部文本（从缓冲中消耗）
    async fn expect(&mut self, pattern: &str, limit: Duration) -> Result<String, ExpectError> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(idx) = self.pending.find(pattern) {
                let end = idx + pattern.len();
                let consumed: String = self.pending.drain(..end).collect();
                return Ok(consumed);
            }
            if self.eof {
                return Err(ExpectError::Eof(self.pending.clone()));
            }
            self.fill(deadline).await?;
        }
    }

    /// 取下一行（去掉行尾换行）；EOF 时先吐出缓冲残留，再返回 None
    async fn next_line(&mut self, limit: Duration) -> Result<Option<String>, ExpectError> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(idx) = self.pending.find('\n') {
                let mut line: String = self.pending.drain(..=idx).collect();
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            if self.eof {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
            match self.fill(deadline).await {
                Ok(()) => {}
                Err(ExpectError::Eof(_)) => {} // 下一圈吐残留
                Err(e) => return Err(e),
            }
        }
    }
}

/// 窄边界决策：把捕获的提示文本交给模型，只接受结构化 JSON 选项
async fn decide(
    llm: &dyn LlmClient,
    instruction: &str,
    prompt_text: &str,
) -> Result<DeployChoice, AgentError> {
    let system = Message::system(
        "You are driving an interactive deployment script. \
         Given the user's goal and the menu the script just printed, \
         reply with ONLY a JSON object: \
         {\"primary_choice\": \"<option>\", \"secondary_choice\": \"<option, only if a sub-menu choice is also needed>\"}. \
         No explanations, no extra text.",
    );
    let user = Message::user(format!(
        "User goal: {}\n\nScript output:\n{}",
        instruction, prompt_text
    ));
    let reply = llm
        .complete(&[system, user])
        .await
        .map_err(AgentError::LlmError)?;

    let raw = extract_json(&reply)
        .ok_or_else(|| AgentError::DecisionParseError(format!("no JSON in reply: {}", reply)))?;
    serde_json::from_str::<DeployChoice>(raw)
        .map_err(|e| AgentError::DecisionParseError(format!("{}: {}", e, raw)))
}

/// 交互式部署驱动工具
pub struct DeployTool {
    llm: Arc<dyn LlmClient>,
    processes: ProcessRegistry,
    conversation: SharedConversation,
    events: mpsc::UnboundedSender<AgentEvent>,
    cfg: DeploySection,
}

impl DeployTool {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        processes: ProcessRegistry,
        conversation: SharedConversation,
        events: mpsc::UnboundedSender<AgentEvent>,
        cfg: DeploySection,
    ) -> Self {
        Self {
            llm,
            processes,
            conversation,
            events,
            cfg,
        }
    }

    /// 把一行脚本输出同时推给人类通道与对话历史
    fn log_line(&self, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }
        let _ = self.events.send(AgentEvent::DeployLog {
            line: line.to_string(),
        });
        self.conversation
            .lock()
            .unwrap()
            .push(Message::tool(format!("[DEPLOY LOG] {}", line)));
    }

    fn log_block(&self, text: &str) {
        for line in text.lines() {
            self.log_line(line);
        }
    }

    /// 驱动一次完整的部署会话（类型化错误，Tool::execute 负责折叠为字符串）
    pub async fn run(&self, instruction: &str) -> Result<String, AgentError> {
        if !self.cfg.script_path.exists() {
            return Err(AgentError::ToolExecutionFailed(format!(
                "Deploy script not found: {}",
                self.cfg.script_path.display()
            )));
        }
        let phase_limit = Duration::from_secs(self.cfg.timeout_secs);
        tracing::info!(script = %self.cfg.script_path.display(), "deploy session start");

        // stderr 并入 stdout，脚本的报错同样进入提示匹配与日志流
        let mut child = Command::new("bash")
            .arg("-c")
            .arg(format!(
                "exec bash '{}' 2>&1",
                self.cfg.script_path.display()
            ))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::ToolExecutionFailed("No stdout handle".to_string()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::ToolExecutionFailed("No stdin handle".to_string()))?;
        let mut reader = PromptReader::new(stdout);

        // 阶段一：等主选择提示
        let seen = reader
            .expect(&self.cfg.primary_prompt, phase_limit)
            .await
            .map_err(|e| match e {
                ExpectError::Timeout => AgentError::ProtocolMismatch(format!(
                    "prompt '{}' not seen within {}s",
                    self.cfg.primary_prompt, self.cfg.timeout_secs
                )),
                ExpectError::Eof(out) => AgentError::ProtocolMismatch(format!(
                    "script exited before prompting. Output:\n{}",
                    out
                )),
            })?;
        self.log_block(&seen);

        let choice = decide(self.llm.as_ref(), instruction, &seen).await?;
        tracing::info!(primary = %choice.primary_choice, secondary = ?choice.secondary_choice, "deploy decision");
        stdin
            .write_all(format!("{}\n", choice.primary_choice).as_bytes())
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("stdin write failed: {}", e)))?;

        // 阶段二（可选）：模型给出了次级选项时才等次级提示
        if let Some(secondary) = &choice.secondary_choice {
            let seen = reader
                .expect(&self.cfg.secondary_prompt, phase_limit)
                .await
                .map_err(|e| match e {
                    ExpectError::Timeout => AgentError::ProtocolMismatch(format!(
                        "prompt '{}' not seen within {}s",
                        self.cfg.secondary_prompt, self.cfg.timeout_secs
                    )),
                    ExpectError::Eof(out) => AgentError::ProtocolMismatch(format!(
                        "script exited before secondary prompt. Output:\n{}",
                        out
                    )),
                })?;
            self.log_block(&seen);
            stdin
                .write_all(format!("{}\n", secondary).as_bytes())
                .await
                .map_err(|e| {
                    AgentError::ToolExecutionFailed(format!("stdin write failed: {}", e))
                })?;
        }

        if choice.primary_choice == self.cfg.service_choice {
            // 长驻服务：等完成标记，登记 PID 后分离
            let marker = regex::Regex::new(&self.cfg.completion_marker)
                .map_err(|e| AgentError::ConfigError(format!("bad completion_marker: {}", e)))?;
            let mut collected = Vec::new();
            loop {
                let line = match reader.next_line(phase_limit).await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        let _ = child.wait().await;
                        return Err(AgentError::HandoffFailed(format!(
                            "script exited before reporting '{}'. Output:\n{}",
                            self.cfg.completion_marker,
                            collected.join("\n")
                        )));
                    }
                    Err(_) => {
                        return Err(AgentError::HandoffFailed(format!(
                            "no completion marker within {}s",
                            self.cfg.timeout_secs
                        )))
                    }
                };
                self.log_line(&line);
                collected.push(line.clone());
                if let Some(caps) = marker.captures(&line) {
                    let pid: u32 = caps
                        .get(1)
                        .and_then(|m| m.as_str().parse().ok())
                        .ok_or_else(|| {
                            AgentError::HandoffFailed(format!("marker without PID: {}", line))
                        })?;
                    self.processes.put(self.cfg.service_name.clone(), pid);
                    tracing::info!(service = %self.cfg.service_name, pid, "service detached");
                    // 丢弃 Child 句柄即分离（未设 kill_on_drop），服务继续运行
                    drop(stdin);
                    drop(child);
                    return Ok(format!(
                        "[DEPLOY COMPLETED] {} started in the background (PID: {})",
                        self.cfg.service_name, pid
                    ));
                }
            }
        }

        // 普通选项：跑到退出，逐行转发
        loop {
            match reader.next_line(phase_limit).await {
                Ok(Some(line)) => self.log_line(&line),
                Ok(None) => break,
                Err(_) => {
                    return Err(AgentError::ToolExecutionFailed(format!(
                        "deploy script produced no output for {}s",
                        self.cfg.timeout_secs
                    )))
                }
            }
        }
        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::ToolExecutionFailed(format!("wait failed: {}", e)))?;
        if status.success() {
            Ok("[DEPLOY COMPLETED] script finished successfully.".to_string())
        } else {
            Err(AgentError::ToolExecutionFailed(format!(
                "[ERROR] deploy script failed, exit code {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}

#[async_trait]
impl Tool for DeployTool {
    fn name(&self) -> &str {
        "run_deploy_script"
    }

    fn description(&self) -> &str {
        "Run the interactive deployment script and drive its menu choices. Args: {\"instruction\": \"what to deploy, e.g. 'deploy the frontend'\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "instruction": { "type": "string" } },
            "required": []
        })
    }

    // 脚本本身负责幂等性，一次部署可重跑，不过确认门

    fn timeout_secs(&self) -> Option<u64> {
        // 最多三个等待阶段，各自有 timeout_secs 上限
        Some(self.cfg.timeout_secs.saturating_mul(3) + 30)
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let instruction = args
            .get("instruction")
            .and_then(|v| v.as_str())
            .unwrap_or("Deploy the application");
        self.run(instruction).await.map_err(|e| e.to_string())
    }
}

/// 停止由部署驱动登记的后台服务
pub struct StopServiceTool {
    processes: ProcessRegistry,
    cfg: DeploySection,
}

impl StopServiceTool {
    pub fn new(processes: ProcessRegistry, cfg: DeploySection) -> Self {
        Self { processes, cfg }
    }

    async fn run_remote(&self, command: &str) -> Result<String, String> {
        tracing::info!(command = %command, "stop_service remote command");
        let output = Command::new("sh")
            .args(["-c", command])
            .output()
            .await
            .map_err(|e| format!("Execution failed: {}", e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

#[async_trait]
impl Tool for StopServiceTool {
    fn name(&self) -> &str {
        "stop_service"
    }

    fn description(&self) -> &str {
        "Stop a background service started by the deploy script. Args: {\"name\": \"service name, default from config\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
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
            .unwrap_or(&self.cfg.service_name)
            .to_string();

        match self.processes.get(&name) {
            Some(pid) => {
                if let Some(template) = &self.cfg.remote_kill_command {
                    let command = template.replace("{pid}", &pid.to_string());
                    self.run_remote(&command)
                        .await
                        .map_err(|e| format!("Failed to stop {} (PID: {}): {}", name, pid, e))?;
                    self.processes.remove(&name);
                    return Ok(format!("[SERVICE STOPPED] {} (PID: {})", name, pid));
                }
                if !self.processes.is_alive(pid) {
                    self.processes.remove(&name);
                    return Ok(format!(
                        "[ALREADY_EXITED] {} (PID: {}) no longer exists; stale entry removed.",
                        name, pid
                    ));
                }
                terminate(pid)
                    .map_err(|e| format!("Failed to stop {} (PID: {}): {}", name, pid, e))?;
                self.processes.remove(&name);
                tracing::info!(service = %name, pid, "service stopped");
                Ok(format!("[SERVICE STOPPED] {} (PID: {})", name, pid))
            }
            None => {
                if let Some(cleanup) = &self.cfg.remote_cleanup_command {
                    let out = self.run_remote(cleanup).await.unwrap_or_default();
                    Ok(format!(
                        "[INFO] No tracked process for '{}'; best-effort cleanup ran.\n{}",
                        name, out
                    ))
                } else {
                    Ok(format!(
                        "[NOT_FOUND] No running process tracked under name: {}",
                        name
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::shared_conversation;
    use serde_json::json;
    use std::io::Write as _;

    struct ScriptedLlm(String);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            Ok(self.0.clone())
        }
    }

    fn write_script(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("deploy.sh");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/usr/bin/env bash").unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn make_tool(
        reply: &str,
        script: std::path::PathBuf,
        timeout_secs: u64,
    ) -> (DeployTool, ProcessRegistry, SharedConversation) {
        let cfg = DeploySection {
            script_path: script,
            timeout_secs,
            ..DeploySection::default()
        };
        let processes = ProcessRegistry::new();
        let conversation = shared_conversation();
        let (tx, rx) = mpsc::unbounded_channel();
        // 测试中不消费事件，泄漏接收端保持通道打开
        std::mem::forget(rx);
        let tool = DeployTool::new(
            Arc::new(ScriptedLlm(reply.to_string())),
            processes.clone(),
            conversation.clone(),
            tx,
            cfg,
        );
        (tool, processes, conversation)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plain_choice_streams_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            &dir,
            "echo 'Preparing...'\nprintf 'Enter your choice: '\nread choice\necho \"running option $choice\"\nexit 0\n",
        );
        let (tool, processes, conversation) =
            make_tool(r#"{"primary_choice": "1"}"#, script, 10);

        let out = tool.run("deploy everything").await.unwrap();
        assert!(out.contains("[DEPLOY COMPLETED]"));
        assert!(processes.names().is_empty());

        let convo = conversation.lock().unwrap();
        let logged: Vec<&str> = convo.messages().iter().map(|m| m.content.as_str()).collect();
        assert!(logged.iter().any(|l| l.contains("running option 1")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_service_choice_registers_pid_and_detaches() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            &dir,
            "printf 'Enter your choice: '\nread choice\necho 'starting frontend'\necho 'Frontend PID: 4821'\nsleep 5\n",
        );
        let (tool, processes, _conversation) =
            make_tool(r#"{"primary_choice": "2"}"#, script, 10);

        let out = tool.run("start the frontend").await.unwrap();
        assert!(out.contains("PID: 4821"), "got: {}", out);
        assert_eq!(processes.get("frontend"), Some(4821));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_secondary_prompt_round() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            &dir,
            "printf 'Enter your choice: '\nread a\nprintf 'Enter backend choice: '\nread b\necho \"backend $b selected\"\nexit 0\n",
        );
        let (tool, _processes, conversation) = make_tool(
            r#"{"primary_choice": "1", "secondary_choice": "3"}"#,
            script,
            10,
        );

        tool.run("full deploy with backend 3").await.unwrap();
        let convo = conversation.lock().unwrap();
        assert!(convo
            .messages()
            .iter()
            .any(|m| m.content.contains("backend 3 selected")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_without_prompt_is_protocol_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "echo 'nothing interactive here'\nexit 0\n");
        let (tool, _, _) = make_tool(r#"{"primary_choice": "1"}"#, script, 5);

        let err = tool.run("deploy").await.unwrap_err();
        assert!(matches!(err, AgentError::ProtocolMismatch(_)), "got: {:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_script_times_out_as_protocol_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(&dir, "sleep 30\n");
        let (tool, _, _) = make_tool(r#"{"primary_choice": "1"}"#, script, 1);

        let err = tool.run("deploy").await.unwrap_err();
        assert!(matches!(err, AgentError::ProtocolMismatch(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_free_text_reply_is_decision_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            &dir,
            "printf 'Enter your choice: '\nread choice\nexit 0\n",
        );
        let (tool, _, _) = make_tool("I would go with option one, probably.", script, 5);

        let err = tool.run("deploy").await.unwrap_err();
        assert!(matches!(err, AgentError::DecisionParseError(_)), "got: {:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_marker_is_handoff_failed() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            &dir,
            "printf 'Enter your choice: '\nread choice\necho 'started... maybe'\nexit 0\n",
        );
        let (tool, processes, _) = make_tool(r#"{"primary_choice": "2"}"#, script, 5);

        let err = tool.run("start the frontend").await.unwrap_err();
        assert!(matches!(err, AgentError::HandoffFailed(_)), "got: {:?}", err);
        assert_eq!(processes.get("frontend"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            &dir,
            "printf 'Enter your choice: '\nread choice\necho 'boom'\nexit 3\n",
        );
        let (tool, _, _) = make_tool(r#"{"primary_choice": "1"}"#, script, 5);

        let err = tool.run("deploy").await.unwrap_err();
        assert!(err.to_string().contains("exit code 3"), "got: {}", err);
    }

    #[tokio::test]
    async fn test_stop_service_untracked_reports_not_found() {
        let cfg = DeploySection::default();
        let tool = StopServiceTool::new(ProcessRegistry::new(), cfg);
        let out = tool.execute(json!({})).await.unwrap();
        assert!(out.starts_with("[NOT_FOUND]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_service_kills_tracked_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id().unwrap();
        let processes = ProcessRegistry::new();
        processes.put("frontend", pid);

        let tool = StopServiceTool::new(processes.clone(), DeploySection::default());
        let out = tool.execute(json!({})).await.unwrap();
        assert!(out.starts_with("[SERVICE STOPPED]"), "got: {}", out);
        assert_eq!(processes.get("frontend"), None);
    }

    #[tokio::test]
    async fn test_stop_service_remote_template_substitutes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let out_file = dir.path().join("killed.txt");
        let cfg = DeploySection {
            remote_kill_command: Some(format!(
                "echo 'kill {{pid}}' > '{}'",
                out_file.display()
            )),
            ..DeploySection::default()
        };
        let processes = ProcessRegistry::new();
        processes.put("frontend", 777);

        let tool = StopServiceTool::new(processes.clone(), cfg);
        let out = tool.execute(json!({"name": "frontend"})).await.unwrap();
        assert!(out.starts_with("[SERVICE STOPPED]"));
        assert_eq!(processes.get("frontend"), None);
        // 模板中的 {pid} 已替换
        let recorded = std::fs::read_to_string(&out_file).unwrap();
        assert!(recorded.contains("kill 777"));
    }
}
