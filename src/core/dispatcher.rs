//! 调度循环：用户输入 -> 模型 -> 工具 -> 模型 -> 最终回复
//!
//! 每轮 handle_turn 一次：先看确认门（有挂起的不可逆调用就用本轮输入裁决），
//! 否则进入请求循环：模型回复若是 JSON 工具调用就执行并把结果折叠回对话，
//! 直到模型给出纯文本回复或步数用尽。不可逆工具在执行前被拦截，挂起回合并
//! 向用户提问；JSON 畸形不致命，注入一条纠正消息让模型重试。
//!
//! 单轮串行：一个回合内没有并发的工具执行，工具按模型给出的顺序逐个跑完。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::gate::{ConfirmationGate, GateOutcome};
use crate::core::{AgentError, AgentEvent};
use crate::llm::LlmClient;
use crate::memory::{Message, SharedConversation};
use crate::tools::ToolExecutor;

/// 单轮内工具调用链的步数上限
pub const MAX_DISPATCH_STEPS: usize = 20;

/// 模型请求的一次工具调用
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// 模型一次回复的解析结果
#[derive(Debug)]
enum ModelOutput {
    /// 纯文本，作为给用户的最终回复
    Response(String),
    /// 一个或多个工具调用
    ToolCalls(Vec<ToolCall>),
}

/// 从模型回复中截取 JSON 片段：优先 ```json 围栏，其次首尾花/方括号跨度
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') || inner.starts_with('[') {
                return Some(inner);
            }
        }
    }
    let obj = text.find('{').and_then(|s| text.rfind('}').map(|e| (s, e)));
    let arr = text.find('[').and_then(|s| text.rfind(']').map(|e| (s, e)));
    let span = match (obj, arr) {
        (Some(o), Some(a)) => Some(if o.0 < a.0 { o } else { a }),
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    };
    span.filter(|(s, e)| e > s).map(|(s, e)| text[s..=e].trim())
}

/// 解析模型回复：无 JSON 即纯文本回复；有 JSON 片段则必须解析为工具调用，
/// 畸形 JSON 返回 JsonParseError 供纠正重试
fn parse_model_output(text: &str) -> Result<ModelOutput, AgentError> {
    let raw = match extract_json(text) {
        Some(raw) => raw,
        None => return Ok(ModelOutput::Response(text.trim().to_string())),
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, raw)))?;

    if value.is_array() {
        let calls: Vec<ToolCall> = serde_json::from_value(value)
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;
        if calls.is_empty() {
            return Ok(ModelOutput::Response(text.trim().to_string()));
        }
        return Ok(ModelOutput::ToolCalls(calls));
    }
    if let Some(list) = value.get("tool_calls") {
        let calls: Vec<ToolCall> = serde_json::from_value(list.clone())
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;
        return Ok(ModelOutput::ToolCalls(calls));
    }
    if value.get("tool").is_some() {
        let call: ToolCall = serde_json::from_value(value)
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;
        return Ok(ModelOutput::ToolCalls(vec![call]));
    }
    // JSON 对象但既无 tool 也无 tool_calls：按格式错误要求重试
    Err(AgentError::JsonParseError(format!(
        "object without 'tool' or 'tool_calls': {}",
        raw
    )))
}

/// 调度器：持有模型、执行器、确认门与共享对话
pub struct Dispatcher {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    gate: ConfirmationGate,
    conversation: SharedConversation,
    system_prompt: String,
    events: mpsc::UnboundedSender<AgentEvent>,
}

impl Dispatcher {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        conversation: SharedConversation,
        system_prompt: String,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Self {
        Self {
            llm,
            executor,
            gate: ConfirmationGate::new(),
            conversation,
            system_prompt,
            events,
        }
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        self.gate.is_awaiting()
    }

    pub fn conversation(&self) -> SharedConversation {
        self.conversation.clone()
    }

    fn assemble_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_prompt.clone())];
        messages.extend(self.conversation.lock().unwrap().messages().iter().cloned());
        messages
    }

    fn push(&self, msg: Message) {
        self.conversation.lock().unwrap().push(msg);
    }

    /// 执行一个（已放行的）工具调用并把结果折叠回对话，返回给用户看的文本
    async fn execute_and_fold(&self, tool: &str, args: Value) -> String {
        let _ = self.events.send(AgentEvent::ToolCall {
            tool: tool.to_string(),
            args: args.clone(),
        });
        match self.executor.execute(tool, args).await {
            Ok(output) => {
                let _ = self.events.send(AgentEvent::Observation {
                    tool: tool.to_string(),
                    preview: preview(&output),
                });
                self.push(Message::tool(format!("[TOOL OUTPUT] {}: {}", tool, output)));
                output
            }
            Err(e) => {
                let reason = e.to_string();
                let _ = self.events.send(AgentEvent::ToolFailure {
                    tool: tool.to_string(),
                    reason: reason.clone(),
                });
                self.push(Message::tool(format!("[TOOL ERROR] {}: {}", tool, reason)));
                format!("Action '{}' failed: {}", tool, reason)
            }
        }
    }

    /// 处理一轮用户输入，返回给用户的最终文本
    pub async fn handle_turn(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        // 有挂起的不可逆调用：本轮输入即裁决，不进请求循环
        if self.gate.is_awaiting() {
            self.push(Message::user(input));
            match self.gate.resolve(input) {
                Some(GateOutcome::Confirmed(p)) => {
                    tracing::info!(tool = %p.tool, "irreversible action confirmed");
                    let text = tokio::select! {
                        t = self.execute_and_fold(&p.tool, p.args) => t,
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    };
                    return Ok(text);
                }
                Some(GateOutcome::Declined(tool)) => {
                    let notice = format!("[SAFEGUARD] Action '{}' canceled.", tool);
                    tracing::info!(tool = %tool, "irreversible action declined");
                    self.push(Message::assistant(notice.clone()));
                    return Ok(notice);
                }
                None => {} // 不可达：is_awaiting 已判真
            }
        }

        self.push(Message::user(input));

        for _step in 0..MAX_DISPATCH_STEPS {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let messages = self.assemble_messages();
            let reply = tokio::select! {
                r = self.llm.complete(&messages) => r.map_err(AgentError::LlmError)?,
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            };
            self.push(Message::assistant(reply.clone()));

            let parsed = match parse_model_output(&reply) {
                Ok(p) => p,
                Err(AgentError::JsonParseError(e)) => {
                    tracing::warn!(error = %e, "malformed tool call, asking model to retry");
                    self.push(Message::user(format!(
                        "Your last reply contained invalid JSON ({}). Reply with either plain \
                         text for the user, or exactly one JSON object: \
                         {{\"tool\": \"<name>\", \"args\": {{...}}}}.",
                        e
                    )));
                    continue;
                }
                Err(e) => return Err(e),
            };

            match parsed {
                ModelOutput::Response(text) => return Ok(text),
                ModelOutput::ToolCalls(calls) => {
                    let total = calls.len();
                    for (idx, mut call) in calls.into_iter().enumerate() {
                        // 模型省略 args 时按空对象处理
                        if call.args.is_null() {
                            call.args = serde_json::json!({});
                        }
                        let irreversible = self
                            .executor
                            .get_tool(&call.tool)
                            .map(|t| t.is_irreversible())
                            .unwrap_or(false);
                        if irreversible {
                            // 先到先挂起：本调用进门，其余顺延到裁决之后
                            self.gate.arm(call.tool.clone(), call.args)?;
                            let deferred = total - idx - 1;
                            let mut question = format!(
                                "I'm about to perform '{}'. This action cannot be undone. \
                                 Please confirm with 'yes' or 'no'.",
                                call.tool
                            );
                            if deferred > 0 {
                                question.push_str(&format!(
                                    " ({} further requested action(s) are deferred until you decide.)",
                                    deferred
                                ));
                            }
                            let _ = self.events.send(AgentEvent::ConfirmationRequest {
                                tool: call.tool.clone(),
                            });
                            self.push(Message::assistant(question.clone()));
                            return Ok(question);
                        }
                        tokio::select! {
                            _ = self.execute_and_fold(&call.tool, call.args) => {}
                            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        }
                    }
                    // 工具结果已折叠，回到循环让模型续写
                }
            }
        }

        Err(AgentError::LoopBudgetExceeded(MAX_DISPATCH_STEPS))
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 200 {
        format!("{}...", text.chars().take(200).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::shared_conversation;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 按脚本依次回复；脚本耗尽后重复最后一条
    struct SeqLlm {
        replies: Mutex<VecDeque<String>>,
        last: Mutex<String>,
    }

    impl SeqLlm {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
                last: Mutex::new("done".to_string()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for SeqLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            let mut q = self.replies.lock().unwrap();
            match q.pop_front() {
                Some(r) => {
                    *self.last.lock().unwrap() = r.clone();
                    Ok(r)
                }
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    /// 记录每次执行参数的不可逆测试工具
    struct WipeTool {
        executions: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl Tool for WipeTool {
        fn name(&self) -> &str {
            "wipe"
        }
        fn description(&self) -> &str {
            "irreversible test tool"
        }
        fn is_irreversible(&self) -> bool {
            true
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            self.executions.lock().unwrap().push(args);
            Ok("wiped".to_string())
        }
    }

    fn make_dispatcher(replies: Vec<&str>) -> (Dispatcher, Arc<Mutex<Vec<Value>>>) {
        let executions = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(crate::tools::EchoTool);
        registry.register(WipeTool {
            executions: executions.clone(),
        });
        let executor = ToolExecutor::new(registry, 5);
        let (tx, rx) = mpsc::unbounded_channel();
        std::mem::forget(rx);
        let dispatcher = Dispatcher::new(
            Arc::new(SeqLlm::new(replies)),
            executor,
            shared_conversation(),
            "You are a test agent.".to_string(),
            tx,
        );
        (dispatcher, executions)
    }

    #[tokio::test]
    async fn test_plain_reply_passes_through() {
        let (mut d, _) = make_dispatcher(vec!["hello there"]);
        let out = d.handle_turn("hi", &CancellationToken::new()).await.unwrap();
        assert_eq!(out, "hello there");
    }

    #[tokio::test]
    async fn test_tool_call_result_feeds_next_step() {
        let (mut d, _) = make_dispatcher(vec![
            r#"{"tool": "echo", "args": {"text": "ping"}}"#,
            "the tool said ping",
        ]);
        let out = d.handle_turn("run echo", &CancellationToken::new()).await.unwrap();
        assert_eq!(out, "the tool said ping");
        let convo = d.conversation();
        let convo = convo.lock().unwrap();
        assert!(convo
            .messages()
            .iter()
            .any(|m| m.content.starts_with("[TOOL OUTPUT] echo:")));
    }

    #[tokio::test]
    async fn test_irreversible_arms_gate_without_executing() {
        let (mut d, executions) =
            make_dispatcher(vec![r#"{"tool": "wipe", "args": {"target": "trash"}}"#]);
        let out = d.handle_turn("wipe it", &CancellationToken::new()).await.unwrap();
        assert!(out.contains("cannot be undone"));
        assert!(d.is_awaiting_confirmation());
        assert!(executions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decline_cancels_without_executing() {
        let (mut d, executions) = make_dispatcher(vec![r#"{"tool": "wipe", "args": {}}"#]);
        let cancel = CancellationToken::new();
        d.handle_turn("wipe it", &cancel).await.unwrap();

        let out = d.handle_turn("no way", &cancel).await.unwrap();
        assert!(out.contains("[SAFEGUARD]"));
        assert!(out.contains("canceled"));
        assert!(!d.is_awaiting_confirmation());
        assert!(executions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_executes_recorded_args() {
        let (mut d, executions) =
            make_dispatcher(vec![r#"{"tool": "wipe", "args": {"target": "trash"}}"#]);
        let cancel = CancellationToken::new();
        d.handle_turn("wipe it", &cancel).await.unwrap();

        let out = d.handle_turn("  YES ", &cancel).await.unwrap();
        assert_eq!(out, "wiped");
        assert!(!d.is_awaiting_confirmation());
        // 执行的是请求时记录的参数，与确认轮文本无关
        let recorded = executions.lock().unwrap();
        assert_eq!(recorded.as_slice(), &[json!({"target": "trash"})]);
    }

    #[tokio::test]
    async fn test_malformed_json_triggers_corrective_retry() {
        let (mut d, _) = make_dispatcher(vec![
            r#"{"tool": "echo" "args": {}}"#, // 缺逗号
            "recovered",
        ]);
        let out = d.handle_turn("go", &CancellationToken::new()).await.unwrap();
        assert_eq!(out, "recovered");
        let convo = d.conversation();
        let convo = convo.lock().unwrap();
        assert!(convo
            .messages()
            .iter()
            .any(|m| m.content.contains("invalid JSON")));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_folded_not_fatal() {
        let (mut d, _) = make_dispatcher(vec![
            r#"{"tool": "teleport", "args": {}}"#,
            "that tool does not exist",
        ]);
        let out = d.handle_turn("go", &CancellationToken::new()).await.unwrap();
        assert_eq!(out, "that tool does not exist");
        let convo = d.conversation();
        let convo = convo.lock().unwrap();
        assert!(convo
            .messages()
            .iter()
            .any(|m| m.content.starts_with("[TOOL ERROR] teleport:")));
    }

    #[tokio::test]
    async fn test_endless_tool_calls_hit_loop_budget() {
        // 脚本耗尽后重复最后一条：模型永远请求工具
        let (mut d, _) = make_dispatcher(vec![r#"{"tool": "echo", "args": {"text": "x"}}"#]);
        let err = d
            .handle_turn("loop forever", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::LoopBudgetExceeded(n) if n == MAX_DISPATCH_STEPS));
    }

    #[tokio::test]
    async fn test_first_irreversible_wins_rest_deferred() {
        let (mut d, executions) = make_dispatcher(vec![
            r#"[{"tool": "wipe", "args": {"n": 1}}, {"tool": "wipe", "args": {"n": 2}}]"#,
        ]);
        let out = d.handle_turn("wipe twice", &CancellationToken::new()).await.unwrap();
        assert!(out.contains("deferred"));
        assert!(d.is_awaiting_confirmation());
        assert!(executions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_turn() {
        let (mut d, _) = make_dispatcher(vec!["never used"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = d.handle_turn("hi", &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json("text {\"a\":1} tail"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("list: [1,2]"), Some("[1,2]"));
    }
}
