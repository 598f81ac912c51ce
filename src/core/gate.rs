//! 安全确认门
//!
//! 两态状态机：Clear 与 AwaitingConfirmation(tool, args)。不可逆工具的调用请求
//! 被记录后挂起回合，下一轮用户输入按 yes/y（忽略大小写、去首尾空白）判定确认，
//! 其余一律视为拒绝。对话边界是请求/应答式的，"等待用户"以跨轮显式状态实现，
//! 不阻塞线程或协程。

use serde_json::Value;

use crate::core::AgentError;

/// 待确认记录：工具名与请求时的原始参数（确认后按此执行，与确认轮的文本无关）
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub tool: String,
    pub args: Value,
}

#[derive(Debug)]
enum GateState {
    Clear,
    Awaiting(PendingConfirmation),
}

/// resolve 的结果：确认则交还记录的调用，拒绝则交还工具名供生成取消通知
#[derive(Debug)]
pub enum GateOutcome {
    Confirmed(PendingConfirmation),
    Declined(String),
}

/// 确认门：同一时间至多一个待确认工具
#[derive(Debug)]
pub struct ConfirmationGate {
    state: GateState,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Clear,
        }
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.state, GateState::Awaiting(_))
    }

    pub fn pending(&self) -> Option<&PendingConfirmation> {
        match &self.state {
            GateState::Awaiting(p) => Some(p),
            GateState::Clear => None,
        }
    }

    /// 记录一个待确认的不可逆调用；已有待确认时显式报错而非静默覆盖
    pub fn arm(&mut self, tool: impl Into<String>, args: Value) -> Result<(), AgentError> {
        if let GateState::Awaiting(p) = &self.state {
            return Err(AgentError::ConfirmationPending(p.tool.clone()));
        }
        self.state = GateState::Awaiting(PendingConfirmation {
            tool: tool.into(),
            args,
        });
        Ok(())
    }

    /// 用下一轮用户文本解决待确认状态；Clear 态下返回 None
    pub fn resolve(&mut self, user_text: &str) -> Option<GateOutcome> {
        match std::mem::replace(&mut self.state, GateState::Clear) {
            GateState::Clear => None,
            GateState::Awaiting(p) => {
                if is_affirmative(user_text) {
                    Some(GateOutcome::Confirmed(p))
                } else {
                    Some(GateOutcome::Declined(p.tool))
                }
            }
        }
    }
}

/// 确认令牌：仅 "yes" 与 "y"（忽略大小写，去首尾空白）
pub fn is_affirmative(text: &str) -> bool {
    matches!(text.trim().to_lowercase().as_str(), "yes" | "y")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_affirmative_tokens() {
        assert!(is_affirmative("yes"));
        assert!(is_affirmative("  Y  "));
        assert!(is_affirmative("YES"));
        assert!(!is_affirmative("yeah"));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn test_arm_then_confirm_returns_recorded_args() {
        let mut gate = ConfirmationGate::new();
        gate.arm("empty_trash", json!({})).unwrap();
        assert!(gate.is_awaiting());
        assert_eq!(gate.pending().unwrap().tool, "empty_trash");

        match gate.resolve("y").unwrap() {
            GateOutcome::Confirmed(p) => {
                assert_eq!(p.tool, "empty_trash");
                assert_eq!(p.args, json!({}));
            }
            other => panic!("Expected Confirmed, got {:?}", other),
        }
        assert!(!gate.is_awaiting());
    }

    #[test]
    fn test_any_other_text_declines() {
        let mut gate = ConfirmationGate::new();
        gate.arm("remove_file", json!({"path": "/tmp/x"})).unwrap();
        match gate.resolve("please don't").unwrap() {
            GateOutcome::Declined(tool) => assert_eq!(tool, "remove_file"),
            other => panic!("Expected Declined, got {:?}", other),
        }
        assert!(!gate.is_awaiting());
    }

    #[test]
    fn test_second_arm_is_rejected() {
        let mut gate = ConfirmationGate::new();
        gate.arm("empty_trash", json!({})).unwrap();
        let err = gate.arm("clear_tmp", json!({})).unwrap_err();
        assert!(matches!(err, AgentError::ConfirmationPending(t) if t == "empty_trash"));
        // 原记录未被覆盖
        assert_eq!(gate.pending().unwrap().tool, "empty_trash");
    }

    #[test]
    fn test_resolve_on_clear_gate_is_none() {
        let mut gate = ConfirmationGate::new();
        assert!(gate.resolve("yes").is_none());
    }
}
