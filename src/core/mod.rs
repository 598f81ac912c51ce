//! 核心：错误、事件、确认门、调度循环与装配

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod gate;
pub mod orchestrator;

pub use dispatcher::{Dispatcher, ToolCall, MAX_DISPATCH_STEPS};
pub use error::AgentError;
pub use events::AgentEvent;
pub use gate::{is_affirmative, ConfirmationGate, GateOutcome, PendingConfirmation};
pub use orchestrator::{create_agent, create_llm_from_config};
