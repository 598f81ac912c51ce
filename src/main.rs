//! ant CLI：终端 REPL
//!
//! 每行输入一个回合；Ctrl+C 取消当前回合（下一次 Ctrl+C 前可继续对话），
//! exit / quit 退出。过程事件（工具调用、部署日志、确认请求）由独立任务打印。

use std::io::Write;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ant::core::{create_agent, AgentError, AgentEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (mut dispatcher, mut events) = create_agent(None).context("agent assembly failed")?;

    // 事件打印任务：部署日志与确认请求实时可见
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::DeployLog { line } => println!("  [deploy] {}", line),
                AgentEvent::ToolCall { tool, .. } => println!("  [tool] {} ...", tool),
                AgentEvent::ToolFailure { tool, reason } => {
                    println!("  [tool] {} failed: {}", tool, reason)
                }
                AgentEvent::ConfirmationRequest { tool } => {
                    println!("  [confirm] '{}' is waiting for yes/no", tool)
                }
                AgentEvent::Observation { .. } | AgentEvent::Error { .. } => {}
            }
        }
    });

    println!("ant - local automation agent (exit/quit to leave)");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let cancel = CancellationToken::new();
        let turn = dispatcher.handle_turn(input, &cancel);
        tokio::pin!(turn);
        let result = tokio::select! {
            r = &mut turn => r,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                turn.await
            }
        };

        match result {
            Ok(reply) => println!("{}", reply),
            Err(AgentError::Cancelled) => println!("(turn cancelled)"),
            Err(e) => println!("error: {}", e),
        }
    }

    Ok(())
}
