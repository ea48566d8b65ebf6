//! CLI commands
//!
//! Special commands that can be executed in the REPL.

use crate::flow::{AppContext, Flow, FlowOutcome};

/// Result of parsing a command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Run as a request through the current flow
    Continue(String),
    /// Run as a request through the planning flow
    Plan(String),
    /// Command was handled, show output
    Handled(String),
    /// Exit the REPL
    Exit,
    /// Start a fresh session
    Reset,
}

/// What the REPL knows about its session
pub struct SessionView<'a> {
    pub ctx: &'a AppContext,
    pub flow: Flow,
    pub runs: usize,
    pub last: Option<&'a FlowOutcome>,
}

/// Parse and handle special commands
pub fn handle_command(input: &str, session: &SessionView<'_>) -> CommandResult {
    let input = input.trim();
    let mut parts = input.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    match cmd.as_str() {
        "exit" | "quit" | "q" => CommandResult::Exit,

        "reset" | "clear" => CommandResult::Reset,

        "help" | "?" => CommandResult::Handled(help_text()),

        "status" => CommandResult::Handled(status_text(session)),

        "tools" => CommandResult::Handled(tools_text(session.ctx)),

        "plan" => {
            if args.is_empty() {
                CommandResult::Handled("Usage: plan <goal>".to_string())
            } else {
                CommandResult::Plan(args.to_string())
            }
        }

        _ => {
            if input.starts_with('/') {
                CommandResult::Handled(format!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    cmd
                ))
            } else {
                CommandResult::Continue(input.to_string())
            }
        }
    }
}

fn status_text(session: &SessionView<'_>) -> String {
    let config = &session.ctx.config;
    let last = match session.last {
        Some(outcome) if outcome.failed => "failed",
        Some(_) => "ok",
        None => "none",
    };
    format!(
        "stepwise status:\n\
         ─────────────────────────────\n\
         Model:      {}\n\
         Endpoint:   {} ({})\n\
         Flow:       {}\n\
         Max steps:  {}\n\
         Tools:      {}\n\
         Browser:    {}\n\
         Requests:   {} (last: {})",
        config.llm.model,
        config.llm.base_url,
        session.ctx.gateway.endpoint_name(),
        session.flow,
        config.agent.max_steps,
        session.ctx.tools.names().join(", "),
        if config.browser.enabled {
            "enabled"
        } else {
            "disabled"
        },
        session.runs,
        last
    )
}

fn tools_text(ctx: &AppContext) -> String {
    let mut output = String::from("Available tools:\n");
    for definition in ctx.tools.describe_all() {
        let summary = definition
            .function
            .description
            .split(". ")
            .next()
            .unwrap_or("")
            .trim_end_matches('.');
        let terminal = if ctx.tools.is_terminal(&definition.function.name) {
            " (ends the run)"
        } else {
            ""
        };
        output.push_str(&format!(
            "  {}{}\n    {}\n",
            definition.function.name, terminal, summary
        ));
    }
    output
}

/// Generate help text
fn help_text() -> String {
    r#"stepwise commands:
─────────────────────────────────────────────
  help, ?          Show this help message
  exit, quit, q    Exit stepwise
  reset, clear     Start a fresh session
  status           Show current configuration
  tools            List the registered tools
  plan <goal>      Plan the goal, then run each step

Anything else is sent to the agent as a request.

Keyboard Shortcuts:
  Ctrl+D           Exit stepwise
─────────────────────────────────────────────"#
        .to_string()
}
