//! Interactive REPL for stepwise
//!
//! Provides the main user interaction loop.

use std::io::{self, BufRead, Write};

use crate::cli::commands::{handle_command, CommandResult, SessionView};
use crate::core::Result;
use crate::flow::{run_flow, AppContext, Flow, FlowOutcome};
use crate::tools::BrowserUseTool;

/// Interactive REPL (Read-Eval-Print Loop)
pub struct Repl {
    ctx: AppContext,
    flow: Flow,
    runs: usize,
    last: Option<FlowOutcome>,
}

impl Repl {
    pub fn new(ctx: AppContext) -> Self {
        let flow = ctx.config.plan.flow;
        Self {
            ctx,
            flow,
            runs: 0,
            last: None,
        }
    }

    /// Run the REPL until `exit` or end of input
    pub async fn run(&mut self) -> Result<()> {
        self.print_banner();

        if self.ctx.config.browser.enabled && !BrowserUseTool::is_available().await {
            println!("⚠️  agent-browser not found. The browser tool will report errors.");
            println!("   To enable: npm install -g agent-browser && agent-browser install\n");
        }

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("You: ");
            stdout.flush()?;

            let mut input = String::new();
            match stdin.lock().read_line(&mut input) {
                Ok(0) => {
                    // EOF (Ctrl+D)
                    println!("\nGoodbye!");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Error reading input: {}", e);
                    continue;
                }
            }

            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            let command = handle_command(
                input,
                &SessionView {
                    ctx: &self.ctx,
                    flow: self.flow,
                    runs: self.runs,
                    last: self.last.as_ref(),
                },
            );

            match command {
                CommandResult::Exit => {
                    println!("\nGoodbye!");
                    break;
                }
                CommandResult::Reset => {
                    self.ctx.begin_request();
                    self.last = None;
                    println!("Session reset.\n");
                }
                CommandResult::Handled(output) => println!("{}\n", output),
                CommandResult::Continue(request) => self.process(self.flow, &request).await,
                CommandResult::Plan(goal) => self.process(Flow::Planning, &goal).await,
            }
        }

        Ok(())
    }

    async fn process(&mut self, flow: Flow, request: &str) {
        self.runs += 1;
        match run_flow(&self.ctx, flow, request).await {
            Ok(outcome) => {
                println!("\n{}\n", outcome.summary);
                self.last = Some(outcome);
            }
            Err(e) => eprintln!("\nError: {}\n", e),
        }
    }

    fn print_banner(&self) {
        let config = &self.ctx.config;
        println!();
        println!("stepwise - think, act, observe");
        println!("Model:     {}", config.llm.model);
        println!("Endpoint:  {}", config.llm.base_url);
        println!("Flow:      {}", self.flow);
        println!();
        println!("Commands: help, reset, status, tools, plan <goal>, exit");
        println!("───────────────────────────────────────────────────────────");
    }
}
