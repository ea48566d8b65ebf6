//! stepwise - LLM-driven task-execution agent
//!
//! Main entry point for the CLI application.

use std::io::{self, IsTerminal, Read};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use stepwise::flow::{run_flow, AppContext, Flow};
use stepwise::{Config, Repl};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

/// stepwise - LLM-driven task-execution agent
#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Single prompt mode (non-interactive)
    #[arg(long, short = 'p')]
    prompt: Option<String>,

    /// Flow to run requests through: agent or planning
    #[arg(long)]
    flow: Option<Flow>,

    /// Model identifier
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Step budget per agent run
    #[arg(long)]
    max_steps: Option<usize>,

    /// Enable debug logging
    #[arg(long, short = 'd')]
    debug: bool,

    /// Disable the browser tool
    #[arg(long)]
    no_browser: bool,

    /// Run in headed browser mode (visible window)
    #[arg(long)]
    headed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout only carries the summary. The filter is
    // raised to debug once the config is known if it asks for that.
    let env_filter = EnvFilter::try_from_default_env().ok();
    let has_env_filter = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| default_filter(args.debug)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(ref model) = args.model {
        config.llm.model = model.clone();
    }
    if let Some(max_steps) = args.max_steps {
        config.agent.max_steps = max_steps;
    }
    if let Some(flow) = args.flow {
        config.plan.flow = flow;
    }
    if args.debug {
        config.agent.debug = true;
    }
    if args.no_browser {
        config.browser.enabled = false;
    }
    if args.headed {
        config.browser.headed = true;
    }

    if config.agent.debug && !args.debug && !has_env_filter {
        filter_handle
            .modify(|filter| *filter = default_filter(true))
            .context("failed to raise log level")?;
    }

    config.validate().context("invalid configuration")?;
    let ctx = AppContext::from_config(config).context("failed to set up stepwise")?;

    let prompt = match args.prompt {
        Some(prompt) => Some(prompt),
        None if !io::stdin().is_terminal() => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("failed to read prompt from stdin")?;
            Some(input)
        }
        None => None,
    };

    let Some(prompt) = prompt else {
        let mut repl = Repl::new(ctx);
        repl.run().await?;
        return Ok(ExitCode::SUCCESS);
    };

    let prompt = prompt.trim();
    if prompt.is_empty() {
        tracing::warn!("Empty prompt provided");
        return Ok(ExitCode::SUCCESS);
    }

    let flow = ctx.config.plan.flow;
    let outcome = run_flow(&ctx, flow, prompt).await?;
    println!("{}", outcome.summary);

    Ok(if outcome.failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::new(if debug {
        "stepwise=debug"
    } else {
        "stepwise=info"
    })
}
