use anyhow::{Result, anyhow};
use clap::Parser;
use deepcode_agent::{LoopController, prompts};
use deepcode_core::{AppConfig, Transcript};
use deepcode_llm::DeepSeekClient;
use deepcode_observe::Observer;
use deepcode_policy::PermissionGate;
use deepcode_tools::ToolExecutor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

mod commands;
mod confirm;

use commands::chat::{run_chat, run_print_mode};

#[derive(Parser)]
#[command(name = "deepcode")]
#[command(about = "Deep Code CLI coding agent", long_about = None)]
struct Cli {
    /// Initial prompt. Required with --print; optional first message otherwise.
    prompt: Option<String>,

    /// Non-interactive mode: run the prompt once, print the result, exit.
    #[arg(short = 'p', long = "print")]
    print_mode: bool,

    /// Override the model for this invocation.
    #[arg(long)]
    model: Option<String>,

    /// Override the cycle cap per user turn.
    #[arg(long = "max-iterations")]
    max_iterations: Option<u64>,

    /// Replace the default system prompt entirely.
    #[arg(long = "system-prompt")]
    system_prompt: Option<String>,

    /// Append text to the default system prompt.
    #[arg(long = "append-system-prompt")]
    append_system_prompt: Option<String>,

    /// Pre-grant every capability instead of prompting.
    #[arg(long = "auto-approve")]
    auto_approve: bool,

    /// Workspace root (defaults to the current directory).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Verbose logging to stderr.
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprint!("{}", deepcode_errors::classify(&err).render());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = match cli.workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let mut cfg = AppConfig::load(&workspace)?;
    if let Some(model) = &cli.model {
        cfg.llm.model = model.clone();
    }
    if let Some(cap) = cli.max_iterations {
        cfg.agent_loop.max_iterations = cap;
    }

    // Print mode has no confirmation surface, so it runs with a pre-granted
    // gate; interactive mode starts cold and asks per capability.
    let gate = if cli.print_mode || cli.auto_approve {
        PermissionGate::allow_all()
    } else {
        PermissionGate::new()
    };
    let gate = Arc::new(Mutex::new(gate));

    let executor = ToolExecutor::new(
        &workspace,
        cfg.security.clone(),
        cfg.tools.clone(),
        Arc::clone(&gate),
    )?;
    let llm = DeepSeekClient::new(cfg.llm.clone())?;
    let mut observer = Observer::new(&workspace)?;
    observer.set_verbose(cli.verbose);
    let controller = LoopController::new(Box::new(llm), executor, &cfg, observer);

    let transcript = Transcript::with_system(prompts::build_system_prompt(
        cli.system_prompt.as_deref(),
        cli.append_system_prompt.as_deref(),
    ));

    if cli.print_mode {
        let prompt = cli
            .prompt
            .ok_or_else(|| anyhow!("--print requires a prompt argument"))?;
        run_print_mode(&controller, transcript, &prompt)
    } else {
        run_chat(&controller, transcript, gate, cli.prompt.as_deref())
    }
}
