mod commands;
mod config;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use orion_llm::{build_router, LlmRequest, LlmRouter};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::PolicyReport;

#[derive(Parser)]
#[command(name = "orion", version, about = "Route prompts to a local model host or remote LLM providers")]
struct Cli {
    /// Configuration file (default: ./orion.toml if present)
    #[arg(long, global = true, env = "ORION_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Complete a prompt given as an argument or on stdin
    Ask(AskArgs),
    /// Execute an LLM task JSON document from a file or stdin
    Task {
        file: Option<PathBuf>,
    },
    /// Print the resolved routing policy (API keys are not shown)
    Policy,
}

#[derive(Args)]
struct AskArgs {
    prompt: Option<String>,
    /// Try this model before the local model and fallbacks
    #[arg(short, long)]
    model: Option<String>,
    #[arg(short, long)]
    system: Option<String>,
    #[arg(short, long)]
    temperature: Option<f32>,
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Print the whole response as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "orion=debug,info"
    } else {
        "orion=info,warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();
}

fn build_llm_router(config: &config::Config) -> LlmRouter {
    let llm = &config.llm;
    let policy = llm.routing_policy();
    if policy.credentials.is_empty() && !llm.local.enabled {
        tracing::warn!("No API keys and no local model host configured; every request will fail.");
    }
    build_router(policy, llm.endpoints(), llm.local_backend())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine; variables may come from the real environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = config::Config::load(cli.config.as_deref())?;
    let router = build_llm_router(&config);
    info!(
        backends = router.registered_backends().len(),
        local = router.has_local_backend(),
        "LLM router ready"
    );
    let retries = router.policy().max_retries;

    match cli.command {
        Command::Ask(args) => {
            let mut request = LlmRequest::new(commands::read_prompt(args.prompt).await?);
            if let Some(model) = args.model {
                request = request.with_model(model);
            }
            if let Some(system) = args.system {
                request = request.with_system_prompt(system);
            }
            if let Some(temperature) = args.temperature {
                request = request.with_temperature(temperature);
            }
            if let Some(max_tokens) = args.max_tokens {
                request = request.with_max_tokens(max_tokens);
            }

            let response = commands::route_with_retries(&router, &request, retries).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.content);
            }
        }
        Command::Task { file } => {
            let task = commands::read_task(file.as_deref()).await?;
            info!(task_type = task.kind(), "task loaded");
            let response = commands::execute_with_retries(&router, &task, retries).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Policy => {
            println!("{}", serde_json::to_string_pretty(&PolicyReport::new(&router))?);
        }
    }

    Ok(())
}
