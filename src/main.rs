//! LISA CLI
//!
//! Runs the plan, generate and verify loop from the command line.

use std::path::PathBuf;

use tokio::sync::mpsc;

use lisa::{debug, Orchestrator, RunConfig, RunEvent, RunOutcome, Validate, Workspace};

const USAGE: &str = "\
Usage: lisa <command> [args]

Commands:
  run <request...>   Plan, generate and verify code for the request
  files              List files in the workspace
  clear              Remove every file from the workspace

Environment variables:
  LISA_CONFIG=<path>                 TOML or YAML run configuration
  LISA_WORKSPACE=<dir>               Workspace root (default: ./workspace)
  LISA_EXECUTION_TIMEOUT=<secs>      Per-file execution timeout
  LISA_GENERATOR=claude|gemini|ollama  Use one backend for every role
  LISA_DEBUG=1                       Verbose logging";

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries the event stream.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(debug::default_filter())),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let code = match command.as_str() {
        "run" if args.len() > 1 => run(config, args[1..].join(" ")).await,
        "files" => files(&Workspace::new(config.workspace_root)),
        "clear" => clear(&Workspace::new(config.workspace_root)),
        _ => {
            eprintln!("{}", USAGE);
            1
        }
    };

    std::process::exit(code);
}

fn load_config() -> lisa::Result<RunConfig> {
    let config = match std::env::var("LISA_CONFIG") {
        Ok(path) => RunConfig::load(&PathBuf::from(path))?,
        Err(_) => RunConfig::default(),
    };
    let mut config = config.with_env_overrides()?;

    if let Ok(backend) = std::env::var("LISA_GENERATOR") {
        tracing::info!(backend = %backend, "using one backend for every role");
        config.generators = config.generators.with_backend(backend.trim());
    }

    for warning in config.validate().into_result()? {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}

async fn run(config: RunConfig, request: String) -> i32 {
    let orchestrator = match Orchestrator::from_config(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Failed to set up generators: {}", e);
            return 1;
        }
    };

    tracing::info!(request = %request, root = ?config.workspace_root, "starting run");

    let (tx, mut rx) = mpsc::channel::<RunEvent>(16);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", event.to_json_line());
        }
    });

    let state = orchestrator.run_with_events(request, tx).await;
    if let Err(e) = printer.await {
        tracing::error!(error = %e, "event printer failed");
    }

    match state.outcome() {
        RunOutcome::Approved => 0,
        outcome => {
            tracing::warn!(?outcome, retry_count = state.retry_count, "run did not succeed");
            1
        }
    }
}

fn files(workspace: &Workspace) -> i32 {
    match workspace.list() {
        Ok(files) => {
            for file in files {
                println!("{}", file);
            }
            0
        }
        Err(e) => {
            eprintln!("Failed to list workspace: {}", e);
            1
        }
    }
}

fn clear(workspace: &Workspace) -> i32 {
    match workspace.clear() {
        Ok(()) => {
            println!("Cleared {}", workspace.root().display());
            0
        }
        Err(e) => {
            eprintln!("Failed to clear workspace: {}", e);
            1
        }
    }
}
