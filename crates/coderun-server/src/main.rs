//! Command-line entry point for the coderun execution service
//!
//! `serve` (the default) hosts the HTTP endpoint, `run` pushes a single file
//! through the same pipeline and `capabilities` reports what this host can
//! execute.

use anyhow::Result;
use clap::{Parser, Subcommand};
use coderun_core::capability::CapabilityDetector;
use coderun_core::config::{CoderunConfig, ConfigLoader};
use coderun_core::core_types::{ExecutionPayload, ExecutionResult, Language};
use coderun_core::orchestrator::Orchestrator;
use coderun_server::{shutdown_signal, CodeRunServer, ServerConfig};
use log::LevelFilter;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "coderun - run learner code snippets in JavaScript, Python, Java and C++")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(long, short, help = "Path to a coderun.yaml file (defaults to ./coderun.yaml, then the user config directory)")]
    config: Option<PathBuf>,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server (default command)
    Serve {
        #[clap(long, help = "Override server.bind_addr")]
        bind_addr: Option<String>,
    },
    /// Execute a source file and print the result as JSON
    Run {
        file: PathBuf,

        #[clap(long, short = 'L', help = "Language id; inferred from the file extension when omitted")]
        language: Option<String>,
    },
    /// Show which languages this host can execute
    Capabilities,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let config = ConfigLoader::discover(cli.config.as_deref()).await?;

    match cli.command {
        Some(Commands::Serve { bind_addr }) => run_server(config, bind_addr).await,
        Some(Commands::Run { file, language }) => run_file(config, &file, language).await,
        Some(Commands::Capabilities) => show_capabilities(config).await,
        None => run_server(config, None).await,
    }
}

async fn run_server(mut config: CoderunConfig, bind_addr: Option<String>) -> Result<()> {
    if let Some(bind_addr) = bind_addr {
        config.server.bind_addr = bind_addr;
        config.validate()?;
    }

    let server_config = ServerConfig::from_settings(&config.server)?;
    let orchestrator = Orchestrator::from_config(&config)?;
    log::info!("Starting coderun server on {}...", server_config.bind_addr);

    let server = CodeRunServer::with_config(Arc::new(orchestrator), server_config);
    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

fn language_from_extension(path: &Path) -> Option<Language> {
    match path.extension()?.to_str()? {
        "js" | "mjs" | "cjs" => Some(Language::JavaScript),
        "py" => Some(Language::Python),
        "java" => Some(Language::Java),
        "cpp" | "cc" | "cxx" => Some(Language::Cpp),
        _ => None,
    }
}

async fn run_file(config: CoderunConfig, file: &Path, language: Option<String>) -> Result<()> {
    let language = match language {
        Some(language) => language,
        None => language_from_extension(file)
            .map(|language| language.id().to_string())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Cannot infer the language of '{}', pass --language",
                    file.display()
                )
            })?,
    };

    let code = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", file.display(), e))?;

    let orchestrator = Orchestrator::from_config(&config)?;
    let result = orchestrator
        .execute(ExecutionPayload::new(code, language))
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    let code = exit_code_for(&result);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Non-zero only when the run failed. Diagnostics from a completed run are not a failure.
fn exit_code_for(result: &ExecutionResult) -> i32 {
    if result.is_success() {
        0
    } else {
        1
    }
}

async fn show_capabilities(config: CoderunConfig) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config)?;
    let snapshot = CapabilityDetector::from_config(&config)?.snapshot().await;

    let report = json!({
        "registered": orchestrator.languages(),
        "environment": snapshot.environment,
        "toolchains": snapshot.toolchains,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
