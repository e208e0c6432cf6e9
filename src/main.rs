//! SafeExec - CLI entry point
//!
//! Starts the sandboxed code-execution broker on stdio: one JSON-RPC
//! request per line on stdin, one response per line on stdout. All
//! logging goes to stderr so the wire protocol owns stdout.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use safexec::broker::Broker;
use safexec::config::{CliOverrides, ConfigFile, SandboxConfig};
use safexec::protocol::McpServer;

/// SafeExec - capability-sandboxed code execution over MCP
///
/// Runs agent-submitted snippets inside an embedded interpreter whose
/// only effectful surface is an explicitly granted set of capabilities.
///
/// # Examples
///
/// Plain broker on stdio:
///     safexec
///
/// With audit records and strict mode:
///     safexec --record ./records --strict
///
/// Protect a directory so only classified operations may touch it:
///     safexec --classified-paths /data/secrets,/data/keys
#[derive(Parser, Debug)]
#[command(name = "safexec")]
#[command(about = "SafeExec - capability-sandboxed code execution over MCP")]
#[command(version)]
pub struct Cli {
    /// Directory to write audit records into
    ///
    /// Every execution produces a `.code` and a `.result` file. Omit to
    /// disable recording.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Enable strict mode
    ///
    /// Additionally blocks the fixed set of file-operation commands
    /// (cat, ls, cp, rm, ...) in exec, even when allowlisted, forcing
    /// file access through the filesystem capability.
    #[arg(long)]
    strict: bool,

    /// Comma-separated list of classified paths
    ///
    /// Paths are normalized to absolute form. Files under them accept
    /// only read_classified/write_classified.
    #[arg(long, value_delimiter = ',')]
    classified_paths: Option<Vec<String>>,

    /// Log errors only
    #[arg(long)]
    quiet: bool,

    /// Do not wrap one-shot expression snippets in a function
    #[arg(long = "no-wrap")]
    no_wrap: bool,

    /// Disable the session tools (stateless execution only)
    #[arg(long = "no-session")]
    no_session: bool,

    /// Path to a JSON config file
    ///
    /// File values fill in gaps; command-line values win on conflict.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of an OpenAI-compatible endpoint for the chat primitive
    #[arg(long = "llm-base-url")]
    llm_base_url: Option<String>,

    /// API key for the chat endpoint
    #[arg(long = "llm-api-key")]
    llm_api_key: Option<String>,

    /// Model identifier for the chat endpoint
    #[arg(long = "llm-model")]
    llm_model: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_logging(cli.quiet)?;

    let file = match &cli.config {
        Some(path) => {
            tracing::info!("loading configuration from: {}", path.display());
            ConfigFile::from_file(path)?
        }
        None => ConfigFile::default(),
    };

    let overrides = CliOverrides {
        record: cli.record,
        strict: cli.strict,
        classified_paths: cli.classified_paths,
        quiet: cli.quiet,
        no_wrap: cli.no_wrap,
        no_session: cli.no_session,
        llm_base_url: cli.llm_base_url,
        llm_api_key: cli.llm_api_key,
        llm_model: cli.llm_model,
    };
    let config = SandboxConfig::from_layers(overrides, file);

    tracing::info!(
        strict = config.strict,
        sessions = config.sessions_enabled,
        classified = config.classified_paths.len(),
        chat = config.chat.is_some(),
        "broker starting"
    );

    let broker = Broker::new(std::sync::Arc::new(config));
    let mut server = McpServer::new(broker);

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    server.run(stdin.lock(), stdout.lock())?;

    Ok(())
}

/// Initializes the logging system.
///
/// The writer is pinned to stderr: standard output is reserved for the
/// wire protocol. Respects `RUST_LOG` for fine-grained control; `--quiet`
/// raises the default filter to errors only.
fn initialize_logging(quiet: bool) -> Result<()> {
    let default_level = if quiet { "error" } else { "info" };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();

    Ok(())
}
