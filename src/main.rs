#![forbid(unsafe_code)]

//! `tool-conduit` command-line front end for the stdio RPC transport.
//!
//! Loads the server table from a TOML file, starts the requested child
//! server on demand, performs one call, prints the JSON result on stdout,
//! and stops the child again.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use tool_conduit::config::{GlobalConfig, MAX_TIMEOUT_SECONDS};
use tool_conduit::rpc::{RpcTransport, TransportRegistry};
use tool_conduit::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tool-conduit", about = "Call operations on a stdio JSON-RPC tool server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Call one operation and print its result.
    Call {
        /// Server kind as named in the config's `[servers]` table.
        server: String,
        /// Operation name.
        operation: String,
        /// Operation arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Override the server's call timeout (seconds).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List the operations a server offers.
    List {
        /// Server kind as named in the config's `[servers]` table.
        server: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let Cli {
        config: config_path,
        command,
        ..
    } = args;
    let mut config = GlobalConfig::load_from_path(&config_path)?;

    if let Command::Call {
        ref server,
        timeout: Some(seconds),
        ..
    } = command
    {
        if seconds == 0 {
            return Err(AppError::Config("--timeout must be greater than zero".into()));
        }
        if seconds > MAX_TIMEOUT_SECONDS {
            return Err(AppError::Config(format!(
                "--timeout must not exceed {MAX_TIMEOUT_SECONDS}"
            )));
        }
        if let Some(entry) = config.servers.get_mut(server) {
            entry.call_timeout_seconds = seconds;
        }
    }

    let registry = TransportRegistry::from_config(Arc::new(config));
    info!(config = %config_path.display(), "configuration loaded");

    let outcome = match &command {
        Command::Call {
            server,
            operation,
            args,
            ..
        } => call(&registry, server, operation, args).await,
        Command::List { server } => registry
            .list_operations(server)
            .await
            .map(Value::Array),
    };

    registry.shutdown().await;

    let value = outcome.inspect_err(|err| error!(%err, "request failed"))?;
    let rendered = serde_json::to_string_pretty(&value)
        .map_err(|err| AppError::Protocol(format!("failed to render result: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn call(
    registry: &TransportRegistry<RpcTransport>,
    server: &str,
    operation: &str,
    raw_args: &str,
) -> Result<Value> {
    let arguments: Value = serde_json::from_str(raw_args)
        .map_err(|err| AppError::Config(format!("--args is not valid json: {err}")))?;
    if !arguments.is_object() {
        return Err(AppError::Config("--args must be a json object".into()));
    }

    registry.call(server, operation, &arguments).await
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
