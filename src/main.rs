// mcp-shell - Main Entry Point
//
// - `serve`: MCP server on stdin/stdout (default)
// - `check`: run a command through the policy engine only
// - `exec`: validate and execute once, printing the tool payload
// - `show-config`: print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcp_shell::audit::AuditLog;
use mcp_shell::config::Config;
use mcp_shell::handler::ShellHandler;
use mcp_shell::logging::LogSettings;
use mcp_shell::mcp::McpServer;
use mcp_shell::tools::CommandPolicy;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// mcp-shell: policy-guarded shell execution over MCP
#[derive(Parser, Debug)]
#[command(name = "mcp-shell")]
#[command(author = "mcp-shell Contributors")]
#[command(version)]
#[command(about = "MCP server exposing shell command execution behind a command policy engine", long_about = None)]
struct Args {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the shell_exec tool over stdio (default)
    Serve,
    /// Check a command against the configured policy without running it
    Check {
        /// Command to check
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Validate and execute a command once
    Exec {
        /// Return stdout/stderr base64-encoded
        #[arg(long)]
        base64: bool,

        /// Command to execute
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let settings = LogSettings::from_config(&config, args.verbose)?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            settings.without_stdout().init()?;
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { command } => {
            settings.init()?;
            check(&config, &command.join(" "))
        }
        Commands::Exec { base64, command } => {
            settings.init()?;
            exec(config, &command.join(" "), base64).await
        }
        Commands::ShowConfig => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(
        name = %config.server.name,
        version = %config.server.version,
        security_enabled = config.security.enabled,
        shell_execution = config.security.use_shell_execution,
        "Starting mcp-shell"
    );
    if config.security.enabled && config.security.use_shell_execution {
        warn!("Legacy shell execution is enabled - validation can be bypassed by runtime-assembled commands");
    }

    let handler = ShellHandler::new(Arc::new(config.security))?;
    let server = McpServer::new(config.server.name, config.server.version).with_tool(Arc::new(handler));

    let shutdown = cancel_on_ctrl_c();
    server.serve_stdio(shutdown).await
}

fn check(config: &Config, command: &str) -> Result<ExitCode> {
    let policy = CommandPolicy::new(&config.security, AuditLog::new(config.security.audit_log))?;

    match policy.validate(command) {
        Ok(()) => {
            println!("allowed");
            Ok(ExitCode::SUCCESS)
        }
        Err(denial) => {
            println!("denied: {}", denial);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn exec(config: Config, command: &str, base64: bool) -> Result<ExitCode> {
    let handler = ShellHandler::new(Arc::new(config.security))?;
    let cancel = cancel_on_ctrl_c();

    let result = handler
        .handle(&cancel, &json!({ "command": command, "base64": base64 }))
        .await;

    println!("{}", result.first_text().unwrap_or_default());
    Ok(if result.is_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}
