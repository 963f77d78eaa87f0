//! termbridge MCP server entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use termbridge::{LocalFs, ProcessTerminal, ProfileStore, TerminalRegistry, TransferManager};
use termbridge_mcp::config::{load_config, resolve_config_path, ServerConfig};
use termbridge_mcp::tools::{builtin_registry, ToolDeps};
use termbridge_mcp::types::{InitializeResult, McpError};
use termbridge_mcp::ProtocolServer;

#[derive(Parser)]
#[command(
    name = "termbridge-mcp",
    about = "MCP server for termbridge: terminal control, file transfer, and connection profiles",
    version
)]
struct Cli {
    /// Path to a JSON config file. Also reads TERMBRIDGE_CONFIG.
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP over Streamable HTTP and legacy SSE (default).
    Serve {
        /// Listen port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen host.
        #[arg(long)]
        host: Option<String>,

        /// Do not start a shell as the default terminal.
        #[arg(long)]
        no_shell: bool,
    },

    /// Print server capabilities and tools as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   termbridge-mcp completions bash > ~/.local/share/bash-completion/completions/termbridge-mcp
    ///   termbridge-mcp completions zsh > ~/.zfunc/_termbridge-mcp
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

fn build_deps(config: &ServerConfig, spawn_shell: bool) -> anyhow::Result<ToolDeps> {
    let fs_root = config.resolve_fs_root();
    let remote = Arc::new(LocalFs::new(&fs_root));
    let transfers = Arc::new(TransferManager::new(remote, config.transfer_config()));

    let terminals = Arc::new(TerminalRegistry::new());
    if spawn_shell {
        let shell = config.resolve_shell();
        terminals.add(ProcessTerminal::spawn("shell", &shell)?);
    }

    let profiles = Arc::new(ProfileStore::new(config.profiles.clone()));
    tracing::debug!("Transfers rooted at {}", fs_root.display());

    Ok(ToolDeps {
        transfers,
        terminals,
        profiles,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = resolve_config_path(cli.config.as_deref());
    let mut config = load_config(config_path.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        host: None,
        no_shell: false,
    }) {
        Commands::Serve {
            port,
            host,
            no_shell,
        } => {
            if let Some(host) = host {
                config.host = host;
            }
            let port = port.unwrap_or(config.port);

            let deps = build_deps(&config, !no_shell)?;
            let registry = builtin_registry(&deps)?.seal();
            tracing::info!("termbridge MCP server ({} tools)", registry.len());

            let server = ProtocolServer::new(config, registry);
            match server.start(port).await {
                Ok(_) => {}
                Err(McpError::AddressInUse(addr)) => {
                    tracing::error!("Port already in use: {addr}. Stop the other process or pick another --port.");
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            server.stop().await;
        }

        Commands::Info => {
            let deps = build_deps(&config, false)?;
            let registry = builtin_registry(&deps)?.seal();
            let capabilities = InitializeResult::default_result();
            let info = serde_json::json!({
                "server": capabilities.server_info,
                "protocol_version": capabilities.protocol_version,
                "capabilities": capabilities.capabilities,
                "tools": registry.by_category(),
                "tool_count": registry.len(),
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(
                shell,
                &mut cmd,
                "termbridge-mcp",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
