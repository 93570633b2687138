//! campaignd - conversational email campaign builder
//!
//! CLI entry point: serve conversations over a socket or chat in the terminal.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use campaignd::cli::{Cli, Command, get_log_path};
use campaignd::config::Config;
use campaignd::domain::{Credentials, Location, TenantContext};
use campaignd::llm::create_client;
use campaignd::platform::PlatformClient;
use campaignd::prompts::PromptLoader;
use campaignd::repl::ChatSession;
use campaignd::server::{self, Server};
use campaignd::workflow::{Orchestrator, Services};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    info!(provider = %config.llm.provider, model = %config.llm.model, "campaignd loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Serve { socket }) => {
            debug!(?socket, "main: matched Serve command");
            cmd_serve(&config, socket).await
        }
        Some(Command::Chat {
            location_id,
            location_name,
            timezone,
        }) => {
            debug!(?location_id, "main: matched Chat command");
            let location = Location {
                id: location_id.unwrap_or_default(),
                name: location_name.unwrap_or_default(),
                timezone,
                ..Location::default()
            };
            cmd_chat(&config, TenantContext::new(location, Credentials::default())).await
        }
        Some(Command::ShowConfig) => {
            debug!("main: matched ShowConfig command");
            cmd_show_config(&config)
        }
        None => {
            debug!("main: no command specified, starting chat");
            cmd_chat(&config, TenantContext::default()).await
        }
    }
}

/// Build the collaborators every conversation shares
fn build_services(config: &Config) -> Result<Arc<Services>> {
    debug!("build_services: called");
    config.validate()?;
    let llm = create_client(&config.llm).context("Failed to create LLM client")?;
    let platform = Arc::new(PlatformClient::from_config(&config.platform).context("Failed to create platform client")?);

    Ok(Arc::new(Services {
        llm,
        prompts: Arc::new(PromptLoader::from_default_dir()),
        segments: platform.clone(),
        campaigns: platform,
        config: config.workflow.clone(),
        max_tokens: config.llm.max_tokens,
    }))
}

/// Serve conversations until SIGINT/SIGTERM
async fn cmd_serve(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    debug!(?socket, "cmd_serve: called");
    let orchestrator = Orchestrator::new(build_services(config)?);
    let socket_path = socket.unwrap_or_else(|| config.server.socket_path.clone());
    let (listener, socket_path) = server::create_listener_at(&socket_path)?;
    info!(?socket_path, "Socket listening");
    println!("Listening on {}", socket_path.display());

    let server = Server::new(orchestrator, &config.server);
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener, shutdown_rx).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    debug!("cmd_serve: setting up signal handlers");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("Server shutting down...");
    let _ = shutdown_tx.send(()).await;
    let _ = server_handle.await;
    server::cleanup_socket(&socket_path);
    Ok(())
}

/// Chat in this terminal
async fn cmd_chat(config: &Config, tenant: TenantContext) -> Result<()> {
    debug!(location_id = %tenant.location.id, "cmd_chat: called");
    let orchestrator = Orchestrator::new(build_services(config)?);
    ChatSession::new(orchestrator, tenant).run().await
}

/// Print the effective configuration
fn cmd_show_config(config: &Config) -> Result<()> {
    debug!("cmd_show_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
