//! Recon — MCP gateway for network reconnaissance tools.
//!
//! Three subcommands:
//! - `recon serve`: Streamable HTTP MCP server exposing every enabled service
//! - `recon stdio`: STDIO transport for STDIO-based MCP clients
//! - `recon run <service> key=value...`: one-shot invocation printing the envelope

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::http::Request;
use axum::response::IntoResponse;
use clap::{Parser, Subcommand};
use nimbus_recon::{ReconConfig, ReconMcpServer, ReconRegistry};
use rmcp::ServiceExt;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as TowerServiceExt;
use tracing_subscriber::EnvFilter;

/// Recon — MCP gateway for network reconnaissance tools.
#[derive(Parser)]
#[command(
    name = "recon",
    version,
    about = "Recon — MCP gateway for network reconnaissance tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a Streamable HTTP MCP server exposing all enabled services
    Serve {
        /// Path to recon.toml [default: ./recon.toml or ~/.config/recon/recon.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// HTTP port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Bind address
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Serve all enabled services over STDIO
    Stdio {
        /// Path to recon.toml [default: ./recon.toml or ~/.config/recon/recon.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run one service and print its response envelope
    Run {
        /// Service name (ping, dns, whois, curl, nmap, nikto, wpscan, httpx, nbtscan)
        service: String,
        /// Arguments as key=value pairs, e.g. host=example.com count=3
        #[arg(value_parser = parse_pair)]
        args: Vec<(String, String)>,
        /// Print the plain-text rendering instead of JSON
        #[arg(long)]
        text: bool,
        /// Path to recon.toml [default: ./recon.toml or ~/.config/recon/recon.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // stdout belongs to the STDIO transport and to `run` output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down recon...");
        cancel_for_signal.cancel();
    });

    match cli.command {
        Commands::Serve { config, port, host } => {
            let registry = build_registry(config, &cancel).await?;
            run_serve(registry, host, port, cancel).await?;
        }
        Commands::Stdio { config } => {
            let registry = build_registry(config, &cancel).await?;
            run_stdio(registry, cancel).await?;
        }
        Commands::Run {
            service,
            args,
            text,
            config,
        } => {
            let registry = build_registry(config, &cancel).await?;
            return run_once(&registry, &service, args, text).await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Serve every enabled service over Streamable HTTP at `/mcp`.
async fn run_serve(
    registry: ReconRegistry,
    host: String,
    port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let server = ReconMcpServer::new(registry);

    let session_manager = Arc::new(LocalSessionManager::default());
    let http_config = StreamableHttpServerConfig {
        cancellation_token: cancel.clone(),
        ..Default::default()
    };
    let server_for_factory = server.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(server_for_factory.clone()),
        session_manager,
        http_config,
    );

    let app = Router::new().fallback(move |req: Request<axum::body::Body>| {
        let svc = mcp_service.clone();
        async move { svc.oneshot(req).await.into_response() }
    });

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    tracing::info!(host = %host, port = %port, "recon HTTP server listening");
    tracing::info!("Connect your MCP client to http://{}:{}/mcp", host, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| anyhow::anyhow!("recon HTTP server error: {}", e))?;

    tracing::info!("recon HTTP server stopped");
    Ok(())
}

/// Serve every enabled service over stdin/stdout.
async fn run_stdio(registry: ReconRegistry, cancel: CancellationToken) -> Result<()> {
    let server = ReconMcpServer::new(registry);

    let transport = (tokio::io::stdin(), tokio::io::stdout());
    let running = server
        .serve_with_ct(transport, cancel.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize recon stdio transport: {:?}", e))?;

    tracing::info!("recon stdio transport initialized, waiting for messages");

    tokio::select! {
        result = running.waiting() => {
            match result {
                Ok(reason) => {
                    tracing::info!(?reason, "recon stdio transport completed");
                }
                Err(e) => {
                    tracing::error!(error = %e, "recon stdio transport error");
                    return Err(anyhow::anyhow!("recon stdio transport error: {}", e));
                }
            }
        }
        _ = cancel.cancelled() => {
            tracing::info!("recon stdio transport cancelled");
        }
    }

    Ok(())
}

/// Invoke one service and print the envelope. Exits non-zero unless the
/// envelope reports success.
async fn run_once(
    registry: &ReconRegistry,
    service: &str,
    args: Vec<(String, String)>,
    text: bool,
) -> Result<ExitCode> {
    let arguments: Map<String, Value> = args
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let response = registry
        .dispatch(service, arguments)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if text {
        print!("{}", response);
    } else {
        println!("{}", response.to_json()?);
    }
    Ok(if response.is_successful() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Load config and build the registry. Root cancellation also cancels
/// every running tool.
async fn build_registry(
    explicit: Option<PathBuf>,
    cancel: &CancellationToken,
) -> Result<ReconRegistry> {
    let config = match resolve_config(explicit)? {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            ReconConfig::load(&path).await?
        }
        None => {
            tracing::info!("no recon.toml found, using built-in defaults");
            let mut config = ReconConfig::default();
            config.apply_env_overrides()?;
            config
        }
    };
    let registry = ReconRegistry::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to build recon registry: {}", e))?;

    let root = cancel.clone();
    let tools = registry.cancel_token();
    tokio::spawn(async move {
        root.cancelled().await;
        tools.cancel();
    });
    Ok(registry)
}

/// Resolve config file path: explicit flag → ./recon.toml → ~/.config/recon/recon.toml.
///
/// Returns `None` when no file exists, so built-in defaults apply.
fn resolve_config(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file {:?} does not exist", path));
        }
        return Ok(Some(path));
    }

    let local = Path::new("recon.toml");
    if local.exists() {
        return Ok(Some(local.to_path_buf()));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("recon").join("recon.toml");
        if xdg.exists() {
            return Ok(Some(xdg));
        }
    }

    Ok(None)
}

/// Parse a `key=value` argument for `recon run`.
fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}
