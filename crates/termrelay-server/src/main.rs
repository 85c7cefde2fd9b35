//! termrelay server - bridges browser terminals to ssh sessions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use termrelay_core::{DEFAULT_TOKEN_TTL, ENCRYPTED_PREFIX, JwtValidator, SecretCipher, SessionRegistry};
use termrelay_server::{config, logging, routes, state};
use termrelay_types::{Identity, UserId};

use config::Config;
use logging::{LogConfig, LogFormat};
use state::AppState;

/// termrelay server - WebSocket terminal relay for stored ssh connections.
#[derive(Parser, Debug)]
#[command(name = "termrelay-server")]
#[command(about = "WebSocket terminal relay for stored ssh connections")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging (INFO level for every target)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (frame-level detail)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "relay=debug" or "remote=trace").
    /// Can be specified multiple times. Targets are prefixed with "termrelay::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a password or private key for the `connections` table
    EncryptSecret {
        /// Secret to encrypt; use "-" to read it from stdin
        value: String,
    },
    /// Sign a token for a user, for testing and scripting
    IssueToken {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        email: Option<String>,
        /// Lifetime in hours (default: 7 days)
        #[arg(long)]
        ttl_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };
    config.apply_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    match cli.command {
        Some(Command::EncryptSecret { value }) => encrypt_secret(&config, value),
        Some(Command::IssueToken {
            user_id,
            email,
            ttl_hours,
        }) => issue_token(&config, user_id, email, ttl_hours),
        None => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    config.validate()?;
    tracing::info!(
        target: "termrelay::startup",
        "Loaded configuration (port: {}, {} stored connections)",
        config.port,
        config.connections.len()
    );

    let state = Arc::new(AppState::new(config.clone())?);
    tracing::info!(target: "termrelay::startup", "Initialized application state");

    let app = routes::router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(target: "termrelay::startup", "Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.registry.clone()))
        .await?;

    tracing::info!(target: "termrelay::startup", "Server stopped");
    Ok(())
}

/// Resolves after SIGINT/SIGTERM once every relay session has been closed.
async fn shutdown_signal(registry: SessionRegistry) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "termrelay::startup", "Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(target: "termrelay::startup", "Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(target: "termrelay::startup", "Shutdown requested, closing {} sessions", registry.len());
    registry.shutdown().await;
}

fn encrypt_secret(config: &Config, value: String) -> Result<()> {
    let key = config
        .encryption_key
        .as_deref()
        .context("encryption_key is not set (config file or ENCRYPTION_KEY)")?;
    let cipher = SecretCipher::from_key(key)?;

    let plaintext = if value == "-" {
        let mut buf = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
        buf.trim_end_matches(['\r', '\n']).to_string()
    } else {
        value
    };

    println!("{}{}", ENCRYPTED_PREFIX, cipher.encrypt(&plaintext)?);
    Ok(())
}

fn issue_token(config: &Config, user_id: i64, email: Option<String>, ttl_hours: Option<u64>) -> Result<()> {
    config.validate()?;
    let validator = JwtValidator::new(config.jwt_secret.as_bytes(), config.jwt_issuer.clone());
    let ttl = ttl_hours
        .map(|h| Duration::from_secs(h * 3600))
        .unwrap_or(DEFAULT_TOKEN_TTL);
    let identity = Identity {
        user_id: UserId(user_id),
        email,
    };
    println!("{}", validator.issue(&identity, ttl)?);
    Ok(())
}
