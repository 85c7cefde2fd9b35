//! termrelay-connect - line-mode terminal for a termrelay server.

use anyhow::Result;
use clap::Parser;
use std::io::Write;
use termrelay_client::{ClientConfig, ReconnectPolicy, TerminalClient, TerminalHandler, dispatch};
use termrelay_types::Geometry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Open a stored ssh connection through a termrelay server.
#[derive(Parser, Debug)]
#[command(name = "termrelay-connect")]
#[command(version)]
struct Cli {
    /// Server base URL
    #[arg(long, default_value = "ws://localhost:8080")]
    url: String,

    /// Stored connection id
    connection_id: i64,

    /// Bearer token
    #[arg(long)]
    token: String,

    /// Claimed user id, checked against the token
    #[arg(long)]
    user_id: Option<i64>,

    /// Terminal identity; reuse it to take over an existing session
    #[arg(long)]
    client_id: Option<String>,

    /// Reconnect with backoff when the socket fails
    #[arg(long)]
    reconnect: bool,

    #[arg(long, default_value_t = 80)]
    cols: u16,

    #[arg(long, default_value_t = 24)]
    rows: u16,
}

/// Writes remote output straight to stdout and lifecycle messages to stderr.
struct Printer {
    client: TerminalClient,
    done: CancellationToken,
}

impl TerminalHandler for Printer {
    fn on_output(&mut self, data: &str) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(data.as_bytes());
        let _ = stdout.flush();
    }

    fn on_status(&mut self, message: &str) {
        eprintln!("[{}]", message);
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("[error] {}", message);
    }

    fn on_disconnect(&mut self) {
        if !self.client.is_connecting() {
            self.done.cancel();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("termrelay=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.url, cli.connection_id)
        .with_token(cli.token)
        .with_geometry(Geometry::new(cli.cols, cli.rows));
    if let Some(user_id) = cli.user_id {
        config = config.with_user_id(user_id);
    }
    if let Some(client_id) = cli.client_id {
        config = config.with_client_id(client_id);
    }
    if cli.reconnect {
        config = config.with_reconnect(ReconnectPolicy::default());
    }

    let (client, events) = TerminalClient::new(config);
    let done = CancellationToken::new();
    let mut printer = Printer {
        client: client.clone(),
        done: done.clone(),
    };
    tokio::spawn(async move { dispatch(events, &mut printer).await });

    if !client.connect() {
        anyhow::bail!("could not start connection");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !client.send_input(&format!("{}\n", line)) {
                        eprintln!("[not connected, input dropped]");
                    }
                }
                None => break,
            }
        }
    }

    client.disconnect();
    Ok(())
}
