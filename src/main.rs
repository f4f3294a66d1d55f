// Switchboard - headless host
// Main entry point
//
// Runs one window over stdio: inbound UI envelopes (`name:payload`) are read
// from stdin, outbound UI events are written to stdout as JSON lines, logs go
// to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use switchboard::config::load_config_from;
use switchboard::host::Host;
use switchboard::session::{UiEvent, UiSink};

#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "Coordinates an agent worker with a chat UI over stdio")]
struct Args {
    /// Configuration file (defaults to ~/.switchboard/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Window identity used to route decision requests
    #[arg(long, default_value = "main")]
    owner: String,

    /// Working directory handed to the worker
    #[arg(short = 'w', long, default_value = ".")]
    working_dir: PathBuf,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Forwards UI events to the stdout writer task
struct StdoutUi {
    tx: mpsc::UnboundedSender<String>,
}

impl UiSink for StdoutUi {
    fn emit(&self, event: UiEvent) {
        match event.to_line() {
            Ok(line) => {
                let _ = self.tx.send(line);
            }
            Err(e) => error!("Failed to encode UI event: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("switchboard={}", args.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config_from(args.config.as_deref()).context("Failed to load configuration")?;
    let working_dir = args
        .working_dir
        .canonicalize()
        .with_context(|| format!("Working directory {} not found", args.working_dir.display()))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let host = Host::new(Arc::new(config));
    let ui: Arc<dyn UiSink> = Arc::new(StdoutUi { tx });
    let window = host
        .open_window(args.owner.as_str(), working_dir, ui)
        .await
        .context("Failed to open window")?;
    info!(owner = %args.owner, "Switchboard ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    let outcome = window.handle_line(&line).await;
                    debug!(?outcome, "Handled inbound line");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    host.shutdown().await;
    drop(window);
    drop(host);
    // Late events from settling tasks may still hold a sender.
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
    Ok(())
}
