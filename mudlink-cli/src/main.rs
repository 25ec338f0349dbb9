//! mudlink — one-shot telnet driver.
//!
//! ```text
//! mudlink mud.example.org --port 4000 -c look -c inventory
//! mudlink bbs.example.net --tls --insecure -c "who" --json
//! mudlink --config <path> ...     Use custom config TOML
//! mudlink --gen-config            Dump default config and exit
//! mudlink --init-config           Write default config to --config path
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mudlink_core::{DEFAULT_TELNET_PORT, Engine, EventKind, SessionEvent};

use mudlink_cli::config::CliConfig;
use mudlink_cli::target::TargetOptions;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mudlink", about = "Send commands to a telnet host and print the replies")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(long, default_value = "mudlink.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    init_config: bool,

    /// Remote host name or address.
    #[arg(required_unless_present_any = ["gen_config", "init_config"])]
    host: Option<String>,

    #[arg(short, long, default_value_t = DEFAULT_TELNET_PORT)]
    port: u16,

    /// Logical name for the connection (defaults to host:port).
    #[arg(long)]
    name: Option<String>,

    /// Connect over TLS.
    #[arg(long)]
    tls: bool,

    /// Accept certificates that fail verification (implies --tls).
    #[arg(long)]
    insecure: bool,

    /// Name to verify the certificate against (defaults to the host).
    #[arg(long)]
    server_name: Option<String>,

    /// PEM file with trust anchors replacing the bundled roots.
    #[arg(long)]
    ca: Option<PathBuf>,

    /// PEM client certificate chain for mutual TLS.
    #[arg(long)]
    cert: Option<PathBuf>,

    /// PEM client private key (PKCS#8, optionally encrypted).
    #[arg(long)]
    key: Option<PathBuf>,

    #[arg(long, env = "MUDLINK_KEY_PASSPHRASE", hide_env_values = true)]
    key_passphrase: Option<String>,

    /// Per-command timeout in milliseconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Append a ready-for-input marker to every response.
    #[arg(long)]
    continuous: bool,

    /// Command to send; repeat for several.
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// Print the final status snapshot as JSON.
    #[arg(long)]
    json: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&CliConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.init_config {
        CliConfig::write_default(&cli.config)?;
        println!("wrote {}", cli.config.display());
        return Ok(());
    }

    let config = CliConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("mudlink v{}", env!("CARGO_PKG_VERSION"));

    let target = TargetOptions {
        host: cli.host.unwrap_or_default(),
        port: cli.port,
        name: cli.name,
        tls: cli.tls,
        insecure: cli.insecure,
        server_name: cli.server_name,
        ca: cli.ca,
        cert: cli.cert,
        key: cli.key,
        key_passphrase: cli.key_passphrase,
    }
    .into_target()?;

    let engine = Engine::new(config.engine.clone(), Arc::new(config.identity.gate()));
    let event_log = config
        .logging
        .events
        .then(|| tokio::spawn(log_events(engine.subscribe())));

    // ── 1. Connect ──────────────────────────────────────────────

    let outcome = match engine.connect(target).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{e}");
            engine.shutdown().await.ok();
            return Err(e.into());
        }
    };
    info!("{}", outcome.message);
    if let Some(tls) = &outcome.tls_info {
        if !tls.authorized {
            warn!(
                "server certificate not authorized: {}",
                tls.authorization_error.as_deref().unwrap_or("unknown reason")
            );
        }
    }
    if !outcome.banner.is_empty() {
        print!("{}", outcome.banner);
    }

    if cli.continuous {
        engine.set_continuous_mode(true).await?;
    }

    // ── 2. Commands ─────────────────────────────────────────────

    let timeout = cli.timeout.map(Duration::from_millis);
    for command in &cli.commands {
        match engine.send(command, timeout).await {
            Ok(response) => {
                if response.timed_out {
                    warn!("{command:?} timed out; output may be partial");
                } else if response.interrupted {
                    warn!("{command:?} was cut off by a lost connection");
                }
                println!("{}", response.text);
            }
            Err(e) => {
                error!("{command:?}: {e}");
                break;
            }
        }
    }

    // ── 3. Shutdown ─────────────────────────────────────────────

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&engine.status())?);
    }
    if let Err(e) = engine.disconnect().await {
        warn!("disconnect: {e}");
    }
    engine.shutdown().await?;
    if let Some(handle) = event_log {
        handle.abort();
    }

    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.kind {
                EventKind::Error | EventKind::SslError => error!("[{}] {}", event.kind, event.text),
                EventKind::Timeout | EventKind::SslCertificate => {
                    warn!("[{}] {}", event.kind, event.text)
                }
                // Responses are already on stdout.
                EventKind::Response => {}
                _ => info!("[{}] {}", event.kind, event.text),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("event log skipped {n} events"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
