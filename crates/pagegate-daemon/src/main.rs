//! pagegate-daemon - serves gated pages over HTTP.
//!
//! Loads `pagegate.toml` (if present), applies command-line overrides, checks
//! that the page document loads and every page has a content file, and serves
//! until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use pagegate_core::{AlertSink, ConfigStore, FanoutAlertSink, PageGate, TracingAlertSink};
use pagegate_daemon::config::DaemonConfig;
use pagegate_daemon::mail::MailAlertSink;
use pagegate_daemon::render::ContentRenderer;
use pagegate_daemon::server::{self, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// pagegate daemon - IP and cookie based page access gate
#[derive(Parser, Debug)]
#[command(name = "pagegate-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to daemon configuration file
    #[arg(short, long, default_value = "pagegate.toml")]
    config: PathBuf,

    /// Address to listen on (overrides `server.listen`)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Path to the YAML page document (overrides `server.pages_file`)
    #[arg(long)]
    pages_file: Option<PathBuf>,

    /// Templates directory (overrides `server.templates_dir`)
    #[arg(long)]
    templates_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log file path (logs to stdout if not specified)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let mut config = if args.config.exists() {
        DaemonConfig::from_file(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "no configuration file, using defaults");
        DaemonConfig::default()
    };
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(pages_file) = args.pages_file {
        config.server.pages_file = pages_file;
    }
    if let Some(templates_dir) = args.templates_dir {
        config.server.templates_dir = templates_dir;
    }

    let store = ConfigStore::yaml_file(&config.server.pages_file);
    let document = store
        .snapshot()
        .with_context(|| format!("failed to load page document {}", store.describe()))?;
    info!(
        pages_file = %config.server.pages_file.display(),
        pages = document.pages.len(),
        "page document loaded"
    );

    let renderer = ContentRenderer::new(&config.server.templates_dir);
    let missing = renderer.missing_pages(&document).await;
    if !missing.is_empty() {
        for (page, reference) in &missing {
            warn!(page, reference, "page content file missing");
        }
        bail!(
            "{} page(s) have no content file under {}",
            missing.len(),
            config.server.templates_dir.join("pages").display()
        );
    }

    let mut alerts = FanoutAlertSink::new().with_sink(Arc::new(TracingAlertSink));
    if config.mail.enabled {
        let password = config
            .mail
            .resolve_password(|var| std::env::var(var).ok())
            .context("failed to resolve mail password")?;
        let (sink, _mailer) = MailAlertSink::from_config(&config.mail, password)
            .context("failed to configure mail alerts")?;
        alerts = alerts.with_sink(Arc::new(sink));
        info!(host = ?config.mail.host, port = config.mail.port, "mail alerts enabled");
    }
    let alerts: Arc<dyn AlertSink> = Arc::new(alerts);

    let state = AppState::new(
        PageGate::with_alerts(store, alerts),
        renderer,
        config.cookie.clone(),
        config.server.client_ip_header.as_deref(),
    )
    .context("invalid server.client_ip_header")?;
    if config.server.client_ip_header.is_some() {
        warn!(
            header = ?config.server.client_ip_header,
            "client IPs are taken from a request header; only run behind a trusted proxy"
        );
    }

    let addr = config.server.listen;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "pagegate listening");

    server::serve(listener, Arc::new(state), shutdown_signal())
        .await
        .context("server error")?;

    info!("pagegate stopped");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
