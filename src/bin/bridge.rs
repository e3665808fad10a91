//! ss-bridge: local SOCKS5/HTTP proxy bridge binary.

use anyhow::{Context, Result};
use ss_bridge::config::{parse_tunnel_spec, Config, ConfigStore, JsonFileConfigStore};
use ss_bridge::http_proxy::start_http_proxy_server;
use ss_bridge::meter::Meter;
use ss_bridge::socks5::start_socks5_server;
use ss_bridge::tunnel::TunnelPool;
use ss_bridge::util::ConnTracker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "ss-bridge";

const DEFAULT_SOCKS5_ADDR: &str = "127.0.0.1:1271";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:1272";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let mut socks5_addr = DEFAULT_SOCKS5_ADDR.to_string();
    let mut http_addr: Option<String> = Some(DEFAULT_HTTP_ADDR.to_string());
    let mut config_path: Option<PathBuf> = None;
    let mut tunnels: Vec<String> = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-l" | "--listen" => {
                socks5_addr = args.next().context("expected address after -l")?;
            }
            "-H" | "--http-listen" => {
                let value = args.next().context("expected address after --http-listen")?;
                http_addr = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(value)
                };
            }
            "-c" | "--config" => {
                config_path = Some(PathBuf::from(
                    args.next().context("expected path after -c")?,
                ));
            }
            "-t" | "--tunnel" => {
                tunnels.push(args.next().context("expected ss:// string after -t")?);
            }
            "-V" | "--version" => {
                println!("{APP_NAME} {VERSION}");
                return Ok(());
            }
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            other => {
                error!("Unknown argument: {}", other);
                return Err(anyhow::anyhow!("unknown argument: {}", other));
            }
        }
    }

    let config_path = config_path.unwrap_or_else(default_config_path);
    let store: Arc<dyn ConfigStore> = Arc::new(
        JsonFileConfigStore::open(config_path.clone())
            .await
            .with_context(|| format!("failed to load {}", config_path.display()))?,
    );

    let mut config: Config = store.load().await?;
    if !tunnels.is_empty() {
        config.ss_tunnels = tunnels;
        store.save(&config).await?;
    }

    let specs = config
        .ss_tunnels
        .iter()
        .map(|raw| parse_tunnel_spec(raw))
        .collect::<ss_bridge::Result<Vec<_>>>()
        .context("failed to parse persisted tunnel list")?;

    let pool = Arc::new(TunnelPool::new());
    pool.install(specs).await.context("failed to install tunnels")?;
    info!("[Bridge] loaded {} tunnel(s)", pool.len().await);

    let meter = Arc::new(Meter::new(Arc::clone(&store)));

    info!("[Bridge] {APP_NAME} v{VERSION}");
    info!("[Bridge] SOCKS5 listening on {}", socks5_addr);

    let tracker = ConnTracker::new();
    let shutdown_signal = Arc::new(Notify::new());

    let socks_pool = Arc::clone(&pool);
    let socks_meter = Arc::clone(&meter);
    let socks5_addr_for_task = socks5_addr.clone();
    let socks_tracker = tracker.clone();
    let socks_shutdown = Arc::clone(&shutdown_signal);
    let socks_task = tokio::spawn(async move {
        start_socks5_server(
            &socks5_addr_for_task,
            socks_pool,
            socks_meter,
            socks_tracker,
            socks_shutdown,
        )
        .await
        .context("SOCKS5 server error")
    });

    let http_task = http_addr.map(|addr| {
        info!("[Bridge] HTTP proxy listening on {}", addr);
        let socks5_dial_addr = socks5_addr.clone();
        let http_tracker = tracker.clone();
        let http_shutdown = Arc::clone(&shutdown_signal);
        tokio::spawn(async move {
            start_http_proxy_server(&addr, socks5_dial_addr, http_tracker, http_shutdown)
                .await
                .context("HTTP proxy server error")
        })
    });

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("[Bridge] shutdown signal received, closing listeners");
        shutdown_signal.notify_waiters();
        tracker.drain().await;
        info!("[Bridge] in-flight connections drained, flushing traffic meter");
        if let Err(e) = meter.flush().await {
            error!("[Bridge] final meter flush failed: {}", e);
        }
    };

    if let Some(http_task) = http_task {
        tokio::select! {
            res = socks_task => { res.context("SOCKS5 task join error")??; }
            res = http_task => { res.context("HTTP task join error")??; }
            _ = shutdown => {}
        }
    } else {
        tokio::select! {
            res = socks_task => { res.context("SOCKS5 task join error")??; }
            _ = shutdown => {}
        }
    }

    Ok(())
}

fn default_config_path() -> PathBuf {
    dirs_config_dir().join("ss-bridge").join("config.json")
}

fn dirs_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
}

fn print_help() {
    println!("Usage: {APP_NAME} [OPTIONS]");
    println!("Options:");
    println!("  -l, --listen ADDRESS      SOCKS5 listen address (default: {DEFAULT_SOCKS5_ADDR})");
    println!("  -H, --http-listen ADDRESS HTTP proxy listen address, or 'none' to disable (default: {DEFAULT_HTTP_ADDR})");
    println!("  -c, --config PATH         Configuration file path (default: ~/.config/ss-bridge/config.json)");
    println!("  -t, --tunnel SS_URL       Add a tunnel (ss://method:password@host:port); repeatable, replaces the persisted list");
    println!("  -V, --version             Show version information");
    println!("  -h, --help                Show this help message");
}
