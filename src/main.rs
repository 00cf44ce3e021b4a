//! Quectel Tower CLI - Periodically scan serving and neighbor cells.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use quectel_tower::{
    Config, ScanError, SignalError, SignalSample, TcpModem, TowerScanner, TowerSnapshot,
    metrics::start_metrics_server,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Quectel Tower - Scan serving and neighbor cells from a Quectel modem
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Modem serial bridge address (host:port)
    #[arg(short, long, env = "QUECTEL_MODEM")]
    modem: Option<String>,

    /// Seconds between scans
    #[arg(short = 'i', long)]
    scan_interval: Option<u64>,

    /// Blocking scan timeout in milliseconds (0 = wait forever)
    #[arg(long)]
    scan_timeout_ms: Option<u64>,

    /// Deliver results through a callback instead of waiting for each scan
    #[arg(long)]
    callback: bool,

    /// Max towers in JSON location output (0 = all)
    #[arg(long)]
    tower_limit: Option<usize>,

    /// Print each snapshot as JSON
    #[arg(long)]
    json: bool,

    /// Print statistics every N seconds
    #[arg(short, long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Connection timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Timeout for each QENG command in seconds
    #[arg(long)]
    command_timeout: Option<u64>,

    /// Enable the Prometheus metrics endpoint
    #[arg(long)]
    metrics: bool,

    /// Port for the Prometheus metrics endpoint
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Maximum runtime in seconds (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_runtime: u64,
}

impl Args {
    /// Apply command line overrides on top of the file configuration.
    fn merge_into(&self, config: &mut Config) {
        if let Some(ref modem) = self.modem {
            config.modem_address = modem.clone();
        }
        if let Some(v) = self.scan_interval {
            config.scan_interval = v;
        }
        if let Some(v) = self.scan_timeout_ms {
            config.scan_timeout_ms = v;
        }
        if let Some(v) = self.tower_limit {
            config.tower_limit = v;
        }
        if let Some(v) = self.stats_interval {
            config.stats_interval = v;
        }
        if let Some(v) = self.connect_timeout {
            config.connect_timeout = v;
        }
        if let Some(v) = self.command_timeout {
            config.command_timeout = v;
        }
        if self.metrics {
            config.metrics_enabled = true;
        }
        if let Some(v) = self.metrics_port {
            config.metrics_port = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = Config::load()?;
    args.merge_into(&mut config);
    config.validate()?;

    info!("Quectel Tower starting...");
    info!("Modem: {}", config.modem_address);

    let modem = TcpModem::new(config.modem_config());
    let scanner = TowerScanner::spawn(modem, config.scanner_config());
    let stats = Arc::clone(scanner.stats());

    if config.metrics_enabled {
        let metrics_stats = Arc::clone(&stats);
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port, metrics_stats).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                let _ = shutdown_tx_clone.send(true);
            }
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    });

    if args.max_runtime > 0 {
        let shutdown_tx_clone = shutdown_tx.clone();
        let max_runtime = args.max_runtime;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(max_runtime)).await;
            info!("Max runtime reached");
            let _ = shutdown_tx_clone.send(true);
        });
    }

    if config.stats_interval > 0 {
        let stats_clone = Arc::clone(&stats);
        let stats_interval = config.stats_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                println!("\n{}", stats_clone.summary());
            }
        });
    }

    let (results_tx, mut results) = mpsc::unbounded_channel::<TowerSnapshot>();
    let mut ticker = tokio::time::interval(Duration::from_secs(config.scan_interval.max(1)));
    let output = OutputFormat {
        json: args.json,
        tower_limit: config.tower_limit,
    };

    // Main scan loop
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                if args.callback {
                    let tx = results_tx.clone();
                    match scanner.scan_with_callback(move |snapshot| {
                        let _ = tx.send(snapshot);
                    }) {
                        Ok(()) => {}
                        Err(ScanError::Busy) => warn!("Previous scan still pending, skipping"),
                        Err(e) => {
                            error!("Scan request failed: {}", e);
                            break;
                        }
                    }
                    continue;
                }

                let result = tokio::select! {
                    result = scanner.scan_blocking(config.scan_timeout()) => result,
                    _ = shutdown_rx.changed() => break,
                };
                match result {
                    Ok(snapshot) => println!("{}", output.render(&snapshot, scanner.get_signal())),
                    Err(ScanError::WorkerStopped) => {
                        error!("Scan worker stopped");
                        break;
                    }
                    Err(e) => warn!("Scan failed: {}", e),
                }
            }

            Some(snapshot) = results.recv() => {
                println!("{}", output.render(&snapshot, scanner.get_signal()));
            }
        }
    }

    scanner.cancel_scan();
    scanner.shutdown().await;

    // Print final statistics
    println!("\n\nFINAL STATISTICS");
    println!("{}", stats.summary());

    Ok(())
}

/// How each snapshot is printed.
struct OutputFormat {
    json: bool,
    tower_limit: usize,
}

impl OutputFormat {
    fn render(&self, snapshot: &TowerSnapshot, signal: Result<SignalSample, SignalError>) -> String {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

        if self.json {
            return json!({
                "timestamp": timestamp.to_string(),
                "valid": snapshot.is_valid(),
                "serving": snapshot.serving,
                "neighbors": snapshot.neighbors,
                "towers": snapshot.location_towers(self.tower_limit),
                "signal": signal.ok(),
            })
            .to_string();
        }

        let mut out = if snapshot.is_valid() {
            format!("{} serving {}", timestamp, snapshot.serving)
        } else {
            format!("{} no serving cell", timestamp)
        };
        for neighbor in &snapshot.neighbors {
            out.push_str(&format!("\n{} neighbor {}", timestamp, neighbor));
        }
        match signal {
            Ok(sample) => out.push_str(&format!(
                "\n{} signal strength={} quality={}",
                timestamp, sample.reading.strength, sample.reading.quality
            )),
            Err(e) => out.push_str(&format!("\n{} signal unavailable: {}", timestamp, e)),
        }
        out
    }
}
