//! Quectel Tower - cell tower scanning for Quectel LTE modems.
//!
//! This crate provides:
//! - nom-based parsers for `AT+QENG` serving and neighbor cell responses
//! - A background worker that owns the modem and runs scans on request
//! - A scanner handle with callback, blocking and cached-result access
//! - Statistics tracking with HDR histograms and a Prometheus endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use quectel_tower::{ScannerConfig, TcpModem, TcpModemConfig, TowerScanner};
//!
//! # async fn run() -> Result<(), quectel_tower::ScanError> {
//! let modem = TcpModem::new(TcpModemConfig::with_address("192.168.1.20:2000"));
//! let scanner = TowerScanner::spawn(modem, ScannerConfig::default());
//!
//! let snapshot = scanner.scan_blocking(Duration::from_secs(30)).await?;
//! snapshot.log_summary("scan");
//!
//! scanner.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod metrics;
pub mod modem;
pub mod parser;
pub mod scanner;
pub mod stats;
pub mod store;
pub mod tower;
pub mod transport;
pub mod worker;

pub use config::Config;
pub use modem::{CompletionStatus, Modem};
pub use parser::{ParseError, parse_neighbor, parse_rat, parse_serving};
pub use scanner::{ScanError, ScannerConfig, TowerScanner};
pub use stats::{ScanStats, StatsSummary};
pub use store::{SharedState, SignalError};
pub use tower::{
    FieldSink, FieldValue, NeighborCell, RadioAccessTechnology, ServingCell, SignalReading,
    SignalSample, TowerSnapshot,
};
pub use transport::{TcpModem, TcpModemConfig};
