//! The modem command channel consumed by the scan worker.
//!
//! Only the worker task ever talks to a [`Modem`]. Implementations own the
//! physical transport and the AT command/response dispatch; the worker only
//! sees intermediate response lines and a final completion status.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::tower::SignalReading;

/// Serving cell query.
pub const SERVING_CELL_COMMAND: &str = "AT+QENG=\"servingcell\"";

/// Neighbor cell query. Quectel spells it the British way.
pub const NEIGHBOR_CELL_COMMAND: &str = "AT+QENG=\"neighbourcell\"";

/// Final status of an AT command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The modem answered `OK`.
    Ok,
    /// The modem answered `ERROR` / `+CME ERROR`, or the transport failed.
    Error,
    /// No final status arrived within the command timeout.
    Timeout,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Ok => write!(f, "OK"),
            CompletionStatus::Error => write!(f, "ERROR"),
            CompletionStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// A modem that accepts AT commands.
pub trait Modem: Send + Sync + 'static {
    /// Whether the modem is powered and attached to the network.
    fn is_ready(&self) -> impl Future<Output = bool> + Send;

    /// Read the current signal strength.
    ///
    /// A reading with a non-negative strength means no usable measurement.
    fn sample_signal(&self) -> impl Future<Output = SignalReading> + Send;

    /// Send `request` and feed each intermediate response line to `on_line`
    /// until the final status arrives or `timeout` elapses.
    ///
    /// Lines delivered before a timeout are not taken back.
    fn issue_command(
        &self,
        request: &str,
        timeout: Duration,
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> impl Future<Output = CompletionStatus> + Send;
}
