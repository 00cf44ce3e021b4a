//! AT command transport over TCP.
//!
//! Talks to a modem whose serial port is exposed on a TCP socket (ser2net,
//! socat and similar). The connection is opened lazily on the first command
//! and dropped on any timeout or I/O error, so the next command reconnects.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::modem::{CompletionStatus, Modem};
use crate::parser::{Registration, parse_registration, parse_signal_quality};
use crate::tower::SignalReading;

/// Default modem endpoint.
pub const DEFAULT_MODEM_ADDRESS: &str = "127.0.0.1:2000";

/// Network registration query.
pub const REGISTRATION_COMMAND: &str = "AT+CEREG?";

/// Signal quality query.
pub const SIGNAL_QUALITY_COMMAND: &str = "AT+QCSQ";

/// Configuration for a [`TcpModem`].
#[derive(Debug, Clone)]
pub struct TcpModemConfig {
    /// `host:port` of the modem's serial bridge.
    pub address: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Timeout for the registration and signal queries.
    pub control_timeout: Duration,
}

impl Default for TcpModemConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_MODEM_ADDRESS.to_string(),
            connect_timeout: Duration::from_secs(5),
            control_timeout: Duration::from_secs(2),
        }
    }
}

impl TcpModemConfig {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line_buf: String,
}

/// A [`Modem`] reached over TCP.
pub struct TcpModem {
    config: TcpModemConfig,
    conn: Mutex<Option<Connection>>,
}

impl TcpModem {
    pub fn new(config: TcpModemConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let addr = &self.config.address;
        info!("Connecting to modem at {}...", addr);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .context("Connection timeout")?
            .context("Failed to connect")?;

        info!("Connected to modem at {}", addr);

        let (reader, writer) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(reader),
            writer,
            line_buf: String::with_capacity(256),
        })
    }
}

/// The information-response prefix for an AT command, e.g. `+QENG:` for
/// `AT+QENG="servingcell"`.
fn response_prefix(request: &str) -> Option<String> {
    let body = request.strip_prefix("AT")?;
    let end = body.find(['=', '?']).unwrap_or(body.len());
    let name = &body[..end];
    if name.is_empty() {
        return None;
    }
    Some(format!("{}:", name))
}

/// Final result codes that end a command exchange.
fn final_status(line: &str) -> Option<CompletionStatus> {
    if line == "OK" {
        Some(CompletionStatus::Ok)
    } else if line == "ERROR" || line.starts_with("+CME ERROR") {
        Some(CompletionStatus::Error)
    } else {
        None
    }
}

/// Send `request` and read lines until a final result code.
async fn exchange(
    conn: &mut Connection,
    request: &str,
    on_line: &mut (dyn FnMut(&str) + Send),
) -> Result<CompletionStatus> {
    conn.writer
        .write_all(format!("{}\r\n", request).as_bytes())
        .await
        .context("Failed to send command")?;
    conn.writer.flush().await?;

    let prefix = response_prefix(request);

    loop {
        conn.line_buf.clear();
        let n = conn
            .reader
            .read_line(&mut conn.line_buf)
            .await
            .context("Read error")?;
        if n == 0 {
            return Err(anyhow::anyhow!("Modem closed the connection"));
        }

        let line = conn.line_buf.trim();
        if line.is_empty() || line == request {
            continue;
        }
        if let Some(status) = final_status(line) {
            debug!("{} -> {}", request, line);
            return Ok(status);
        }

        match &prefix {
            Some(p) if !line.starts_with(p.as_str()) => {
                debug!("Ignoring unsolicited line: {}", line);
            }
            _ => on_line(line),
        }
    }
}

impl Modem for TcpModem {
    async fn is_ready(&self) -> bool {
        let mut registration: Option<Registration> = None;
        let status = self
            .issue_command(
                REGISTRATION_COMMAND,
                self.config.control_timeout,
                &mut |line: &str| {
                    if let Ok(r) = parse_registration(line) {
                        registration = Some(r);
                    }
                },
            )
            .await;

        status == CompletionStatus::Ok && registration.is_some_and(|r| r.is_registered())
    }

    async fn sample_signal(&self) -> SignalReading {
        let mut reading = SignalReading::default();
        let status = self
            .issue_command(
                SIGNAL_QUALITY_COMMAND,
                self.config.control_timeout,
                &mut |line: &str| match parse_signal_quality(line) {
                    Ok(r) => reading = r,
                    Err(e) => debug!("Signal quality parse error for '{}': {}", line, e),
                },
            )
            .await;

        if status == CompletionStatus::Ok {
            reading
        } else {
            SignalReading::default()
        }
    }

    async fn issue_command(
        &self,
        request: &str,
        limit: Duration,
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> CompletionStatus {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            match self.connect().await {
                Ok(conn) => *guard = Some(conn),
                Err(e) => {
                    warn!("Modem connection failed: {:#}", e);
                    return CompletionStatus::Error;
                }
            }
        }
        let Some(conn) = guard.as_mut() else {
            return CompletionStatus::Error;
        };

        let result = timeout(limit, exchange(conn, request, on_line)).await;
        match result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("{} failed: {:#}, dropping connection", request, e);
                *guard = None;
                CompletionStatus::Error
            }
            Err(_) => {
                warn!("{} timed out after {} ms, dropping connection", request, limit.as_millis());
                *guard = None;
                CompletionStatus::Timeout
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::{NEIGHBOR_CELL_COMMAND, SERVING_CELL_COMMAND};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

    /// Serve a fake modem that echoes each command and replies with the
    /// responder's lines. Returns the address and a connection counter.
    async fn fake_modem(responder: Responder) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let responder = Arc::clone(&responder);
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut lines = BufReader::new(reader).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let command = line.trim();
                        if command.is_empty() {
                            continue;
                        }
                        let mut reply = format!("{}\r\n", command);
                        for response in responder(command) {
                            reply.push_str(&response);
                            reply.push_str("\r\n");
                        }
                        if writer.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (addr, connections)
    }

    fn make_modem(addr: SocketAddr) -> TcpModem {
        TcpModem::new(TcpModemConfig {
            address: addr.to_string(),
            connect_timeout: Duration::from_secs(1),
            control_timeout: Duration::from_millis(500),
        })
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_response_prefix() {
        assert_eq!(
            response_prefix(SERVING_CELL_COMMAND),
            Some("+QENG:".to_string())
        );
        assert_eq!(response_prefix("AT+CEREG?"), Some("+CEREG:".to_string()));
        assert_eq!(response_prefix("AT+QCSQ"), Some("+QCSQ:".to_string()));
        assert_eq!(response_prefix("AT"), None);
        assert_eq!(response_prefix("garbage"), None);
    }

    #[test]
    fn test_final_status() {
        assert_eq!(final_status("OK"), Some(CompletionStatus::Ok));
        assert_eq!(final_status("ERROR"), Some(CompletionStatus::Error));
        assert_eq!(
            final_status("+CME ERROR: 58"),
            Some(CompletionStatus::Error)
        );
        assert_eq!(final_status("+QENG: \"servingcell\""), None);
    }

    #[tokio::test]
    async fn test_issue_command_forwards_response_lines() {
        let responder: Responder = Arc::new(|command| {
            if command == NEIGHBOR_CELL_COMMAND {
                lines(&[
                    "",
                    r#"+QENG: "neighbourcell intra","LTE",6300,128,-11,-101,-72,0,20,7,-,-,-,-"#,
                    "+CEREG: 5",
                    r#"+QENG: "neighbourcell inter","LTE",1300,301,-15,-112,-85,0,6,7,-,-,-,-"#,
                    "",
                    "OK",
                ])
            } else {
                lines(&["ERROR"])
            }
        });
        let (addr, _) = fake_modem(responder).await;
        let modem = make_modem(addr);

        let mut received = Vec::new();
        let status = modem
            .issue_command(NEIGHBOR_CELL_COMMAND, Duration::from_secs(1), &mut |line: &str| {
                received.push(line.to_string())
            })
            .await;

        assert_eq!(status, CompletionStatus::Ok);
        assert_eq!(received.len(), 2);
        assert!(received[0].contains(",128,"));
        assert!(received[1].contains(",301,"));
    }

    #[tokio::test]
    async fn test_error_results() {
        let responder: Responder = Arc::new(|command| {
            if command == SERVING_CELL_COMMAND {
                lines(&["+CME ERROR: 58"])
            } else {
                lines(&["ERROR"])
            }
        });
        let (addr, connections) = fake_modem(responder).await;
        let modem = make_modem(addr);

        let status = modem
            .issue_command(SERVING_CELL_COMMAND, Duration::from_secs(1), &mut |_: &str| {})
            .await;
        assert_eq!(status, CompletionStatus::Error);

        let status = modem
            .issue_command(NEIGHBOR_CELL_COMMAND, Duration::from_secs(1), &mut |_: &str| {})
            .await;
        assert_eq!(status, CompletionStatus::Error);

        // Error results keep the connection
        assert_eq!(connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_drops_connection() {
        let responder: Responder = Arc::new(|command| {
            if command == SERVING_CELL_COMMAND {
                // Never completes
                lines(&[r#"+QENG: "servingcell","NOCONN","LTE","FDD",262,02,1A2B3C,5,5,1,1,1,64,-95"#])
            } else {
                lines(&["OK"])
            }
        });
        let (addr, connections) = fake_modem(responder).await;
        let modem = make_modem(addr);

        let mut received = 0;
        let status = modem
            .issue_command(SERVING_CELL_COMMAND, Duration::from_millis(200), &mut |_: &str| {
                received += 1
            })
            .await;
        assert_eq!(status, CompletionStatus::Timeout);
        assert_eq!(received, 1);

        let status = modem
            .issue_command(NEIGHBOR_CELL_COMMAND, Duration::from_secs(1), &mut |_: &str| {})
            .await;
        assert_eq!(status, CompletionStatus::Ok);
        assert_eq!(connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let modem = make_modem(addr);
        let status = modem
            .issue_command(SERVING_CELL_COMMAND, Duration::from_secs(1), &mut |_: &str| {})
            .await;
        assert_eq!(status, CompletionStatus::Error);
        assert!(!modem.is_ready().await);
    }

    #[tokio::test]
    async fn test_is_ready_and_signal() {
        let registered: Responder = Arc::new(|command| match command {
            REGISTRATION_COMMAND => lines(&["+CEREG: 0,5", "OK"]),
            SIGNAL_QUALITY_COMMAND => lines(&[r#"+QCSQ: "LTE",-67,-98,141,-11"#, "OK"]),
            _ => lines(&["ERROR"]),
        });
        let (addr, _) = fake_modem(registered).await;
        let modem = make_modem(addr);

        assert!(modem.is_ready().await);
        let reading = modem.sample_signal().await;
        assert_eq!(reading.strength, -98.0);
        assert_eq!(reading.quality, -11.0);
        assert!(reading.is_usable());

        let searching: Responder = Arc::new(|command| match command {
            REGISTRATION_COMMAND => lines(&["+CEREG: 0,2", "OK"]),
            SIGNAL_QUALITY_COMMAND => lines(&[r#"+QCSQ: "NOSERVICE""#, "OK"]),
            _ => lines(&["ERROR"]),
        });
        let (addr, _) = fake_modem(searching).await;
        let modem = make_modem(addr);

        assert!(!modem.is_ready().await);
        assert!(!modem.sample_signal().await.is_usable());
    }
}
