use super::{Transport, require_host};
use crate::error::ScopeError;
use log::{debug, warn};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Query appended to non-query batches so the instrument always answers.
pub const OPERATION_COMPLETE: &str = "*OPC?";

/// Socket timeouts must be non-zero.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Raw SCPI over TCP, one connection per command batch.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    host: String,
    port: u16,
}

impl SocketTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    fn connect(&self, host: &str, timeout: Duration) -> Result<TcpStream, ScopeError> {
        let address = format!("{host}:{}", self.port);
        let connect_error = |source| ScopeError::Connect {
            address: address.clone(),
            source,
        };

        let addrs = (host, self.port).to_socket_addrs().map_err(connect_error)?;
        let mut last_error = None;
        for addr in addrs {
            debug!("Connecting to instrument at {addr}");
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!("Failed to connect to {addr}: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(connect_error(last_error.unwrap_or_else(|| {
            std::io::Error::new(ErrorKind::NotFound, "host resolved to no addresses")
        })))
    }
}

impl Transport for SocketTransport {
    fn send(&self, command: &str, timeout: Duration) -> Result<String, ScopeError> {
        let host = require_host(&self.host)?;
        let timeout = timeout.max(MIN_TIMEOUT);
        let needs_ack = !is_query(command);
        let line = framed_command(command, needs_ack);

        let stream = self.connect(host, timeout)?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .map_err(|source| ScopeError::Io {
                source,
                context: "Configuring socket timeouts".to_string(),
            })?;

        debug!("-> {}", line.trim_end());
        (&stream)
            .write_all(line.as_bytes())
            .map_err(|e| io_error(e, timeout, "Writing command"))?;

        let mut reply = String::new();
        let read = BufReader::new(&stream)
            .read_line(&mut reply)
            .map_err(|e| io_error(e, timeout, "Reading reply"))?;
        if read == 0 {
            return Err(ScopeError::Protocol(
                "connection closed before a reply arrived".to_string(),
            ));
        }
        let reply = reply.trim_end_matches(['\r', '\n']);
        debug!(
            "<- {} bytes: {}",
            reply.len(),
            reply.chars().take(120).collect::<String>()
        );

        if needs_ack {
            strip_acknowledgement(reply)
        } else {
            Ok(reply.to_string())
        }
    }
}

/// True when the batch ends in a query (`...?` or `...?;`).
pub fn is_query(command: &str) -> bool {
    command
        .trim_end()
        .trim_end_matches(';')
        .trim_end()
        .ends_with('?')
}

fn framed_command(command: &str, needs_ack: bool) -> String {
    let mut line = command.trim_end().to_string();
    if needs_ack {
        if !line.is_empty() && !line.ends_with(';') {
            line.push(';');
        }
        line.push_str(OPERATION_COMPLETE);
    }
    line.push('\n');
    line
}

/// Remove the trailing operation-complete answer, which must be `1`.
pub fn strip_acknowledgement(reply: &str) -> Result<String, ScopeError> {
    let reply = reply.trim_end();
    let (body, ack) = match reply.rsplit_once(';') {
        Some((body, ack)) => (body, ack),
        None => ("", reply),
    };
    match ack.trim().trim_start_matches('+') {
        "1" => Ok(body.to_string()),
        other => Err(ScopeError::Protocol(format!(
            "expected operation complete '1', got '{other}'"
        ))),
    }
}

fn io_error(source: std::io::Error, timeout: Duration, context: &str) -> ScopeError {
    match source.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => ScopeError::Timeout(timeout),
        _ => ScopeError::Io {
            source,
            context: context.to_string(),
        },
    }
}
