use super::{Transport, require_host};
use crate::error::ScopeError;
use crate::process;
use log::debug;
use std::time::Duration;

/// Legacy RPC instrument protocol, spoken by an external command-line client.
///
/// The helper is started as `<helper> <host>`, receives the command batch on
/// its standard input and prints the instrument's reply. Standard output and
/// standard error are merged into the reply text.
#[derive(Debug, Clone)]
pub struct RpcHelperTransport {
    host: String,
    helper: String,
}

impl RpcHelperTransport {
    pub fn new(host: &str, helper: &str) -> Self {
        Self {
            host: host.to_string(),
            helper: helper.to_string(),
        }
    }
}

impl Transport for RpcHelperTransport {
    fn send(&self, command: &str, timeout: Duration) -> Result<String, ScopeError> {
        let host = require_host(&self.host)?;
        let input = format!("{}\n", command.trim_end());
        debug!("-> [{} {}] {}", self.helper, host, command.trim_end());

        let output = process::run(&self.helper, &[host], input.as_bytes(), timeout)?;
        let reply = output.merged_text().trim_end_matches(['\r', '\n']).to_string();
        debug!("<- {} bytes", reply.len());
        Ok(reply)
    }
}
