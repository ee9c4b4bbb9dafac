//! Moving command text to the instrument and its reply back.
//!
//! Each [`Transport::send`] opens its own connection (or helper process) and
//! closes it before returning, so independent requests never share a channel
//! and replies cannot interleave.

use crate::config::InstrumentConfig;
use crate::error::ScopeError;
use crate::types::{DeviceEndpoint, TransportKind};
use std::time::Duration;

pub mod rpc;
pub mod socket;

pub use rpc::RpcHelperTransport;
pub use socket::SocketTransport;

pub trait Transport {
    /// Send `command` and return the instrument's reply text without the
    /// line terminator.
    fn send(&self, command: &str, timeout: Duration) -> Result<String, ScopeError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, command: &str, timeout: Duration) -> Result<String, ScopeError> {
        (**self).send(command, timeout)
    }
}

/// Transport matching the endpoint's kind.
pub fn transport_for(endpoint: &DeviceEndpoint, config: &InstrumentConfig) -> Box<dyn Transport> {
    match endpoint.kind {
        TransportKind::Socket => Box::new(SocketTransport::new(&endpoint.host, config.port)),
        TransportKind::Rpc => Box::new(RpcHelperTransport::new(&endpoint.host, &config.rpc_helper)),
    }
}

pub(crate) fn require_host(host: &str) -> Result<&str, ScopeError> {
    let host = host.trim();
    if host.is_empty() {
        Err(ScopeError::Configuration(
            "no instrument address configured".to_string(),
        ))
    } else {
        Ok(host)
    }
}
