pub mod commands;
pub mod protocol;
pub mod status;
pub mod transport;

pub use protocol::{Protocol, WaveformReply};
pub use status::{StatusRecord, assemble};
pub use transport::{RpcHelperTransport, SocketTransport, Transport, transport_for};
