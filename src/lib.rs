pub mod bridge;
pub mod calibration;
pub mod config;
pub mod error;
pub mod plotting;
pub mod process;
pub mod scope;
pub mod types;

pub use bridge::{Acquisition, Response, ScopeBridge, ScopeBridgeBuilder};
pub use calibration::Calibration;
pub use config::{AppConfig, load_config, load_config_or_default};
pub use error::{ErrorKind, ScopeError};
pub use plotting::{GnuplotRenderer, PlotRequest, Renderer, preview_waveform};
pub use scope::{
    Protocol, RpcHelperTransport, SocketTransport, StatusRecord, Transport, WaveformReply,
    transport_for,
};
pub use types::{
    Channel, Color, CommandRequest, Coupling, DeviceEndpoint, Operation, OperationTag,
    PlotStyle, PreambleRecord, RequestParams, TimeReference, TimeUnitScale, TransportKind,
    TriggerSource, Waveform,
};
