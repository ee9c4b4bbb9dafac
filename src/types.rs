use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScopeError;

/// Time range used by `Init` when the request carries no value.
pub const DEFAULT_TIME_RANGE: f64 = 1e-3;
/// Waveform points requested by `Plot` when the request carries no count.
pub const DEFAULT_POINTS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw SCPI over a TCP socket
    #[default]
    Socket,
    /// Legacy RPC instrument protocol through a command-line helper
    Rpc,
}

/// Where the instrument lives. An empty host means there is no real device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub host: String,
    pub kind: TransportKind,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            host: host.into(),
            kind,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.host.trim().is_empty()
    }
}

/// Analog input channel 1-4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(u8);

impl Channel {
    pub const FIRST: Channel = Channel(1);

    pub fn new(number: u8) -> Result<Self, ScopeError> {
        match number {
            1..=4 => Ok(Channel(number)),
            _ => Err(ScopeError::InvalidParameter {
                name: "channel",
                value: number.to_string(),
            }),
        }
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    pub fn label(&self) -> String {
        format!("Channel {}", self.0)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CHAN{}", self.0)
    }
}

impl FromStr for Channel {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = s.trim().parse::<u8>().map_err(|_| ScopeError::InvalidParameter {
            name: "channel",
            value: s.to_string(),
        })?;
        Channel::new(number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    External,
    Channel(Channel),
}

impl TriggerSource {
    /// Map a requested trigger token onto a source. `E` selects the external
    /// input, a bare digit 1-4 selects that channel, anything else falls back
    /// to the request's own channel.
    pub fn resolve(token: &str, fallback: Channel) -> Self {
        let token = token.trim();
        if token == "E" {
            return TriggerSource::External;
        }
        match token.parse::<u8>().ok().and_then(|n| Channel::new(n).ok()) {
            Some(channel) if token.len() == 1 => TriggerSource::Channel(channel),
            _ => TriggerSource::Channel(fallback),
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::External => f.write_str("EXT"),
            TriggerSource::Channel(channel) => write!(f, "{channel}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeReference {
    Left,
    Center,
    Right,
}

impl TimeReference {
    pub fn scpi(&self) -> &'static str {
        match self {
            TimeReference::Left => "LEFT",
            TimeReference::Center => "CENT",
            TimeReference::Right => "RIGH",
        }
    }

    /// Horizontal position that keeps the trigger one division in from the
    /// reference edge for the given time range.
    pub fn position_offset(&self, time_range: f64) -> f64 {
        match self {
            TimeReference::Left => time_range / 10.0,
            TimeReference::Center => 0.0,
            TimeReference::Right => -time_range / 10.0,
        }
    }
}

impl FromStr for TimeReference {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if upper.starts_with("LEFT") {
            Ok(TimeReference::Left)
        } else if upper.starts_with("CENT") {
            Ok(TimeReference::Center)
        } else if upper.starts_with("RIGH") {
            Ok(TimeReference::Right)
        } else {
            Err(ScopeError::InvalidParameter {
                name: "time reference",
                value: s.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

impl Coupling {
    /// Only an exact `AC` selects AC coupling.
    pub fn from_request(value: &str) -> Self {
        if value == "AC" { Coupling::Ac } else { Coupling::Dc }
    }
}

impl fmt::Display for Coupling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coupling::Ac => f.write_str("AC"),
            Coupling::Dc => f.write_str("DC"),
        }
    }
}

/// Trace colour as `#rrggbb`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Color(String);

impl Color {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Color {
    fn default() -> Self {
        Color("#0000ff".to_string())
    }
}

impl FromStr for Color {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Color(format!("#{}", hex.to_ascii_lowercase())))
        } else {
            Err(ScopeError::InvalidParameter {
                name: "color",
                value: s.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotStyle {
    pub color: Color,
    pub width: u32,
    pub height: u32,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            color: Color::default(),
            width: 640,
            height: 480,
        }
    }
}

/// Operation tag with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Plot { points: u32 },
    AutoScale { trigger: TriggerSource },
    SetTimeReference(TimeReference),
    SetCoupling(Coupling),
    SetTimeRange(f64),
    SetVerticalRange(f64),
    SetVerticalScale(f64),
    SetTriggerChannel(TriggerSource),
    Initialize { time_range: f64 },
    Reset,
    StatusQuery,
}

/// Bare operation tags as they arrive from the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationTag {
    Plot,
    AutoScale,
    SetTimeReference,
    SetCoupling,
    SetTimeRange,
    SetVerticalRange,
    SetVerticalScale,
    SetTriggerChannel,
    Initialize,
    Reset,
    StatusQuery,
}

impl FromStr for OperationTag {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = match s.trim() {
            "Plot" => OperationTag::Plot,
            "AutoScale" => OperationTag::AutoScale,
            "TimRef" | "SetTimeReference" => OperationTag::SetTimeReference,
            "Coupling" | "SetCoupling" => OperationTag::SetCoupling,
            "TimRange" | "SetTimeRange" => OperationTag::SetTimeRange,
            "VertRange" | "SetVerticalRange" => OperationTag::SetVerticalRange,
            "VertScale" | "SetVerticalScale" => OperationTag::SetVerticalScale,
            "TrgChannel" | "SetTriggerChannel" => OperationTag::SetTriggerChannel,
            "Init" | "Initialize" => OperationTag::Initialize,
            "Reset" => OperationTag::Reset,
            "Status" | "StatusQuery" => OperationTag::StatusQuery,
            other => return Err(ScopeError::InvalidOperation(other.to_string())),
        };
        Ok(tag)
    }
}

/// Named request parameters, untyped, as handed over by the request layer.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub channel: Option<String>,
    pub color: Option<String>,
    pub value: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub points: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub operation: Operation,
    /// Channel named by the request, if any
    pub requested_channel: Option<Channel>,
    pub style: PlotStyle,
}

impl CommandRequest {
    pub fn new(operation: Operation, channel: Option<Channel>) -> Self {
        Self {
            operation,
            requested_channel: channel,
            style: PlotStyle::default(),
        }
    }

    pub fn with_style(mut self, style: PlotStyle) -> Self {
        self.style = style;
        self
    }

    /// Channel the operation acts on; channel 1 unless the request named one.
    pub fn channel(&self) -> Channel {
        self.requested_channel.unwrap_or(Channel::FIRST)
    }

    /// Validate the named parameters for `tag` and build a typed request.
    /// `defaults` supplies colour and plot size when the request omits them.
    pub fn from_params(
        tag: &str,
        params: &RequestParams,
        defaults: &PlotStyle,
    ) -> Result<Self, ScopeError> {
        let tag: OperationTag = tag.parse()?;
        let requested_channel = params
            .channel
            .as_deref()
            .map(str::parse::<Channel>)
            .transpose()?;
        let channel = requested_channel.unwrap_or(Channel::FIRST);
        let value = params.value.as_deref().unwrap_or("").trim();

        let operation = match tag {
            OperationTag::Plot => Operation::Plot {
                points: params.points.unwrap_or(DEFAULT_POINTS),
            },
            OperationTag::AutoScale => Operation::AutoScale {
                trigger: TriggerSource::resolve(value, channel),
            },
            OperationTag::SetTimeReference => Operation::SetTimeReference(value.parse()?),
            OperationTag::SetCoupling => Operation::SetCoupling(Coupling::from_request(value)),
            OperationTag::SetTimeRange => Operation::SetTimeRange(parse_value(value)?),
            OperationTag::SetVerticalRange => Operation::SetVerticalRange(parse_value(value)?),
            OperationTag::SetVerticalScale => Operation::SetVerticalScale(parse_value(value)?),
            OperationTag::SetTriggerChannel => {
                Operation::SetTriggerChannel(TriggerSource::resolve(value, channel))
            }
            OperationTag::Initialize => Operation::Initialize {
                time_range: if value.is_empty() {
                    DEFAULT_TIME_RANGE
                } else {
                    parse_value(value)?
                },
            },
            OperationTag::Reset => Operation::Reset,
            OperationTag::StatusQuery => Operation::StatusQuery,
        };

        let style = PlotStyle {
            color: match params.color.as_deref() {
                Some(color) => color.parse()?,
                None => defaults.color.clone(),
            },
            width: params.width.unwrap_or(defaults.width),
            height: params.height.unwrap_or(defaults.height),
        };

        Ok(Self {
            operation,
            requested_channel,
            style,
        })
    }
}

fn parse_value(value: &str) -> Result<f64, ScopeError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ScopeError::InvalidParameter {
            name: "value",
            value: value.to_string(),
        })
}

/// Waveform preamble as reported by `:WAVeform:PREamble?`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PreambleRecord {
    pub format: i32,
    pub kind: i32,
    pub points: u32,
    pub count: i32,
    pub x_increment: f64,
    pub x_origin: f64,
    pub x_reference: f64,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_reference: f64,
}

/// Decoded samples in acquisition order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Waveform {
    pub samples: Vec<f64>,
}

impl Waveform {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// One sample per line, the form the plotter reads from its input.
    pub fn to_lines(&self) -> String {
        let mut out = String::with_capacity(self.samples.len() * 12);
        for sample in &self.samples {
            out.push_str(&sample.to_string());
            out.push('\n');
        }
        out
    }
}

/// Multiplier and label that bring a time span into a readable unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnitScale {
    pub multiplier: f64,
    pub unit: &'static str,
}

impl TimeUnitScale {
    pub fn from_magnitude(seconds: f64) -> Self {
        let magnitude = seconds.abs();
        let (multiplier, unit) = if magnitude <= 1e-8 {
            (1e9, "nsec")
        } else if magnitude <= 1e-5 {
            (1e6, "usec")
        } else if magnitude <= 1e-2 {
            (1e3, "msec")
        } else {
            (1.0, "sec")
        };
        Self { multiplier, unit }
    }
}
